//! Derive macro for oxide-persist entities.
//!
//! This crate provides `#[derive(Entity)]`, which describes a struct's
//! fields to the mapping layer without any runtime reflection.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Ident, LitInt, LitStr, Type};

/// Derives `oxide_persist::Entity` for a struct with named fields.
///
/// # Attributes
///
/// - `#[entity(name = "Name")]` - Entity name the table name is derived
///   from (optional, defaults to the struct name)
///
/// # Field Attributes
///
/// - `#[field(size = N)]` - Width of a text column (defaults to 50)
/// - `#[field(autoincrement)]` - Value is generated by the database
/// - `#[field(indexed)]` - Column gets a secondary index
/// - `#[field(unique)]` - Column gets a unique index
/// - `#[field(no_update)]` - Column is left out of updates
///
/// The primary key is the first field named `id` or starting with `pk`.
/// Every field type must implement `oxide_persist::FieldType`.
///
/// # Generated Items
///
/// - `NAME` and `FIELDS` with one descriptor per field
/// - `to_params`, which collects field values keyed by field name
/// - `set_field`, which assigns a stored value to a field by name
#[proc_macro_derive(Entity, attributes(entity, field))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    derive_entity_impl(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

struct FieldInfo {
    ident: Ident,
    name: String,
    ty: Type,
    attrs: FieldAttrs,
}

#[derive(Default)]
struct FieldAttrs {
    size: Option<u16>,
    autoincrement: bool,
    indexed: bool,
    unique: bool,
    no_update: bool,
}

fn derive_entity_impl(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let entity_name = get_entity_name(&input.attrs, struct_name)?;

    let named = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Entity derive only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Entity derive only supports structs",
            ));
        }
    };

    let mut fields = Vec::with_capacity(named.len());
    for field in named {
        let Some(ident) = field.ident.clone() else {
            return Err(syn::Error::new_spanned(field, "field must be named"));
        };
        let name = ident.to_string().trim_start_matches("r#").to_string();
        fields.push(FieldInfo {
            ident,
            name,
            ty: field.ty.clone(),
            attrs: parse_field_attrs(&field.attrs)?,
        });
    }

    let descriptors = fields.iter().map(descriptor_tokens);

    let param_entries = fields.iter().map(|f| {
        let name = &f.name;
        let ident = &f.ident;
        quote! {
            (#name, ::oxide_persist::ToSqlValue::to_sql_value(&self.#ident))
        }
    });

    let assignments = fields.iter().map(|f| {
        let name = &f.name;
        let ident = &f.ident;
        quote! {
            #name => {
                self.#ident = ::oxide_persist::FromSqlValue::from_sql_value(value)?;
            }
        }
    });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::oxide_persist::Entity for #struct_name #ty_generics #where_clause {
            const NAME: &'static str = #entity_name;

            const FIELDS: &'static [::oxide_persist::FieldDescriptor] = &[
                #(#descriptors),*
            ];

            fn to_params(&self) -> ::oxide_persist::Params {
                [#(#param_entries),*].into_iter().collect()
            }

            fn set_field(
                &mut self,
                field: &str,
                value: ::oxide_persist::SqlValue,
            ) -> ::std::result::Result<(), ::oxide_persist::CoerceError> {
                match field {
                    #(#assignments)*
                    _ => {}
                }
                Ok(())
            }
        }
    })
}

fn descriptor_tokens(field: &FieldInfo) -> TokenStream2 {
    let name = &field.name;
    let ty = &field.ty;
    let mut tokens = quote! {
        ::oxide_persist::FieldDescriptor::new(
            #name,
            <#ty as ::oxide_persist::FieldType>::LOGICAL_TYPE,
        )
    };
    if let Some(size) = field.attrs.size {
        tokens = quote! { #tokens.size(#size) };
    }
    if field.attrs.autoincrement {
        tokens = quote! { #tokens.auto_increment() };
    }
    if field.attrs.indexed {
        tokens = quote! { #tokens.indexed() };
    }
    if field.attrs.unique {
        tokens = quote! { #tokens.unique() };
    }
    if field.attrs.no_update {
        tokens = quote! { #tokens.no_update() };
    }
    tokens
}

fn get_entity_name(attrs: &[Attribute], struct_name: &Ident) -> syn::Result<String> {
    let mut entity_name = None;
    for attr in attrs {
        if attr.path().is_ident("entity") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let value: LitStr = meta.value()?.parse()?;
                    entity_name = Some(value.value());
                    Ok(())
                } else {
                    Err(meta.error("unsupported entity attribute, expected `name`"))
                }
            })?;
        }
    }
    Ok(entity_name.unwrap_or_else(|| struct_name.to_string()))
}

fn parse_field_attrs(attrs: &[Attribute]) -> syn::Result<FieldAttrs> {
    let mut result = FieldAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("field") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("size") {
                let value: LitInt = meta.value()?.parse()?;
                result.size = Some(value.base10_parse()?);
            } else if meta.path.is_ident("autoincrement") {
                result.autoincrement = true;
            } else if meta.path.is_ident("indexed") {
                result.indexed = true;
            } else if meta.path.is_ident("unique") {
                result.unique = true;
            } else if meta.path.is_ident("no_update") {
                result.no_update = true;
            } else {
                return Err(meta.error(
                    "unsupported field attribute, expected one of \
                     `size`, `autoincrement`, `indexed`, `unique`, `no_update`",
                ));
            }
            Ok(())
        })?;
    }

    Ok(result)
}
