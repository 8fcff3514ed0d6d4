//! Entity model builder.
//!
//! A record type describes its fields with a list of [`FieldDescriptor`]s,
//! usually generated by `#[derive(Entity)]`. [`TableDefinition::build`] turns
//! that list into the column mapping and the CRUD statements used by the
//! [`Mapper`](crate::mapper::Mapper).
//!
//! Naming rules:
//!
//! - Column names are the field names in snake case (`firstName` becomes
//!   `first_name`), see [`to_sql_name`].
//! - The primary key is the first field named `id` or starting with `pk`.
//! - Fields starting with `fk` are indexed.
//! - Text fields default to a width of 50.

use serde::Serialize;

use crate::dialect::Dialect;
use crate::error::{PersistError, Result};
use crate::params::Params;
use crate::value::{CoerceError, SqlValue};

/// Width of text columns declared without an explicit size.
pub const DEFAULT_TEXT_SIZE: u16 = 50;

/// Logical column type of a field, independent of any backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogicalType {
    /// Variable-length text.
    Text,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// Single-precision float.
    Float32,
    /// Double-precision float.
    Float64,
    /// Boolean.
    Bool,
    /// Date and time.
    Timestamp,
}

impl LogicalType {
    /// Returns `true` for the signed and unsigned integer types.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }

    /// Returns `true` for the unsigned integer types.
    #[must_use]
    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64
        )
    }
}

/// Declarative description of one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name as declared on the record.
    pub name: &'static str,
    /// Logical column type.
    pub logical_type: LogicalType,
    /// Explicit text width.
    pub size: Option<u16>,
    /// Value is generated by the database.
    pub auto_increment: bool,
    /// Column carries a secondary index.
    pub indexed: bool,
    /// Column carries a unique index.
    pub unique: bool,
    /// Column is written by updates.
    pub updatable: bool,
}

impl FieldDescriptor {
    /// Creates a descriptor with default options.
    #[must_use]
    pub const fn new(name: &'static str, logical_type: LogicalType) -> Self {
        Self {
            name,
            logical_type,
            size: None,
            auto_increment: false,
            indexed: false,
            unique: false,
            updatable: true,
        }
    }

    /// Sets the text width.
    #[must_use]
    pub const fn size(mut self, size: u16) -> Self {
        self.size = Some(size);
        self
    }

    /// Marks the field as generated by the database.
    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Requests a secondary index on the column.
    #[must_use]
    pub const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Requests a unique index on the column.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Excludes the field from updates.
    #[must_use]
    pub const fn no_update(mut self) -> Self {
        self.updatable = false;
        self
    }
}

/// A record type that can be mapped to a table.
///
/// Implemented by `#[derive(Entity)]`.
pub trait Entity {
    /// Entity name; the table name is derived from it.
    const NAME: &'static str;

    /// Field descriptors in declaration order.
    const FIELDS: &'static [FieldDescriptor];

    /// Returns the current field values keyed by field name.
    fn to_params(&self) -> Params;

    /// Assigns a stored value to the named field.
    ///
    /// Unknown names are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`CoerceError`] when the value does not fit the field type.
    fn set_field(&mut self, field: &str, value: SqlValue) -> std::result::Result<(), CoerceError>;
}

/// Converts a field or entity name to its column or table name.
///
/// An underscore is inserted before each uppercase character whose
/// predecessor is not uppercase, then everything is lower-cased. Runs of
/// capitals therefore stay together: `ID` gives `id`, `userID` gives
/// `user_id`.
#[must_use]
pub fn to_sql_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut last_upper = true;
    for c in name.chars() {
        let upper = c.is_uppercase();
        if upper && !last_upper {
            out.push('_');
        }
        out.extend(c.to_lowercase());
        last_upper = upper;
    }
    out
}

/// Returns the name of the index managed for `column` of `table`.
#[must_use]
pub fn index_name(table: &str, column: &str) -> String {
    format!("idx_{table}_{column}")
}

fn is_primary_key_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "id" || lower.starts_with("pk")
}

fn is_foreign_key_name(name: &str) -> bool {
    name.to_ascii_lowercase().starts_with("fk")
}

/// One declared field and its live-state flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDefinition {
    /// Field name as declared on the record.
    pub name: String,
    /// Column name.
    pub sql_name: String,
    /// Column name quoted for the dialect.
    pub quoted_name: String,
    /// Logical column type.
    pub logical_type: LogicalType,
    /// Text width, `-1` when the type has none.
    pub size: i32,
    /// Field is the table's primary key.
    pub is_primary_key: bool,
    /// Value is generated by the database.
    pub is_auto_increment: bool,
    /// Column carries a secondary index.
    pub is_indexed: bool,
    /// Column carries a unique index.
    pub is_unique: bool,
    /// Column is written by updates.
    pub is_updatable: bool,
    /// Column exists in the live table.
    pub exists_in_db: bool,
    /// Live column type is compatible with the declaration.
    pub type_matches_db: bool,
    /// Live index state matches the declaration.
    pub index_matches_db: bool,
}

impl FieldDefinition {
    fn from_descriptor<D: Dialect + ?Sized>(
        descriptor: &FieldDescriptor,
        primary_key: bool,
        dialect: &D,
    ) -> Self {
        let sql_name = to_sql_name(descriptor.name);
        let size = match (descriptor.logical_type, descriptor.size) {
            (LogicalType::Text, Some(size)) => i32::from(size),
            (LogicalType::Text, None) => i32::from(DEFAULT_TEXT_SIZE),
            _ => -1,
        };
        Self {
            name: descriptor.name.to_string(),
            quoted_name: dialect.quote_identifier(&sql_name),
            sql_name,
            logical_type: descriptor.logical_type,
            size,
            is_primary_key: primary_key,
            is_auto_increment: descriptor.auto_increment,
            is_indexed: descriptor.indexed || is_foreign_key_name(descriptor.name),
            is_unique: descriptor.unique,
            is_updatable: descriptor.updatable,
            exists_in_db: false,
            type_matches_db: false,
            index_matches_db: false,
        }
    }

    /// Returns `true` when the column should carry an index.
    #[must_use]
    pub const fn wants_index(&self) -> bool {
        !self.is_primary_key && (self.is_indexed || self.is_unique)
    }

    pub(crate) fn reset(&mut self) {
        self.exists_in_db = false;
        self.type_matches_db = false;
        self.index_matches_db = false;
    }
}

/// Discrepancies between a declaration and its live table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableFlags {
    /// The table does not exist.
    pub must_create: bool,
    /// Columns are missing or mistyped.
    pub must_modify: bool,
    /// A change needs a rebuild or in-place type change.
    pub must_recreate: bool,
    /// Indexes differ from the declaration.
    pub must_reindex: bool,
}

impl TableFlags {
    /// Returns `true` when no migration is needed.
    #[must_use]
    pub const fn is_up_to_date(&self) -> bool {
        !(self.must_create || self.must_modify || self.must_reindex)
    }
}

/// Statement templates for single-row access by primary key.
///
/// Placeholders are `@<field name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statements {
    /// Select by key, columns aliased to field names.
    pub select: String,
    /// Insert of every non-generated field.
    pub insert: String,
    /// Update by key, `None` when no column is updatable.
    pub update: Option<String>,
    /// Delete by key.
    pub delete: String,
}

/// The persistence mapping of one record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDefinition {
    name: String,
    sql_name: String,
    quoted_name: String,
    fields: Vec<FieldDefinition>,
    primary_key_index: usize,
    statements: Statements,
    flags: Option<TableFlags>,
}

impl TableDefinition {
    /// Builds the mapping for a record type from its field descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::NoPrimaryKey`] when no field qualifies as the
    /// primary key, [`PersistError::DuplicateColumn`] when two fields share
    /// a column name, and [`PersistError::InvalidAutoIncrement`] when the
    /// primary key is auto-increment but not an integer.
    pub fn build<D: Dialect + ?Sized>(
        name: &str,
        descriptors: &[FieldDescriptor],
        dialect: &D,
    ) -> Result<Self> {
        let primary_key_index = descriptors
            .iter()
            .position(|d| is_primary_key_name(d.name))
            .ok_or_else(|| PersistError::NoPrimaryKey {
                entity: name.to_string(),
            })?;

        let fields: Vec<FieldDefinition> = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| FieldDefinition::from_descriptor(d, i == primary_key_index, dialect))
            .collect();

        for (i, field) in fields.iter().enumerate() {
            if let Some(earlier) = fields[..i].iter().find(|f| f.sql_name == field.sql_name) {
                return Err(PersistError::DuplicateColumn {
                    entity: name.to_string(),
                    first: earlier.name.clone(),
                    second: field.name.clone(),
                    column: field.sql_name.clone(),
                });
            }
        }

        let key = &fields[primary_key_index];
        if key.is_auto_increment && !key.logical_type.is_integer() {
            return Err(PersistError::InvalidAutoIncrement {
                entity: name.to_string(),
                field: key.name.clone(),
            });
        }

        let sql_name = to_sql_name(name);
        let quoted_name = dialect.quote_identifier(&sql_name);
        let statements = render_statements(&quoted_name, &fields, primary_key_index, dialect);

        Ok(Self {
            name: name.to_string(),
            sql_name,
            quoted_name,
            fields,
            primary_key_index,
            statements,
            flags: None,
        })
    }

    /// Builds the mapping for an [`Entity`] type.
    ///
    /// # Errors
    ///
    /// See [`TableDefinition::build`].
    pub fn from_entity<T: Entity, D: Dialect + ?Sized>(dialect: &D) -> Result<Self> {
        Self::build(T::NAME, T::FIELDS, dialect)
    }

    /// Returns the entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table name.
    #[must_use]
    pub fn sql_name(&self) -> &str {
        &self.sql_name
    }

    /// Returns the quoted table name.
    #[must_use]
    pub fn quoted_name(&self) -> &str {
        &self.quoted_name
    }

    /// Returns the fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub(crate) fn fields_mut(&mut self) -> &mut [FieldDefinition] {
        &mut self.fields
    }

    /// Returns the primary-key field.
    #[must_use]
    pub fn primary_key(&self) -> &FieldDefinition {
        &self.fields[self.primary_key_index]
    }

    /// Returns the position of the primary key in [`Self::fields`].
    #[must_use]
    pub const fn primary_key_index(&self) -> usize {
        self.primary_key_index
    }

    /// Looks up a field by its declared name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the name of the index managed for a field's column.
    #[must_use]
    pub fn index_name(&self, field: &FieldDefinition) -> String {
        index_name(&self.sql_name, &field.sql_name)
    }

    /// Returns the statement templates.
    #[must_use]
    pub const fn statements(&self) -> &Statements {
        &self.statements
    }

    /// Returns the flags of the last diff pass, all clear when none ran.
    #[must_use]
    pub fn flags(&self) -> TableFlags {
        self.flags.unwrap_or_default()
    }

    /// Returns `true` when the flags come from a diff pass that has not
    /// been consumed by a migration yet.
    #[must_use]
    pub const fn is_diffed(&self) -> bool {
        self.flags.is_some()
    }

    pub(crate) fn set_flags(&mut self, flags: TableFlags) {
        self.flags = Some(flags);
    }

    /// Forgets the last diff pass; the live schema may have changed since.
    pub(crate) fn invalidate_diff(&mut self) {
        self.flags = None;
    }

    /// Returns `true` when the last diff pass found discrepancies.
    #[must_use]
    pub fn needs_migration(&self) -> bool {
        !self.flags().is_up_to_date()
    }
}

fn render_statements<D: Dialect + ?Sized>(
    table: &str,
    fields: &[FieldDefinition],
    primary_key_index: usize,
    dialect: &D,
) -> Statements {
    let key = &fields[primary_key_index];
    let where_key = format!("WHERE {} = @{}", key.quoted_name, key.name);

    let select_columns = fields
        .iter()
        .map(|f| format!("{} AS {}", f.quoted_name, dialect.quote_identifier(&f.name)))
        .collect::<Vec<_>>()
        .join(", ");
    let select = format!("SELECT {select_columns} FROM {table} {where_key}");

    let written: Vec<&FieldDefinition> = fields.iter().filter(|f| !f.is_auto_increment).collect();
    let insert = if written.is_empty() {
        format!("INSERT INTO {table} {}", dialect.insert_defaults_clause())
    } else {
        let columns = written
            .iter()
            .map(|f| f.quoted_name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let values = written
            .iter()
            .map(|f| format!("@{}", f.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {table} ({columns}) VALUES ({values})")
    };

    let assignments: Vec<String> = fields
        .iter()
        .filter(|f| f.is_updatable && !f.is_auto_increment && !f.is_primary_key)
        .map(|f| format!("{} = @{}", f.quoted_name, f.name))
        .collect();
    let update = if assignments.is_empty() {
        None
    } else {
        Some(format!(
            "UPDATE {table} SET {} {where_key}",
            assignments.join(", ")
        ))
    };

    let delete = format!("DELETE FROM {table} {where_key}");

    Statements {
        select,
        insert,
        update,
        delete,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::dialect::{MySqlDialect, SqliteDialect};

    const CONTACT: &[FieldDescriptor] = &[
        FieldDescriptor::new("id", LogicalType::Int64).auto_increment(),
        FieldDescriptor::new("firstName", LogicalType::Text).size(30),
        FieldDescriptor::new("lastName", LogicalType::Text),
        FieldDescriptor::new("fkGroup", LogicalType::Int32),
        FieldDescriptor::new("email", LogicalType::Text).unique(),
        FieldDescriptor::new("createdAt", LogicalType::Timestamp).no_update(),
    ];

    #[test]
    fn sql_names_split_on_case_transitions() {
        assert_eq!(to_sql_name("ContactInfo"), "contact_info");
        assert_eq!(to_sql_name("firstName"), "first_name");
        assert_eq!(to_sql_name("ID"), "id");
        assert_eq!(to_sql_name("userID"), "user_id");
        assert_eq!(to_sql_name("already_snake"), "already_snake");
        assert_eq!(to_sql_name(""), "");
    }

    #[test]
    fn build_derives_columns_and_flags() {
        let def = TableDefinition::build("ContactInfo", CONTACT, &SqliteDialect).unwrap();
        assert_eq!(def.sql_name(), "contact_info");
        assert_eq!(def.quoted_name(), "\"contact_info\"");
        assert_eq!(def.primary_key().name, "id");

        let first = def.field("firstName").unwrap();
        assert_eq!(first.sql_name, "first_name");
        assert_eq!(first.size, 30);
        assert_eq!(def.field("lastName").unwrap().size, 50);
        assert_eq!(def.field("fkGroup").unwrap().size, -1);
        assert!(def.field("fkGroup").unwrap().is_indexed);
        assert!(def.field("email").unwrap().wants_index());
        assert!(!def.field("createdAt").unwrap().is_updatable);
        assert_eq!(
            def.index_name(def.field("email").unwrap()),
            "idx_contact_info_email"
        );
    }

    #[test]
    fn statements_follow_field_options() {
        let def = TableDefinition::build("ContactInfo", CONTACT, &SqliteDialect).unwrap();
        let stmts = def.statements();
        assert_eq!(
            stmts.select,
            "SELECT \"id\" AS \"id\", \"first_name\" AS \"firstName\", \
             \"last_name\" AS \"lastName\", \"fk_group\" AS \"fkGroup\", \
             \"email\" AS \"email\", \"created_at\" AS \"createdAt\" \
             FROM \"contact_info\" WHERE \"id\" = @id"
        );
        assert_eq!(
            stmts.insert,
            "INSERT INTO \"contact_info\" (\"first_name\", \"last_name\", \"fk_group\", \
             \"email\", \"created_at\") VALUES (@firstName, @lastName, @fkGroup, @email, @createdAt)"
        );
        assert_eq!(
            stmts.update.as_deref(),
            Some(
                "UPDATE \"contact_info\" SET \"first_name\" = @firstName, \
                 \"last_name\" = @lastName, \"fk_group\" = @fkGroup, \"email\" = @email \
                 WHERE \"id\" = @id"
            )
        );
        assert_eq!(
            stmts.delete,
            "DELETE FROM \"contact_info\" WHERE \"id\" = @id"
        );
    }

    #[test]
    fn first_matching_field_is_the_primary_key() {
        const FIELDS: &[FieldDescriptor] = &[
            FieldDescriptor::new("name", LogicalType::Text),
            FieldDescriptor::new("pkCode", LogicalType::Text),
            FieldDescriptor::new("id", LogicalType::Int64),
        ];
        let def = TableDefinition::build("Tag", FIELDS, &SqliteDialect).unwrap();
        assert_eq!(def.primary_key().name, "pkCode");
        assert_eq!(def.primary_key_index(), 1);
        assert!(!def.field("id").unwrap().is_primary_key);
    }

    #[test]
    fn missing_primary_key_is_rejected() {
        const FIELDS: &[FieldDescriptor] = &[FieldDescriptor::new("name", LogicalType::Text)];
        let err = TableDefinition::build("Tag", FIELDS, &SqliteDialect).unwrap_err();
        assert!(matches!(err, PersistError::NoPrimaryKey { entity } if entity == "Tag"));
    }

    #[test]
    fn colliding_column_names_are_rejected() {
        const FIELDS: &[FieldDescriptor] = &[
            FieldDescriptor::new("id", LogicalType::Int64),
            FieldDescriptor::new("firstName", LogicalType::Text),
            FieldDescriptor::new("first_name", LogicalType::Text),
        ];
        let err = TableDefinition::build("Person", FIELDS, &SqliteDialect).unwrap_err();
        assert!(matches!(
            err,
            PersistError::DuplicateColumn { ref column, .. } if column == "first_name"
        ));
    }

    #[test]
    fn auto_increment_key_must_be_integer() {
        const FIELDS: &[FieldDescriptor] =
            &[FieldDescriptor::new("id", LogicalType::Text).auto_increment()];
        let err = TableDefinition::build("Tag", FIELDS, &SqliteDialect).unwrap_err();
        assert!(matches!(err, PersistError::InvalidAutoIncrement { .. }));
    }

    #[test]
    fn key_only_entity_has_no_update() {
        const FIELDS: &[FieldDescriptor] =
            &[FieldDescriptor::new("id", LogicalType::Int64).auto_increment()];
        let def = TableDefinition::build("Counter", FIELDS, &MySqlDialect).unwrap();
        assert_eq!(def.statements().update, None);
        assert_eq!(def.statements().insert, "INSERT INTO `counter` () VALUES ()");
    }

    proptest! {
        #[test]
        fn sql_name_is_deterministic_lowercase(name in "[A-Za-z][A-Za-z0-9]{0,20}") {
            let once = to_sql_name(&name);
            prop_assert_eq!(&once, &to_sql_name(&name));
            prop_assert!(!once.chars().any(char::is_uppercase));
            prop_assert_eq!(once.replace('_', ""), name.to_lowercase());
            prop_assert!(!once.starts_with('_'));
        }

        #[test]
        fn snake_case_names_are_fixed_points(name in "[a-z][a-z0-9_]{0,20}") {
            prop_assert_eq!(to_sql_name(&name), name);
        }
    }
}
