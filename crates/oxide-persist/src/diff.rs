//! Declared-versus-live schema comparison.
//!
//! [`diff_table`] is pure: it compares a [`TableDefinition`] with a
//! [`LiveSchema`] and records the discrepancies on the definition's field
//! and table flags. Running it twice on the same inputs gives the same
//! flags.

use serde::Serialize;

use crate::dialect::Dialect;
use crate::introspect::LiveSchema;
use crate::model::{index_name, FieldDefinition, TableDefinition, TableFlags};

/// Compares a definition with its live table and stores the result on it.
pub fn diff_table<D: Dialect + ?Sized>(
    table: &mut TableDefinition,
    live: &LiveSchema,
    dialect: &D,
) -> TableFlags {
    let mut flags = TableFlags::default();
    let table_name = table.sql_name().to_string();

    if live.is_absent() {
        for field in table.fields_mut() {
            field.reset();
        }
        flags.must_create = true;
        flags.must_reindex = table.fields().iter().any(FieldDefinition::wants_index);
        table.set_flags(flags);
        return flags;
    }

    for field in table.fields_mut() {
        field.reset();

        let Some(column) = live.column(&field.sql_name) else {
            flags.must_modify = true;
            if field.is_primary_key {
                // A key column cannot be added in place.
                flags.must_recreate = true;
            }
            if field.wants_index() {
                flags.must_reindex = true;
            }
            continue;
        };
        field.exists_in_db = true;

        let key_matches = !field.is_primary_key || column.primary_key;
        if key_matches && dialect.type_matches(field, &column.type_name) {
            field.type_matches_db = true;
        } else {
            flags.must_modify = true;
            flags.must_recreate = true;
        }

        let index = live.index(&index_name(&table_name, &field.sql_name));
        let index_matches = match index {
            None => !field.wants_index(),
            Some(ix) => field.wants_index() && ix.unique == field.is_unique,
        };
        if index_matches {
            field.index_matches_db = true;
        } else {
            flags.must_reindex = true;
        }
    }

    table.set_flags(flags);
    flags
}

/// Flags of every registered table after a diff pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    /// Table name and its flags, in registration order.
    pub tables: Vec<(String, TableFlags)>,
}

impl DiffReport {
    /// Returns `true` when no table needs migration.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.tables.iter().all(|(_, flags)| flags.is_up_to_date())
    }

    /// Returns the names of tables that need migration.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.tables
            .iter()
            .filter(|(_, flags)| !flags.is_up_to_date())
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySqlDialect, SqliteDialect};
    use crate::introspect::{ColumnFact, IndexFact};
    use crate::model::{FieldDescriptor, LogicalType};

    const PERSON: &[FieldDescriptor] = &[
        FieldDescriptor::new("id", LogicalType::Int64).auto_increment(),
        FieldDescriptor::new("name", LogicalType::Text).indexed(),
        FieldDescriptor::new("email", LogicalType::Text).unique(),
        FieldDescriptor::new("age", LogicalType::Int32),
    ];

    fn column(name: &str, type_name: &str, primary_key: bool) -> ColumnFact {
        ColumnFact {
            name: name.into(),
            type_name: type_name.into(),
            primary_key,
        }
    }

    fn index(name: &str, unique: bool) -> IndexFact {
        IndexFact {
            name: name.into(),
            unique,
        }
    }

    fn matching_live() -> LiveSchema {
        LiveSchema {
            table: "person".into(),
            columns: vec![
                column("id", "INTEGER", true),
                column("name", "TEXT", false),
                column("email", "TEXT", false),
                column("age", "INTEGER", false),
            ],
            indexes: vec![
                index("idx_person_name", false),
                index("idx_person_email", true),
            ],
        }
    }

    fn person() -> TableDefinition {
        TableDefinition::build("Person", PERSON, &SqliteDialect).unwrap()
    }

    #[test]
    fn absent_table_must_be_created() {
        let mut def = person();
        let flags = diff_table(&mut def, &LiveSchema::default(), &SqliteDialect);
        assert!(flags.must_create);
        assert!(flags.must_reindex);
        assert!(!flags.must_modify);
        assert!(def.fields().iter().all(|f| !f.exists_in_db));
        assert!(def.needs_migration());
    }

    #[test]
    fn matching_table_is_up_to_date() {
        let mut def = person();
        let flags = diff_table(&mut def, &matching_live(), &SqliteDialect);
        assert!(flags.is_up_to_date(), "{flags:?}");
        assert!(!flags.must_recreate);
        assert!(def
            .fields()
            .iter()
            .all(|f| f.exists_in_db && f.type_matches_db && f.index_matches_db));
    }

    #[test]
    fn missing_column_is_additive() {
        let mut live = matching_live();
        live.columns.retain(|c| c.name != "age");
        let mut def = person();
        let flags = diff_table(&mut def, &live, &SqliteDialect);
        assert!(flags.must_modify);
        assert!(!flags.must_recreate);
        assert!(!flags.must_reindex);
        assert!(!def.field("age").unwrap().exists_in_db);
    }

    #[test]
    fn missing_key_column_forces_rebuild() {
        let mut live = matching_live();
        live.columns.retain(|c| c.name != "id");
        let mut def = person();
        let flags = diff_table(&mut def, &live, &SqliteDialect);
        assert!(flags.must_modify && flags.must_recreate);
    }

    #[test]
    fn type_change_requires_recreate() {
        let mut live = matching_live();
        live.columns[3].type_name = "TEXT".into();
        let mut def = person();
        let flags = diff_table(&mut def, &live, &SqliteDialect);
        assert!(flags.must_modify && flags.must_recreate);
        assert!(!def.field("age").unwrap().type_matches_db);
        assert!(def.field("age").unwrap().exists_in_db);
    }

    #[test]
    fn index_discrepancies_request_reindex() {
        let mut live = matching_live();
        live.indexes = vec![
            index("idx_person_name", true),
            index("idx_person_age", false),
        ];
        let mut def = person();
        let flags = diff_table(&mut def, &live, &SqliteDialect);
        assert!(flags.must_reindex);
        assert!(!flags.must_modify);
        for name in ["name", "email", "age"] {
            assert!(!def.field(name).unwrap().index_matches_db, "{name}");
        }
        assert!(def.field("id").unwrap().index_matches_db);
    }

    #[test]
    fn diff_is_idempotent() {
        let mut live = matching_live();
        live.columns[1].type_name = "INTEGER".into();
        let mut def = person();
        let first = diff_table(&mut def, &live, &SqliteDialect);
        let snapshot = def.clone();
        let second = diff_table(&mut def, &live, &SqliteDialect);
        assert_eq!(first, second);
        assert_eq!(snapshot, def);
    }

    #[test]
    fn mysql_wider_varchar_still_matches() {
        let mut def = TableDefinition::build("Person", PERSON, &MySqlDialect).unwrap();
        let live = LiveSchema {
            table: "person".into(),
            columns: vec![
                column("id", "bigint(20)", true),
                column("name", "varchar(255)", false),
                column("email", "varchar(50)", false),
                column("age", "int(11)", false),
            ],
            indexes: matching_live().indexes,
        };
        let flags = diff_table(&mut def, &live, &MySqlDialect);
        assert!(flags.is_up_to_date(), "{flags:?}");
    }

    #[test]
    fn report_lists_pending_tables() {
        let report = DiffReport {
            tables: vec![
                ("a".into(), TableFlags::default()),
                (
                    "b".into(),
                    TableFlags {
                        must_reindex: true,
                        ..TableFlags::default()
                    },
                ),
            ],
        };
        assert!(!report.is_up_to_date());
        assert_eq!(report.pending().collect::<Vec<_>>(), ["b"]);
    }
}
