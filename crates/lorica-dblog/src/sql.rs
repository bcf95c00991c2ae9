//! Pure translation from actions to parameterized SQL.
//!
//! Column ordering is fixed (`id` first, remaining columns alphabetical)
//! so the same action stream emits byte-identical statements everywhere.
//! Identifiers are validated, then double-quoted; values always bind
//! through `?` placeholders.

use lorica_crypto::hex::{is_valid_identifier, quote_identifier};

use crate::action::{Action, Migration, MigrationOp};
use crate::value::Value;
use crate::{DbLogError, Result};

/// One parameterized statement.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlStatement {
    fn bare(sql: String) -> Self {
        Self {
            sql,
            params: Vec::new(),
        }
    }

    /// The statement with literals substituted, for diagnostics only.
    pub fn display(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut params = self.params.iter();
        for ch in self.sql.chars() {
            if ch == '?' {
                match params.next() {
                    Some(value) => out.push_str(&value.sql_literal()),
                    None => out.push(ch),
                }
            } else {
                out.push(ch);
            }
        }
        out
    }
}

fn checked_identifier(name: &str) -> Result<String> {
    if !is_valid_identifier(name) {
        return Err(DbLogError::InvalidIdentifier(name.to_string()));
    }
    Ok(quote_identifier(name))
}

/// `id` first, then the remaining names alphabetically.
fn ordered_columns<'a>(names: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut rest: Vec<&str> = names.filter(|n| *n != "id").collect();
    rest.sort_unstable();
    let mut out = Vec::with_capacity(rest.len() + 1);
    out.push("id");
    out.extend(rest);
    out
}

/// Translate a `Schema` action.
pub fn translate_schema(
    table: &str,
    columns: &std::collections::BTreeMap<String, String>,
) -> Result<SqlStatement> {
    let quoted_table = checked_identifier(table)?;
    let mut defs = Vec::with_capacity(columns.len() + 1);
    for name in ordered_columns(columns.keys().map(String::as_str)) {
        match columns.get(name) {
            Some(column_type) => {
                defs.push(format!("{} {}", checked_identifier(name)?, column_type));
            }
            // Only "id" can be absent from the map; tables always get one.
            None => defs.push(format!("{} TEXT PRIMARY KEY", quote_identifier("id"))),
        }
    }
    Ok(SqlStatement::bare(format!(
        "CREATE TABLE IF NOT EXISTS {quoted_table} ({})",
        defs.join(", ")
    )))
}

/// Translate a `Set` action into an upsert.
pub fn translate_set(
    table: &str,
    id: &str,
    data: &std::collections::BTreeMap<String, Value>,
) -> Result<SqlStatement> {
    let quoted_table = checked_identifier(table)?;

    // BTreeMap iteration keeps the remaining columns alphabetical.
    let mut quoted_names = vec![quote_identifier("id")];
    let mut params: Vec<Value> = vec![Value::Text(id.to_string())];
    for (column, value) in data {
        if column == "id" {
            continue;
        }
        quoted_names.push(checked_identifier(column)?);
        params.push(value.clone());
    }
    let placeholders = vec!["?"; quoted_names.len()].join(", ");

    Ok(SqlStatement {
        sql: format!(
            "INSERT OR REPLACE INTO {quoted_table} ({}) VALUES ({placeholders})",
            quoted_names.join(", ")
        ),
        params,
    })
}

/// Translate a `Delete` action.
pub fn translate_delete(table: &str, id: &str) -> Result<SqlStatement> {
    let quoted_table = checked_identifier(table)?;
    Ok(SqlStatement {
        sql: format!("DELETE FROM {quoted_table} WHERE id = ?"),
        params: vec![Value::Text(id.to_string())],
    })
}

/// Translate a `Migrate` action, one statement per operation.
pub fn translate_migration(table: &str, migration: &Migration) -> Result<Vec<SqlStatement>> {
    let quoted_table = checked_identifier(table)?;
    migration
        .operations
        .iter()
        .map(|op| {
            Ok(SqlStatement::bare(match op {
                MigrationOp::AddColumn {
                    column,
                    column_type,
                } => format!(
                    "ALTER TABLE {quoted_table} ADD COLUMN {} {column_type}",
                    checked_identifier(column)?
                ),
                MigrationOp::DropColumn { column } => format!(
                    "ALTER TABLE {quoted_table} DROP COLUMN {}",
                    checked_identifier(column)?
                ),
                MigrationOp::RenameColumn { from, to } => format!(
                    "ALTER TABLE {quoted_table} RENAME COLUMN {} TO {}",
                    checked_identifier(from)?,
                    checked_identifier(to)?
                ),
                MigrationOp::RenameTable { to } => format!(
                    "ALTER TABLE {quoted_table} RENAME TO {}",
                    checked_identifier(to)?
                ),
            }))
        })
        .collect()
}

/// Translate any non-migration action. Migrations go through
/// [`translate_migration`] so the caller can gate them on the stored
/// schema version.
pub fn translate(action: &Action) -> Result<Vec<SqlStatement>> {
    match action {
        Action::Schema { table, columns, .. } => Ok(vec![translate_schema(table, columns)?]),
        Action::Set {
            table, id, data, ..
        } => Ok(vec![translate_set(table, id, data)?]),
        Action::Delete { table, id, .. } => Ok(vec![translate_delete(table, id)?]),
        Action::Migrate {
            table, migration, ..
        } => translate_migration(table, migration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_schema_orders_id_first_then_alphabetical() {
        let columns = BTreeMap::from([
            ("zz".to_string(), "TEXT".to_string()),
            ("id".to_string(), "TEXT PRIMARY KEY".to_string()),
            ("aa".to_string(), "INTEGER".to_string()),
        ]);
        let stmt = translate_schema("t", &columns).expect("translate");
        assert_eq!(
            stmt.sql,
            r#"CREATE TABLE IF NOT EXISTS "t" ("id" TEXT PRIMARY KEY, "aa" INTEGER, "zz" TEXT)"#
        );
    }

    #[test]
    fn test_schema_without_id_column_gets_one() {
        let columns = BTreeMap::from([("name".to_string(), "TEXT".to_string())]);
        let stmt = translate_schema("t", &columns).expect("translate");
        assert_eq!(
            stmt.sql,
            r#"CREATE TABLE IF NOT EXISTS "t" ("id" TEXT PRIMARY KEY, "name" TEXT)"#
        );
    }

    #[test]
    fn test_set_sorts_keys_and_binds() {
        let data = BTreeMap::from([
            ("zz".to_string(), Value::Int(1)),
            ("aa".to_string(), Value::Text("x".into())),
        ]);
        let stmt = translate_set("t", "row1", &data).expect("translate");
        assert_eq!(
            stmt.sql,
            r#"INSERT OR REPLACE INTO "t" ("id", "aa", "zz") VALUES (?, ?, ?)"#
        );
        assert_eq!(
            stmt.params,
            vec![
                Value::Text("row1".into()),
                Value::Text("x".into()),
                Value::Int(1)
            ]
        );
    }

    #[test]
    fn test_set_ignores_id_in_data() {
        let data = BTreeMap::from([
            ("id".to_string(), Value::Text("evil".into())),
            ("v".to_string(), Value::Int(1)),
        ]);
        let stmt = translate_set("t", "row1", &data).expect("translate");
        assert_eq!(
            stmt.sql,
            r#"INSERT OR REPLACE INTO "t" ("id", "v") VALUES (?, ?)"#
        );
        assert_eq!(stmt.params[0], Value::Text("row1".into()));
    }

    #[test]
    fn test_delete() {
        let stmt = translate_delete("t", "row1").expect("translate");
        assert_eq!(stmt.sql, r#"DELETE FROM "t" WHERE id = ?"#);
        assert_eq!(stmt.params, vec![Value::Text("row1".into())]);
    }

    #[test]
    fn test_migration_statements() {
        let migration = Migration {
            version: 1,
            operations: vec![
                MigrationOp::AddColumn {
                    column: "w".into(),
                    column_type: "INTEGER".into(),
                },
                MigrationOp::DropColumn { column: "old".into() },
                MigrationOp::RenameColumn {
                    from: "a".into(),
                    to: "b".into(),
                },
                MigrationOp::RenameTable { to: "t2".into() },
            ],
        };
        let stmts = translate_migration("t", &migration).expect("translate");
        assert_eq!(
            stmts.iter().map(|s| s.sql.as_str()).collect::<Vec<_>>(),
            vec![
                r#"ALTER TABLE "t" ADD COLUMN "w" INTEGER"#,
                r#"ALTER TABLE "t" DROP COLUMN "old""#,
                r#"ALTER TABLE "t" RENAME COLUMN "a" TO "b""#,
                r#"ALTER TABLE "t" RENAME TO "t2""#,
            ]
        );
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        assert!(matches!(
            translate_delete("users; DROP TABLE users", "x"),
            Err(DbLogError::InvalidIdentifier(_))
        ));
        let data = BTreeMap::from([("bad name".to_string(), Value::Int(1))]);
        assert!(translate_set("t", "x", &data).is_err());
    }

    #[test]
    fn test_determinism() {
        let data = BTreeMap::from([
            ("b".to_string(), Value::Int(1)),
            ("a".to_string(), Value::Int(2)),
            ("c".to_string(), Value::Int(3)),
        ]);
        let first = translate_set("t", "x", &data).expect("translate");
        let second = translate_set("t", "x", &data).expect("translate");
        assert_eq!(first, second);
    }

    #[test]
    fn test_display_substitutes_literals() {
        let data = BTreeMap::from([("v".to_string(), Value::Text("o'clock".into()))]);
        let stmt = translate_set("t", "x", &data).expect("translate");
        assert_eq!(
            stmt.display(),
            r#"INSERT OR REPLACE INTO "t" ("id", "v") VALUES ('x', 'o''clock')"#
        );
    }
}
