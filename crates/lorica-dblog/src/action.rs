//! The DBLog action union and its wire codec.
//!
//! The wire form is a JSON array of objects, each carrying a literal `type`
//! (`schema`, `set`, `delete`, `migrate`) plus `v`, `dblogindex`, and
//! `table`. Decoding inspects `type` first so an unrecognized action is
//! reported by name and position, and missing fields are reported with the
//! field name and position.

use serde::Serialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;

use crate::value::Value;
use crate::{DbLogError, Result};

/// One migration operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationOp {
    #[serde(rename_all = "camelCase")]
    AddColumn { column: String, column_type: String },
    #[serde(rename_all = "camelCase")]
    DropColumn { column: String },
    #[serde(rename_all = "camelCase")]
    RenameColumn { from: String, to: String },
    #[serde(rename_all = "camelCase")]
    RenameTable { to: String },
}

/// A versioned set of migration operations for one table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Migration {
    pub version: i64,
    pub operations: Vec<MigrationOp>,
}

/// A single DBLog action.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Schema {
        v: i64,
        dblogindex: i64,
        table: String,
        /// Column name → SQL type.
        columns: BTreeMap<String, String>,
    },
    Set {
        v: i64,
        dblogindex: i64,
        table: String,
        id: String,
        /// Column name → value.
        data: BTreeMap<String, Value>,
    },
    Delete {
        v: i64,
        dblogindex: i64,
        table: String,
        id: String,
    },
    Migrate {
        v: i64,
        dblogindex: i64,
        table: String,
        migration: Migration,
    },
}

impl Action {
    /// The action's position within its entry.
    pub fn dblogindex(&self) -> i64 {
        match self {
            Action::Schema { dblogindex, .. }
            | Action::Set { dblogindex, .. }
            | Action::Delete { dblogindex, .. }
            | Action::Migrate { dblogindex, .. } => *dblogindex,
        }
    }

    /// The table the action targets.
    pub fn table(&self) -> &str {
        match self {
            Action::Schema { table, .. }
            | Action::Set { table, .. }
            | Action::Delete { table, .. }
            | Action::Migrate { table, .. } => table,
        }
    }
}

/// Encode actions to the wire JSON array.
pub fn encode_actions(actions: &[Action]) -> Result<String> {
    serde_json::to_string(actions).map_err(|e| DbLogError::InvalidJson(e.to_string()))
}

/// Decode a wire JSON array of actions.
pub fn decode_actions(content: &str) -> Result<Vec<Action>> {
    let parsed: Json =
        serde_json::from_str(content).map_err(|e| DbLogError::InvalidJson(e.to_string()))?;
    let items = parsed.as_array().ok_or(DbLogError::NotAnArray)?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| decode_action(item, index))
        .collect()
}

fn decode_action(item: &Json, index: usize) -> Result<Action> {
    let name = field_str(item, "type", index)?;
    let v = field_i64(item, "v", index)?;
    let dblogindex = field_i64(item, "dblogindex", index)?;
    let table = field_str(item, "table", index)?.to_string();

    match name {
        "schema" => {
            let columns = field_object(item, "columns", index)?
                .iter()
                .map(|(column, ty)| {
                    ty.as_str()
                        .map(|ty| (column.clone(), ty.to_string()))
                        .ok_or_else(|| DbLogError::InvalidField {
                            field: format!("columns.{column}"),
                            index,
                            reason: "column type must be a string".into(),
                        })
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(Action::Schema {
                v,
                dblogindex,
                table,
                columns,
            })
        }
        "set" => {
            let id = field_str(item, "id", index)?.to_string();
            let data = field_object(item, "data", index)?
                .iter()
                .map(|(column, value)| (column.clone(), Value::from(value.clone())))
                .collect();
            Ok(Action::Set {
                v,
                dblogindex,
                table,
                id,
                data,
            })
        }
        "delete" => {
            let id = field_str(item, "id", index)?.to_string();
            Ok(Action::Delete {
                v,
                dblogindex,
                table,
                id,
            })
        }
        "migrate" => {
            let migration = field_value(item, "migration", index)?;
            Ok(Action::Migrate {
                v,
                dblogindex,
                table,
                migration: decode_migration(migration, index)?,
            })
        }
        other => Err(DbLogError::UnknownAction {
            name: other.to_string(),
            index,
        }),
    }
}

fn decode_migration(migration: &Json, index: usize) -> Result<Migration> {
    let version = field_i64(migration, "version", index)?;
    let operations = field_value(migration, "operations", index)?
        .as_array()
        .ok_or_else(|| DbLogError::InvalidField {
            field: "migration.operations".into(),
            index,
            reason: "must be an array".into(),
        })?
        .iter()
        .map(|op| decode_migration_op(op, index))
        .collect::<Result<Vec<_>>>()?;
    Ok(Migration {
        version,
        operations,
    })
}

fn decode_migration_op(op: &Json, index: usize) -> Result<MigrationOp> {
    match field_str(op, "type", index)? {
        "add_column" => Ok(MigrationOp::AddColumn {
            column: field_str(op, "column", index)?.to_string(),
            column_type: field_str(op, "columnType", index)?.to_string(),
        }),
        "drop_column" => Ok(MigrationOp::DropColumn {
            column: field_str(op, "column", index)?.to_string(),
        }),
        "rename_column" => Ok(MigrationOp::RenameColumn {
            from: field_str(op, "from", index)?.to_string(),
            to: field_str(op, "to", index)?.to_string(),
        }),
        "rename_table" => Ok(MigrationOp::RenameTable {
            to: field_str(op, "to", index)?.to_string(),
        }),
        other => Err(DbLogError::UnknownAction {
            name: format!("migration op {other}"),
            index,
        }),
    }
}

fn field_value<'a>(item: &'a Json, field: &str, index: usize) -> Result<&'a Json> {
    item.get(field).ok_or_else(|| DbLogError::MissingField {
        field: field.to_string(),
        index,
    })
}

fn field_str<'a>(item: &'a Json, field: &str, index: usize) -> Result<&'a str> {
    field_value(item, field, index)?
        .as_str()
        .ok_or_else(|| DbLogError::InvalidField {
            field: field.to_string(),
            index,
            reason: "must be a string".into(),
        })
}

fn field_i64(item: &Json, field: &str, index: usize) -> Result<i64> {
    field_value(item, field, index)?
        .as_i64()
        .ok_or_else(|| DbLogError::InvalidField {
            field: field.to_string(),
            index,
            reason: "must be an integer".into(),
        })
}

fn field_object<'a>(
    item: &'a Json,
    field: &str,
    index: usize,
) -> Result<&'a serde_json::Map<String, Json>> {
    field_value(item, field, index)?
        .as_object()
        .ok_or_else(|| DbLogError::InvalidField {
            field: field.to_string(),
            index,
            reason: "must be an object".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_schema_set_delete() {
        let content = r#"[
            {"type":"schema","v":1,"dblogindex":0,"table":"t",
             "columns":{"id":"TEXT PRIMARY KEY","v":"TEXT"}},
            {"type":"set","v":1,"dblogindex":1,"table":"t","id":"x",
             "data":{"v":"1"}},
            {"type":"delete","v":1,"dblogindex":2,"table":"t","id":"x"}
        ]"#;
        let actions = decode_actions(content).expect("decode");
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].dblogindex(), 0);
        assert_eq!(actions[2].table(), "t");

        match &actions[1] {
            Action::Set { id, data, .. } => {
                assert_eq!(id, "x");
                assert_eq!(data.get("v"), Some(&Value::Text("1".into())));
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_decode_migrate() {
        let content = r#"[
            {"type":"migrate","v":1,"dblogindex":0,"table":"t","migration":{
                "version":2,
                "operations":[
                    {"type":"add_column","column":"w","columnType":"INTEGER"},
                    {"type":"rename_column","from":"a","to":"b"},
                    {"type":"rename_table","to":"t2"}
                ]}}
        ]"#;
        let actions = decode_actions(content).expect("decode");
        match &actions[0] {
            Action::Migrate { migration, .. } => {
                assert_eq!(migration.version, 2);
                assert_eq!(migration.operations.len(), 3);
                assert_eq!(
                    migration.operations[0],
                    MigrationOp::AddColumn {
                        column: "w".into(),
                        column_type: "INTEGER".into()
                    }
                );
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_named() {
        let content = r#"[{"type":"truncate","v":1,"dblogindex":0,"table":"t"}]"#;
        match decode_actions(content) {
            Err(DbLogError::UnknownAction { name, index }) => {
                assert_eq!(name, "truncate");
                assert_eq!(index, 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_field_named() {
        let content = r#"[
            {"type":"set","v":1,"dblogindex":0,"table":"t","id":"x","data":{}},
            {"type":"set","v":1,"dblogindex":1,"table":"t","data":{}}
        ]"#;
        match decode_actions(content) {
            Err(DbLogError::MissingField { field, index }) => {
                assert_eq!(field, "id");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_json_and_shape() {
        assert!(matches!(
            decode_actions("not json"),
            Err(DbLogError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_actions(r#"{"type":"set"}"#),
            Err(DbLogError::NotAnArray)
        ));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let actions = vec![
            Action::Schema {
                v: 1,
                dblogindex: 0,
                table: "notes".into(),
                columns: BTreeMap::from([
                    ("id".to_string(), "TEXT PRIMARY KEY".to_string()),
                    ("body".to_string(), "TEXT".to_string()),
                ]),
            },
            Action::Set {
                v: 1,
                dblogindex: 1,
                table: "notes".into(),
                id: "n1".into(),
                data: BTreeMap::from([
                    ("body".to_string(), Value::Text("hello".into())),
                    ("stars".to_string(), Value::Int(4)),
                ]),
            },
        ];
        let encoded = encode_actions(&actions).expect("encode");
        let decoded = decode_actions(&encoded).expect("decode");
        assert_eq!(decoded, actions);
    }

    #[test]
    fn test_empty_array() {
        assert!(decode_actions("[]").expect("decode").is_empty());
    }
}
