//! 컬렉션(테이블) 조작
//!
//! HTTP 계층이 쓰는 테이블 생성과 행 CRUD. 컬럼명은 카탈로그에서 읽은 목록으로만 허용하고
//! 값은 항상 파라미터로 바인딩한다. 여기서 일어난 쓰기는 설치된 트리거가 그대로 포착한다.

use crate::changelog::CHANGES_TABLE;
use crate::connection::SqliteConnection;
use crate::error::{CdcError, Result};
use crate::identifier;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Row};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::info;

/// 행 하나 (컬럼명 → 값)
pub type Document = Map<String, Value>;

/// 새 테이블의 기본 컬럼
pub const DEFAULT_COLUMNS: &[&str] = &["name"];

#[derive(Clone)]
pub struct Collections {
    db: SqliteConnection,
}

impl Collections {
    pub fn new(db: SqliteConnection) -> Self {
        Collections { db }
    }

    /// `(id INTEGER PRIMARY KEY, <col> TEXT, ...)` 테이블 생성 (이미 있으면 유지)
    pub fn create_table(&self, name: &str, columns: &[String]) -> Result<()> {
        check_collection_name(name)?;

        let mut defs = vec!["id INTEGER PRIMARY KEY".to_string()];
        let mut seen = vec!["id".to_string()];
        for column in columns {
            identifier::validate(column)?;
            if seen.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                continue;
            }
            defs.push(format!("\"{}\" TEXT", column));
            seen.push(column.clone());
        }

        self.db.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            name,
            defs.join(", ")
        ))?;

        info!("> Created table: {}", name);
        Ok(())
    }

    /// 행 추가, 새 rowid 반환
    pub fn insert(&self, table: &str, fields: &Document) -> Result<i64> {
        let (names, values) = self.bind_fields(table, fields)?;

        let sql = if names.is_empty() {
            format!("INSERT INTO \"{}\" DEFAULT VALUES", table)
        } else {
            format!(
                "INSERT INTO \"{}\" ({}) VALUES ({})",
                table,
                names.iter().map(|n| format!("\"{}\"", n)).collect::<Vec<_>>().join(", "),
                vec!["?"; names.len()].join(", ")
            )
        };

        let conn = self.db.lock();
        conn.execute(&sql, params_from_iter(values))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update(&self, table: &str, id: i64, fields: &Document) -> Result<()> {
        let (names, mut values) = self.bind_fields(table, fields)?;
        if names.is_empty() {
            return Err(CdcError::InvalidRequest("no fields to update".to_string()));
        }

        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE rowid = ?",
            table,
            names.iter().map(|n| format!("\"{}\" = ?", n)).collect::<Vec<_>>().join(", ")
        );
        values.push(SqlValue::Integer(id));

        let changed = self.db.lock().execute(&sql, params_from_iter(values))?;
        if changed == 0 {
            return Err(CdcError::NotFound(format!("{}/{}", table, id)));
        }
        Ok(())
    }

    pub fn delete(&self, table: &str, id: i64) -> Result<()> {
        self.columns(table)?;
        let changed = self
            .db
            .lock()
            .execute(&format!("DELETE FROM \"{}\" WHERE rowid = ?1", table), [id])?;
        if changed == 0 {
            return Err(CdcError::NotFound(format!("{}/{}", table, id)));
        }
        Ok(())
    }

    pub fn get(&self, table: &str, id: i64) -> Result<Document> {
        let columns = self.columns(table)?;
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\" WHERE rowid = ?1", table))?;
        let mut rows = stmt.query([id])?;
        let document = match rows.next()? {
            Some(row) => row_to_document(row, &columns)?,
            None => return Err(CdcError::NotFound(format!("{}/{}", table, id))),
        };
        Ok(document)
    }

    /// 행 목록. `filter`는 컬럼 = 값 동등 조건.
    pub fn list(&self, table: &str, filter: &HashMap<String, String>) -> Result<Vec<Document>> {
        let columns = self.columns(table)?;

        let mut clauses = Vec::new();
        let mut values = Vec::new();
        let mut keys: Vec<&String> = filter.keys().collect();
        keys.sort();
        for key in keys {
            if !columns.contains(key) {
                return Err(CdcError::InvalidRequest(format!("unknown column: {}", key)));
            }
            clauses.push(format!("\"{}\" = ?", key));
            values.push(filter[key].clone());
        }

        let mut sql = format!("SELECT * FROM \"{}\"", table);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY rowid");

        let conn = self.db.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(row_to_document(row, &columns)?);
        }
        Ok(documents)
    }

    /// 대상 테이블의 컬럼 목록 (허용 목록)
    fn columns(&self, table: &str) -> Result<Vec<String>> {
        check_collection_name(table)?;
        self.db.get_table_columns(table)
    }

    fn bind_fields(&self, table: &str, fields: &Document) -> Result<(Vec<String>, Vec<SqlValue>)> {
        let columns = self.columns(table)?;

        let mut names = Vec::with_capacity(fields.len());
        let mut values = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            if !columns.contains(key) {
                return Err(CdcError::InvalidRequest(format!("unknown column: {}", key)));
            }
            names.push(key.clone());
            values.push(json_to_sql(value));
        }
        Ok((names, values))
    }
}

fn check_collection_name(name: &str) -> Result<()> {
    identifier::validate(name)?;
    if name == CHANGES_TABLE || name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(CdcError::InvalidRequest(format!("reserved table name: {}", name)));
    }
    Ok(())
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn row_to_document(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<Document> {
    let mut doc = Map::new();
    for (i, name) in columns.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::from(n),
            ValueRef::Real(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::from(b.to_vec()),
        };
        doc.insert(name.clone(), value);
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> Collections {
        let collections = Collections::new(SqliteConnection::open_in_memory().unwrap());
        collections
            .create_table("users", &["name".to_string(), "email".to_string()])
            .unwrap();
        collections
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_create_table_is_idempotent() {
        let collections = setup();
        collections.create_table("users", &["name".to_string()]).unwrap();
        assert_eq!(
            collections.db.get_table_columns("users").unwrap(),
            vec!["id", "name", "email"]
        );
    }

    #[test]
    fn test_create_table_rejects_reserved_and_odd_names() {
        let collections = setup();
        assert!(collections.create_table("_changes", &[]).is_err());
        assert!(collections.create_table("sqlite_users", &[]).is_err());
        assert!(collections.create_table("users", &["bad col".to_string()]).is_err());
    }

    #[test]
    fn test_insert_get_update_delete() {
        let collections = setup();
        let id = collections
            .insert("users", &doc(json!({ "name": "John Doe" })))
            .unwrap();
        assert_eq!(id, 1);

        collections
            .update("users", id, &doc(json!({ "email": "john@example.com" })))
            .unwrap();
        assert_eq!(
            Value::Object(collections.get("users", id).unwrap()),
            json!({ "id": 1, "name": "John Doe", "email": "john@example.com" })
        );

        collections.delete("users", id).unwrap();
        assert!(matches!(collections.get("users", id), Err(CdcError::NotFound(_))));
        assert!(matches!(collections.delete("users", id), Err(CdcError::NotFound(_))));
    }

    #[test]
    fn test_insert_rejects_unknown_columns() {
        let collections = setup();
        let err = collections
            .insert("users", &doc(json!({ "name); DROP TABLE users; --": "x" })))
            .unwrap_err();
        assert!(matches!(err, CdcError::InvalidRequest(_)));
        assert!(matches!(
            collections.insert("missing", &Document::new()),
            Err(CdcError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_with_filter() {
        let collections = setup();
        for name in ["a", "b", "a"] {
            collections.insert("users", &doc(json!({ "name": name }))).unwrap();
        }

        assert_eq!(collections.list("users", &HashMap::new()).unwrap().len(), 3);

        let mut filter = HashMap::new();
        filter.insert("name".to_string(), "a".to_string());
        let ids: Vec<Value> = collections
            .list("users", &filter)
            .unwrap()
            .into_iter()
            .map(|d| d["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(1), json!(3)]);

        filter.insert("nope".to_string(), "a".to_string());
        assert!(collections.list("users", &filter).is_err());
    }

    #[test]
    fn test_update_without_fields() {
        let collections = setup();
        assert!(matches!(
            collections.update("users", 1, &Document::new()),
            Err(CdcError::InvalidRequest(_))
        ));
    }
}
