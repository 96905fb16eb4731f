//! SQLite 데이터베이스 연결 관리 및 스키마 조회

use crate::changelog::CHANGES_TABLE;
use crate::error::{CdcError, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// SQLite 연결 설정
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// 데이터베이스 파일 경로 (":memory:"는 인메모리)
    pub path: String,
    /// 잠금 대기 시간
    pub busy_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            path: "./thunderbase.db".to_string(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    pub fn new(path: impl Into<String>) -> Self {
        ConnectionConfig {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

/// 공유 SQLite 연결 래퍼
///
/// 로그 컨슈머와 HTTP 요청 처리가 같은 연결을 공유한다. 트리거는 쓰기 트랜잭션 안에서
/// 동기적으로 실행되므로 별도의 애플리케이션 레벨 잠금은 두지 않는다.
#[derive(Clone)]
pub struct SqliteConnection {
    conn: Arc<Mutex<Connection>>,
    config: ConnectionConfig,
}

impl SqliteConnection {
    pub fn open(config: ConnectionConfig) -> Result<Self> {
        let conn = if config.is_in_memory() {
            Connection::open_in_memory()
        } else {
            Connection::open(&config.path)
        }
        .map_err(|e| {
            CdcError::ConnectionError(format!("Failed to open {}: {}", config.path, e))
        })?;

        conn.busy_timeout(config.busy_timeout)
            .map_err(|e| CdcError::ConnectionError(format!("Failed to set busy timeout: {}", e)))?;

        debug!("Opened SQLite database at {}", config.path);

        Ok(SqliteConnection {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(ConnectionConfig::in_memory())
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// 연결 잠금 획득 (await 지점을 넘겨 보유하지 말 것)
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// 여러 문장을 한 번에 실행
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock().execute_batch(sql)?;
        Ok(())
    }

    /// 추적 대상 테이블 목록 (변경 로그 테이블과 sqlite_ 시스템 테이블 제외, 생성 순서)
    ///
    /// 테이블은 실행 중에도 추가되므로 매 호출마다 카탈로그를 다시 읽는다.
    pub fn get_tables(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
                 AND name != ?1 \
                 ORDER BY rowid",
            )
            .map_err(|e| CdcError::SchemaError(format!("Failed to query tables: {}", e)))?;

        let tables = stmt
            .query_map([CHANGES_TABLE], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| CdcError::SchemaError(format!("Failed to read tables: {}", e)))?;

        Ok(tables)
    }

    /// 테이블 스키마 조회
    pub fn get_table_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT name, type, \"notnull\", dflt_value, pk \
                 FROM pragma_table_info(?1) \
                 ORDER BY cid",
            )
            .map_err(|e| CdcError::SchemaError(format!("Failed to query table schema: {}", e)))?;

        let columns = stmt
            .query_map([table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    column_type: row.get(1)?,
                    nullable: row.get::<_, i64>(2)? == 0,
                    default_value: row.get(3)?,
                    primary_key: row.get::<_, i64>(4)? as u32,
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| {
                CdcError::SchemaError(format!("Failed to read schema of {}: {}", table, e))
            })?;

        if columns.is_empty() {
            return Err(CdcError::NotFound(format!("table {}", table)));
        }

        Ok(columns)
    }

    /// 테이블 컬럼명 목록 (선언 순서)
    pub fn get_table_columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .get_table_schema(table)?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    /// rowid 테이블 여부. `WITHOUT ROWID` 테이블이면 false.
    pub fn has_rowid(&self, table: &str) -> Result<bool> {
        let conn = self.lock();
        let without_rowid: Option<i64> = conn
            .query_row(
                "SELECT wr FROM pragma_table_list WHERE schema = 'main' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(without_rowid.unwrap_or(0) == 0)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// 테이블 컬럼 정보
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    /// 기본키 내 위치 (1부터, 기본키가 아니면 0)
    pub primary_key: u32,
}

impl ColumnInfo {
    pub fn is_key(&self) -> bool {
        self.primary_key > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SqliteConnection {
        let db = SqliteConnection::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);
             CREATE TABLE _changes (id INTEGER PRIMARY KEY AUTOINCREMENT, collection TEXT);
             CREATE TABLE posts (title TEXT);",
        )
        .unwrap();
        db
    }

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.path, "./thunderbase.db");
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_get_tables_excludes_changelog_and_system() {
        let db = setup();
        // AUTOINCREMENT가 sqlite_sequence를 만든다
        assert_eq!(db.get_tables().unwrap(), vec!["users", "posts"]);
    }

    #[test]
    fn test_get_tables_keeps_sqlite_like_user_tables() {
        let db = setup();
        db.execute_batch("CREATE TABLE sqliteXdata (id INTEGER PRIMARY KEY)").unwrap();
        assert_eq!(db.get_tables().unwrap(), vec!["users", "posts", "sqliteXdata"]);
    }

    #[test]
    fn test_has_rowid() {
        let db = setup();
        db.execute_batch("CREATE TABLE tags (code TEXT PRIMARY KEY) WITHOUT ROWID").unwrap();
        assert!(db.has_rowid("posts").unwrap());
        assert!(!db.has_rowid("tags").unwrap());
    }

    #[test]
    fn test_get_tables_reflects_new_tables() {
        let db = setup();
        db.execute_batch("CREATE TABLE orders (id INTEGER PRIMARY KEY)").unwrap();
        assert!(db.get_tables().unwrap().contains(&"orders".to_string()));
    }

    #[test]
    fn test_get_table_schema() {
        let db = setup();
        let schema = db.get_table_schema("users").unwrap();
        assert_eq!(schema.len(), 3);
        assert!(schema[0].is_key());
        assert_eq!(schema[1].name, "name");
        assert!(!schema[1].nullable);
        assert!(schema[2].nullable);
        assert_eq!(db.get_table_columns("posts").unwrap(), vec!["title"]);
    }

    #[test]
    fn test_get_table_schema_missing_table() {
        let db = setup();
        assert!(matches!(
            db.get_table_schema("nope"),
            Err(CdcError::NotFound(_))
        ));
        assert!(!db.table_exists("nope").unwrap());
        assert!(db.has_rowid("users").unwrap());
        assert!(db.table_exists("users").unwrap());
    }
}
