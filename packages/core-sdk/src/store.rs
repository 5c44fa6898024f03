use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{
    collections::HashMap,
    path::Path,
    sync::Mutex,
    thread,
    time::Duration,
};

/**
 * \brief 简单的键值设置存储，值均为字符串。
 */
pub trait SettingsStore: Send + Sync {
    /** \brief 读取键值，不存在时返回 None。 */
    fn get(&self, key: &str) -> Result<Option<String>>;
    /** \brief 写入键值，已存在则覆盖。 */
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /** \brief 删除键，不存在时为空操作。 */
    fn remove(&self, key: &str) -> Result<()>;

    fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self.get(key)?.map(|s| s == "1").unwrap_or(default))
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set(key, if value { "1" } else { "0" })
    }
}

const TELEMETRY_KEY: &str = "telemetry_enabled";

/**
 * \brief 读取遥测开关。
 */
pub fn get_telemetry_enabled(store: &dyn SettingsStore) -> Result<bool> {
    store.get_bool(TELEMETRY_KEY, false)
}

/**
 * \brief 更新遥测开关。
 */
pub fn set_telemetry_enabled(store: &dyn SettingsStore, enabled: bool) -> Result<()> {
    store.set_bool(TELEMETRY_KEY, enabled)
}

/**
 * \brief 基于 SQLite `app_config` 表的设置存储。
 */
pub struct SqliteSettingsStore {
    conn: Mutex<Connection>,
}

impl SqliteSettingsStore {
    /**
     * \brief 打开默认数据库文件（`KINDERPEN_DB` 或本地目录下的 kinderpen.db）。
     */
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("KINDERPEN_DB").unwrap_or_else(|_| "kinderpen.db".to_string());
        Self::open(path)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, action: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("settings connection poisoned"))?;
        action(&guard)
    }
}

impl SettingsStore for SqliteSettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM app_config WHERE key=?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(Into::into)
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            retry_on_locked(|| {
                conn.execute(
                    "INSERT INTO app_config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                    params![key, value],
                )
            })?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            retry_on_locked(|| conn.execute("DELETE FROM app_config WHERE key=?1", params![key]))?;
            Ok(())
        })
    }
}

/**
 * \brief 运行数据库迁移，创建设置表。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

/**
 * \brief 进程内存中的设置存储，适合测试与临时会话。
 */
#[derive(Default)]
pub struct MemorySettingsStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("settings map poisoned"))
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并进行线性退避，最大尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    let mut attempt = 0;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                attempt += 1;
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
            Err(e) => return Err(e.into()),
        }
    }
}
