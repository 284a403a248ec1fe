/// A schema step applied when a SQLite store is opened.
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

pub const STORAGE_SCHEMA_V1: Migration = Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS list_store (
            key TEXT NOT NULL,
            position INTEGER NOT NULL,
            value TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (key, position)
        );",
};

pub const MIGRATIONS: &[Migration] = &[STORAGE_SCHEMA_V1];
