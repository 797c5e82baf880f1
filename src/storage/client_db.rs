use rusqlite::{OptionalExtension, Result as SqlResult, params};
use std::path::Path;

use super::database::Database;
use super::models::Identity;
use crate::common::UserId;

/// Local client state. Only the signed-in identity is persisted; chat
/// content always comes from the backend.
pub struct ClientDatabase {
    db: Database,
}

impl ClientDatabase {
    /// Initialize client database at custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        Self::from_database(Database::new(path)?)
    }

    #[cfg(test)]
    pub fn in_memory() -> SqlResult<Self> {
        Self::from_database(Database::in_memory()?)
    }

    fn from_database(db: Database) -> SqlResult<Self> {
        let client_db = Self { db };
        client_db.init_schema()?;
        Ok(client_db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        // Identity table (single row)
        self.db.connection().execute(
            "CREATE TABLE IF NOT EXISTS identity (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                user_id TEXT NOT NULL,
                display_name TEXT,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;
        Ok(())
    }

    /// Save identity (replace if exists). `created_at` is kept when the same
    /// user signs in again.
    pub fn save_identity(&self, user_id: &UserId, display_name: Option<&str>) -> SqlResult<()> {
        let conn = self.db.connection();
        conn.execute(
            "INSERT OR REPLACE INTO identity (id, user_id, display_name, created_at)
             VALUES (1, ?1, ?2, COALESCE(
                 (SELECT created_at FROM identity WHERE id = 1 AND user_id = ?1),
                 strftime('%s', 'now')))",
            params![user_id.as_str(), display_name],
        )?;
        Ok(())
    }

    pub fn load_identity(&self) -> SqlResult<Option<Identity>> {
        let conn = self.db.connection();
        let mut stmt =
            conn.prepare("SELECT user_id, display_name, created_at FROM identity WHERE id = 1")?;

        stmt.query_row([], |row| {
            Ok(Identity {
                user_id: UserId::new(row.get::<_, String>(0)?),
                display_name: row.get(1)?,
                created_at: row.get(2)?,
            })
        })
        .optional()
    }

    /// Returns whether an identity was stored.
    pub fn clear_identity(&self) -> SqlResult<bool> {
        let removed = self
            .db
            .connection()
            .execute("DELETE FROM identity WHERE id = 1", [])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_has_no_identity() {
        let db = ClientDatabase::in_memory().unwrap();

        assert_eq!(db.load_identity().unwrap(), None);
        assert!(!db.clear_identity().unwrap());
    }

    #[test]
    fn save_replaces_the_single_identity_row() {
        let db = ClientDatabase::in_memory().unwrap();

        db.save_identity(&"7".into(), None).unwrap();
        db.save_identity(&"42".into(), Some("Asha")).unwrap();

        let identity = db.load_identity().unwrap().unwrap();
        assert_eq!(identity.user_id, UserId::new("42"));
        assert_eq!(identity.display_name.as_deref(), Some("Asha"));
        let rows: i64 = db
            .db
            .connection()
            .query_row("SELECT COUNT(*) FROM identity", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn same_user_keeps_original_created_at() {
        let db = ClientDatabase::in_memory().unwrap();
        db.save_identity(&"7".into(), None).unwrap();
        db.db
            .connection()
            .execute("UPDATE identity SET created_at = 1000", [])
            .unwrap();

        db.save_identity(&"7".into(), Some("Bo")).unwrap();

        assert_eq!(db.load_identity().unwrap().unwrap().created_at, 1000);
    }

    #[test]
    fn clear_removes_identity() {
        let db = ClientDatabase::in_memory().unwrap();
        db.save_identity(&"7".into(), None).unwrap();

        assert!(db.clear_identity().unwrap());
        assert_eq!(db.load_identity().unwrap(), None);
    }
}
