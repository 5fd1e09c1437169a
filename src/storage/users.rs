use crate::storage::database::{current_timestamp_millis, Database};
use crate::storage::errors::{Result, StorageError};
use crate::storage::models::{NewUser, User};
use rusqlite::{named_params, OptionalExtension, Row};

impl Database {
    /// Insert the user unless the public key is already registered.
    /// Returns whether a row was created.
    pub fn create_user(&self, user: &NewUser) -> Result<bool> {
        self.with_connection(|conn| {
            let inserted = conn.execute(
                r#"
                INSERT OR IGNORE INTO users (
                    first_name, last_name, active, rating, public_key, created_at
                ) VALUES (
                    :first_name, :last_name, :active, :rating, :public_key, :created_at
                )
                "#,
                named_params! {
                    ":first_name": user.first_name,
                    ":last_name": user.last_name,
                    ":active": user.active,
                    ":rating": user.rating,
                    ":public_key": user.public_key,
                    ":created_at": current_timestamp_millis(),
                },
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn user_exists(&self, public_key: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT 1 FROM users WHERE public_key = ?1")?;
            Ok(stmt.exists([public_key])?)
        })
    }

    pub fn user_id_by_key(&self, public_key: &str) -> Result<i64> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id FROM users WHERE public_key = ?1",
                [public_key],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::user_not_found(public_key))
        })
    }

    pub fn get_user(&self, player_id: i64) -> Result<User> {
        self.with_connection(|conn| {
            conn.query_row(
                r#"
                SELECT id, first_name, last_name, active, rating, public_key
                FROM users
                WHERE id = ?1
                "#,
                [player_id],
                user_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::user_not_found(player_id.to_string()))
        })
    }

    pub fn public_key_for_player(&self, player_id: i64) -> Result<String> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT public_key FROM users WHERE id = ?1",
                [player_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::user_not_found(player_id.to_string()))
        })
    }

    pub fn list_public_keys(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT public_key FROM users ORDER BY id")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(keys)
        })
    }
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        active: row.get("active")?,
        rating: row.get("rating")?,
        public_key: row.get("public_key")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(key: &str) -> NewUser {
        NewUser {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            active: true,
            rating: 1200,
            public_key: key.to_string(),
        }
    }

    #[test]
    fn test_create_user_is_idempotent_per_key() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_user(&new_user("key-a")).unwrap());
        assert!(!db.create_user(&new_user("key-a")).unwrap());

        assert!(db.user_exists("key-a").unwrap());
        assert!(!db.user_exists("key-b").unwrap());
        assert_eq!(db.list_public_keys().unwrap(), vec!["key-a"]);
    }

    #[test]
    fn test_lookups() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&new_user("key-a")).unwrap();
        db.create_user(&new_user("key-b")).unwrap();

        let id = db.user_id_by_key("key-b").unwrap();
        assert_eq!(db.public_key_for_player(id).unwrap(), "key-b");
        assert_eq!(db.get_user(id).unwrap().rating, 1200);

        assert!(matches!(
            db.user_id_by_key("missing"),
            Err(StorageError::UserNotFound(_))
        ));
        assert!(db.public_key_for_player(999).unwrap_err().is_not_found());
    }
}
