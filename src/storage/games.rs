use crate::storage::database::{current_timestamp_millis, Database};
use crate::storage::errors::{Result, StorageError};
use crate::storage::models::{GameRecord, Seat, OPEN_SEAT};
use rusqlite::{named_params, Connection, OptionalExtension, Row};

impl Database {
    /// Create a game with an empty move history. Both timestamps start at now.
    pub fn create_game(&self, game_id: &str, white_id: i64, black: Seat) -> Result<()> {
        let now = current_timestamp_millis();
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO games (
                    id, white_id, black_id, position, last_move_time, created_at
                ) VALUES (
                    :id, :white_id, :black_id, '', :now, :now
                )
                "#,
                named_params! {
                    ":id": game_id,
                    ":white_id": white_id,
                    ":black_id": black.to_column(),
                    ":now": now,
                },
            )?;
            Ok(())
        })
    }

    pub fn game_exists(&self, game_id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT 1 FROM games WHERE id = ?1")?;
            Ok(stmt.exists([game_id])?)
        })
    }

    pub fn get_game(&self, game_id: &str) -> Result<GameRecord> {
        self.with_connection(|conn| {
            conn.query_row(
                r#"
                SELECT id, white_id, black_id, position, last_move_time, created_at, result
                FROM games
                WHERE id = ?1
                "#,
                [game_id],
                game_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::game_not_found(game_id))
        })
    }

    /// Take the open black seat of a game
    pub fn join_game(&self, game_id: &str, player_id: i64) -> Result<()> {
        self.with_transaction(|conn| {
            let updated = conn.execute(
                "UPDATE games SET black_id = ?1 WHERE id = ?2 AND black_id = ?3",
                (player_id, game_id, OPEN_SEAT),
            )?;
            if updated == 1 {
                return Ok(());
            }
            if row_exists(conn, game_id)? {
                Err(StorageError::GameNotOpen(game_id.to_string()))
            } else {
                Err(StorageError::game_not_found(game_id))
            }
        })
    }

    /// Games still waiting for a black player, oldest first
    pub fn list_open_games(&self) -> Result<Vec<String>> {
        self.query_ids(
            "SELECT id FROM games WHERE black_id = ?1 AND result IS NULL ORDER BY created_at, id",
            [OPEN_SEAT],
        )
    }

    pub fn list_all_games(&self) -> Result<Vec<String>> {
        self.query_ids("SELECT id FROM games ORDER BY created_at, id", [])
    }

    pub fn list_games_for_player(&self, player_id: i64) -> Result<Vec<String>> {
        self.query_ids(
            r#"
            SELECT id FROM games
            WHERE white_id = ?1 OR black_id = ?1
            ORDER BY last_move_time DESC, created_at DESC
            "#,
            [player_id],
        )
    }

    pub fn get_position(&self, game_id: &str) -> Result<String> {
        self.game_column(game_id, "SELECT position FROM games WHERE id = ?1")
    }

    /// Store a new move history. The last-move time always moves forward,
    /// even for two writes within the same millisecond.
    pub fn set_position(&self, game_id: &str, position: &str) -> Result<i64> {
        let now = current_timestamp_millis();
        self.with_connection(|conn| {
            conn.query_row(
                r#"
                UPDATE games
                SET position = :position,
                    last_move_time = MAX(:now, last_move_time + 1)
                WHERE id = :id
                RETURNING last_move_time
                "#,
                named_params! {
                    ":position": position,
                    ":now": now,
                    ":id": game_id,
                },
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::game_not_found(game_id))
        })
    }

    pub fn get_last_move_time(&self, game_id: &str) -> Result<i64> {
        self.game_column(game_id, "SELECT last_move_time FROM games WHERE id = ?1")
    }

    /// The unfinished game the player touched last
    pub fn find_recent_game_for_player(&self, player_id: i64) -> Result<String> {
        self.with_connection(|conn| {
            conn.query_row(
                r#"
                SELECT id FROM games
                WHERE (white_id = ?1 OR black_id = ?1) AND result IS NULL
                ORDER BY last_move_time DESC, created_at DESC
                LIMIT 1
                "#,
                [player_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::game_not_found(format!("no active game for player {}", player_id)))
        })
    }

    pub fn white_id(&self, game_id: &str) -> Result<i64> {
        self.game_column(game_id, "SELECT white_id FROM games WHERE id = ?1")
    }

    pub fn black_seat(&self, game_id: &str) -> Result<Seat> {
        self.game_column(game_id, "SELECT black_id FROM games WHERE id = ?1")
            .map(Seat::from_column)
    }

    pub fn record_result(&self, game_id: &str, result: &str) -> Result<()> {
        self.with_connection(|conn| {
            let rows_affected = conn.execute(
                "UPDATE games SET result = ?1 WHERE id = ?2",
                (result, game_id),
            )?;

            if rows_affected == 0 {
                return Err(StorageError::game_not_found(game_id));
            }

            Ok(())
        })
    }

    fn game_column<T: rusqlite::types::FromSql>(&self, game_id: &str, sql: &str) -> Result<T> {
        self.with_connection(|conn| {
            conn.query_row(sql, [game_id], |row| row.get(0))
                .optional()?
                .ok_or_else(|| StorageError::game_not_found(game_id))
        })
    }

    fn query_ids<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let ids = stmt
                .query_map(params, |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }
}

fn row_exists(conn: &Connection, game_id: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM games WHERE id = ?1")?;
    Ok(stmt.exists([game_id])?)
}

/// Convert a database row to a GameRecord
fn game_from_row(row: &Row) -> rusqlite::Result<GameRecord> {
    Ok(GameRecord {
        id: row.get("id")?,
        white_id: row.get("white_id")?,
        black: Seat::from_column(row.get("black_id")?),
        position: row.get("position")?,
        last_move_time: row.get("last_move_time")?,
        created_at: row.get("created_at")?,
        result: row.get("result")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::NewUser;

    fn db_with_users(keys: &[&str]) -> (Database, Vec<i64>) {
        let db = Database::open_in_memory().unwrap();
        let ids = keys
            .iter()
            .map(|key| {
                db.create_user(&NewUser {
                    first_name: "Test".to_string(),
                    last_name: "Player".to_string(),
                    active: true,
                    rating: 1000,
                    public_key: key.to_string(),
                })
                .unwrap();
                db.user_id_by_key(key).unwrap()
            })
            .collect();
        (db, ids)
    }

    #[test]
    fn test_create_and_join() {
        let (db, ids) = db_with_users(&["white", "black"]);
        db.create_game("g1", ids[0], Seat::Open).unwrap();

        assert!(db.game_exists("g1").unwrap());
        assert_eq!(db.list_open_games().unwrap(), vec!["g1"]);

        db.join_game("g1", ids[1]).unwrap();
        assert_eq!(db.black_seat("g1").unwrap(), Seat::Player(ids[1]));
        assert!(db.list_open_games().unwrap().is_empty());

        assert!(matches!(
            db.join_game("g1", ids[1]),
            Err(StorageError::GameNotOpen(_))
        ));
        assert!(matches!(
            db.join_game("missing", ids[1]),
            Err(StorageError::GameNotFound(_))
        ));
    }

    #[test]
    fn test_automated_games_are_not_open() {
        let (db, ids) = db_with_users(&["white"]);
        db.create_game("solo", ids[0], Seat::Automated).unwrap();
        assert!(db.list_open_games().unwrap().is_empty());
        assert_eq!(db.list_all_games().unwrap(), vec!["solo"]);
        assert_eq!(db.black_seat("solo").unwrap(), Seat::Automated);
    }

    #[test]
    fn test_set_position_advances_move_time() {
        let (db, ids) = db_with_users(&["white"]);
        db.create_game("g1", ids[0], Seat::Automated).unwrap();
        let created = db.get_last_move_time("g1").unwrap();

        let first = db.set_position("g1", "e4").unwrap();
        let second = db.set_position("g1", "e4 e5").unwrap();
        assert!(first > created);
        assert!(second > first);
        assert_eq!(db.get_position("g1").unwrap(), "e4 e5");
        assert_eq!(db.get_last_move_time("g1").unwrap(), second);
    }

    #[test]
    fn test_recent_game_skips_finished_games() {
        let (db, ids) = db_with_users(&["white"]);
        db.create_game("old", ids[0], Seat::Automated).unwrap();
        db.create_game("new", ids[0], Seat::Automated).unwrap();
        db.set_position("new", "e4").unwrap();

        assert_eq!(db.find_recent_game_for_player(ids[0]).unwrap(), "new");

        db.record_result("new", "1-0").unwrap();
        assert_eq!(db.find_recent_game_for_player(ids[0]).unwrap(), "old");
        assert_eq!(db.get_game("new").unwrap().result.as_deref(), Some("1-0"));

        db.record_result("old", "0-1").unwrap();
        assert!(db.find_recent_game_for_player(ids[0]).unwrap_err().is_not_found());
    }

    #[test]
    fn test_player_game_listing_and_lookups() {
        let (db, ids) = db_with_users(&["a", "b", "c"]);
        db.create_game("g1", ids[0], Seat::Open).unwrap();
        db.join_game("g1", ids[1]).unwrap();
        db.create_game("g2", ids[2], Seat::Automated).unwrap();

        assert_eq!(db.list_games_for_player(ids[1]).unwrap(), vec!["g1"]);
        assert_eq!(db.white_id("g1").unwrap(), ids[0]);
        assert!(db.list_games_for_player(ids[2]).unwrap().contains(&"g2".to_string()));
        assert!(db.get_position("nope").unwrap_err().is_not_found());
    }
}
