use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use empre_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Directory entry for a user, as far as chat needs it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub name: String,
    pub profile_picture_url: String,
    pub created_at: String,
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, profile_picture_url))]
    pub fn create(&self, name: &str, profile_picture_url: &str) -> Result<UserRow, StoreError> {
        let id = UserId::new();
        let now = row_helpers::format_ts(&Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, profile_picture_url, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.to_db(), name, profile_picture_url, now],
            )?;
            Ok(UserRow {
                id,
                name: name.to_string(),
                profile_picture_url: profile_picture_url.to_string(),
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, profile_picture_url, created_at FROM users WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.to_db()])?;
            match rows.next()? {
                Some(row) => Ok(UserRow {
                    id: row_helpers::get_id(row, 0, "users", "id")?,
                    name: row_helpers::get(row, 1, "users", "name")?,
                    profile_picture_url: row_helpers::get(row, 2, "users", "profile_picture_url")?,
                    created_at: row_helpers::get(row, 3, "users", "created_at")?,
                }),
                None => Err(StoreError::NotFound(format!("user {id}"))),
            }
        })
    }
}
