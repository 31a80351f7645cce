use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use empre_core::ids::{EntityId, UserId};
use empre_core::{LedgerError, OwnershipResolver};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A business entity, reduced to what chat routing and inbox rendering need.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: EntityId,
    pub owner_id: UserId,
    pub name: String,
    pub profile_url: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct EntityRepo {
    db: Database,
}

impl EntityRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, profile_url), fields(owner_id = %owner_id))]
    pub fn create(
        &self,
        owner_id: &UserId,
        name: &str,
        profile_url: &str,
    ) -> Result<EntityRow, StoreError> {
        let id = EntityId::new();
        let now = row_helpers::format_ts(&Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entities (id, owner_id, name, profile_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id.to_db(), owner_id.to_db(), name, profile_url, now, now],
            )?;
            Ok(EntityRow {
                id,
                owner_id: *owner_id,
                name: name.to_string(),
                profile_url: profile_url.to_string(),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(entity_id = %id))]
    pub fn get(&self, id: &EntityId) -> Result<EntityRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, name, profile_url, created_at, updated_at
                 FROM entities WHERE id = ?1 AND deleted_at IS NULL",
            )?;
            let mut rows = stmt.query([id.to_db()])?;
            match rows.next()? {
                Some(row) => Ok(EntityRow {
                    id: row_helpers::get_id(row, 0, "entities", "id")?,
                    owner_id: row_helpers::get_id(row, 1, "entities", "owner_id")?,
                    name: row_helpers::get(row, 2, "entities", "name")?,
                    profile_url: row_helpers::get(row, 3, "entities", "profile_url")?,
                    created_at: row_helpers::get(row, 4, "entities", "created_at")?,
                    updated_at: row_helpers::get(row, 5, "entities", "updated_at")?,
                }),
                None => Err(StoreError::NotFound(format!("entity {id}"))),
            }
        })
    }

    /// Current owner of a live (not soft-deleted) entity.
    #[instrument(skip(self), fields(entity_id = %id))]
    pub fn owner(&self, id: &EntityId) -> Result<UserId, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT owner_id FROM entities WHERE id = ?1 AND deleted_at IS NULL")?;
            let mut rows = stmt.query([id.to_db()])?;
            match rows.next()? {
                Some(row) => row_helpers::get_id(row, 0, "entities", "owner_id"),
                None => Err(StoreError::NotFound(format!("entity {id}"))),
            }
        })
    }

    /// Hand the entity to a new owner. Existing conversations follow the
    /// entity, not the previous owner.
    #[instrument(skip(self), fields(entity_id = %id, new_owner = %new_owner))]
    pub fn transfer_ownership(&self, id: &EntityId, new_owner: &UserId) -> Result<(), StoreError> {
        let now = row_helpers::format_ts(&Utc::now());
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE entities SET owner_id = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
                rusqlite::params![new_owner.to_db(), now, id.to_db()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("entity {id}")));
        }
        info!(entity_id = %id, new_owner = %new_owner, "entity ownership transferred");
        Ok(())
    }

    #[instrument(skip(self), fields(entity_id = %id))]
    pub fn soft_delete(&self, id: &EntityId) -> Result<(), StoreError> {
        let now = row_helpers::format_ts(&Utc::now());
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE entities SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                rusqlite::params![now, id.to_db()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("entity {id}")));
        }
        Ok(())
    }
}

impl OwnershipResolver for EntityRepo {
    fn owner_of(&self, entity_id: &EntityId) -> Result<UserId, LedgerError> {
        self.owner(entity_id).map_err(Into::into)
    }
}
