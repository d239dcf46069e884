//! Connection repository for database operations
//!
//! This module provides the ConnectionRepository struct which encapsulates
//! SeaORM operations for the connections table. Token columns are only ever
//! written through the repository's cipher so plaintext never reaches storage.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::{CryptoError, TokenCipher};
use crate::models::connection::{self, Entity as Connection};

/// Per-feature toggles captured when the user links the upstream account.
#[derive(Debug, Clone)]
pub struct SyncToggles {
    pub sync_team_members: bool,
    pub sync_positions: bool,
    pub sync_birthdays: bool,
    pub sync_phone_numbers: bool,
    pub active_only: bool,
}

impl Default for SyncToggles {
    fn default() -> Self {
        Self {
            sync_team_members: true,
            sync_positions: true,
            sync_birthdays: false,
            sync_phone_numbers: false,
            active_only: true,
        }
    }
}

/// Input for storing the result of an authorization handshake.
#[derive(Clone)]
pub struct NewConnection {
    pub tenant_id: Uuid,
    pub organization_name: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub default_campus_id: Option<Uuid>,
    pub toggles: SyncToggles,
}

impl std::fmt::Debug for NewConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewConnection")
            .field("tenant_id", &self.tenant_id)
            .field("organization_name", &self.organization_name)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Repository for connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
    /// Cipher for token encryption
    pub cipher: TokenCipher,
}

impl ConnectionRepository {
    /// Creates a new ConnectionRepository instance
    pub fn new(db: Arc<DatabaseConnection>, cipher: TokenCipher) -> Self {
        Self { db, cipher }
    }

    /// Stores a freshly authorized connection, replacing the tenant's previous one.
    pub async fn upsert_with_tokens(&self, input: NewConnection) -> Result<connection::Model> {
        let access_cipher = self
            .cipher
            .encrypt(&input.access_token)
            .map_err(|e| anyhow!("Token encryption failed: {}", e))?;
        let refresh_cipher = self
            .cipher
            .encrypt(&input.refresh_token)
            .map_err(|e| anyhow!("Token encryption failed: {}", e))?;
        let now: DateTimeWithTimeZone = Utc::now().into();

        let existing = self.find_by_tenant(&input.tenant_id).await?;
        let is_new = existing.is_none();
        let mut model = match existing {
            Some(existing) => existing.into(),
            None => connection::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(input.tenant_id),
                last_synced_at: Set(None),
                created_at: Set(now),
                ..Default::default()
            },
        };

        model.organization_name = Set(input.organization_name);
        model.access_token_ciphertext = Set(Some(access_cipher));
        model.refresh_token_ciphertext = Set(Some(refresh_cipher));
        model.expires_at = Set(input.expires_at.map(Into::into));
        model.default_campus_id = Set(input.default_campus_id);
        model.sync_team_members = Set(input.toggles.sync_team_members);
        model.sync_positions = Set(input.toggles.sync_positions);
        model.sync_birthdays = Set(input.toggles.sync_birthdays);
        model.sync_phone_numbers = Set(input.toggles.sync_phone_numbers);
        model.active_only = Set(input.toggles.active_only);
        model.status = Set(connection::STATUS_ACTIVE.to_string());
        model.updated_at = Set(now);

        if !is_new {
            return Ok(model.update(&*self.db).await?);
        }

        Connection::insert(model)
            .exec_without_returning(&*self.db)
            .await?;

        // For SQLite, query the record directly since we already know the tenant
        self.find_by_tenant(&input.tenant_id)
            .await?
            .ok_or_else(|| anyhow!("connection not persisted"))
    }

    /// Decrypts both stored tokens of a connection
    pub fn decrypt_tokens(
        &self,
        connection: &connection::Model,
    ) -> Result<(Option<String>, Option<String>), CryptoError> {
        let access = connection
            .access_token_ciphertext
            .as_deref()
            .map(|cipher| self.cipher.decrypt(cipher))
            .transpose()?;
        let refresh = connection
            .refresh_token_ciphertext
            .as_deref()
            .map(|cipher| self.cipher.decrypt(cipher))
            .transpose()?;
        Ok((access, refresh))
    }

    /// Encrypts a refreshed token pair and persists it with the new expiry
    pub async fn encrypt_and_update_tokens(
        &self,
        id: &Uuid,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<connection::Model> {
        let access_cipher = self
            .cipher
            .encrypt(access_token)
            .map_err(|e| anyhow!("Token encryption failed: {}", e))?;
        let refresh_cipher = self
            .cipher
            .encrypt(refresh_token)
            .map_err(|e| anyhow!("Token encryption failed: {}", e))?;

        let existing = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("Connection '{}' not found", id))?;

        let mut model: connection::ActiveModel = existing.into();
        model.access_token_ciphertext = Set(Some(access_cipher));
        model.refresh_token_ciphertext = Set(Some(refresh_cipher));
        model.expires_at = Set(Some(expires_at.into()));
        model.status = Set(connection::STATUS_ACTIVE.to_string());
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Retrieves a connection by its ID without tenant scoping
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<connection::Model>> {
        Ok(Connection::find_by_id(*id).one(&*self.db).await?)
    }

    /// Finds the tenant's connection, if one exists
    pub async fn find_by_tenant(&self, tenant_id: &Uuid) -> Result<Option<connection::Model>> {
        Ok(Connection::find()
            .filter(connection::Column::TenantId.eq(*tenant_id))
            .one(&*self.db)
            .await?)
    }

    /// Lists every connection eligible for a sweep, oldest first
    pub async fn list_active(&self) -> Result<Vec<connection::Model>> {
        Ok(Connection::find()
            .filter(connection::Column::Status.eq(connection::STATUS_ACTIVE))
            .filter(connection::Column::AccessTokenCiphertext.is_not_null())
            .filter(connection::Column::RefreshTokenCiphertext.is_not_null())
            .order_by_asc(connection::Column::CreatedAt)
            .order_by_asc(connection::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Flags a connection whose refresh token was rejected upstream
    pub async fn mark_reauth_required(&self, id: &Uuid) -> Result<connection::Model> {
        self.update_status(id, connection::STATUS_REAUTH_REQUIRED)
            .await
    }

    async fn update_status(&self, id: &Uuid, status: &str) -> Result<connection::Model> {
        let existing = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("Connection '{}' not found", id))?;

        let mut model: connection::ActiveModel = existing.into();
        model.status = Set(status.to_string());
        model.updated_at = Set(Utc::now().into());
        Ok(model.update(&*self.db).await?)
    }

    /// Sets or clears the incremental watermark
    pub async fn set_last_synced_at(
        &self,
        id: &Uuid,
        last_synced_at: Option<DateTime<Utc>>,
    ) -> Result<connection::Model> {
        let existing = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("Connection '{}' not found", id))?;

        let mut model: connection::ActiveModel = existing.into();
        model.last_synced_at = Set(last_synced_at.map(Into::into));
        model.updated_at = Set(Utc::now().into());
        Ok(model.update(&*self.db).await?)
    }

    /// Deletes the tenant's connection; returns whether a row was removed
    pub async fn delete_by_tenant(&self, tenant_id: &Uuid) -> Result<bool> {
        let result = Connection::delete_many()
            .filter(connection::Column::TenantId.eq(*tenant_id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }
}
