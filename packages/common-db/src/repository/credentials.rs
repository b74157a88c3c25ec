//! Credenciais OAuth da agenda externa
//!
//! Os tokens são cifrados antes de irem ao banco e decifrados na leitura.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::crypto::{decrypt_str, encrypt_str, EncryptedData, EncryptionKey};
use crate::error::DbResult;
use crate::models::CalendarCredential;

#[derive(Debug, Clone)]
pub struct CredentialRepository {
    pool: SqlitePool,
    key: Arc<EncryptionKey>,
}

impl CredentialRepository {
    pub fn new(pool: SqlitePool, key: Arc<EncryptionKey>) -> Self {
        Self { pool, key }
    }

    /// Credencial vinculada ao usuário, se houver
    pub async fn get(&self, user_id: Uuid) -> DbResult<Option<CalendarCredential>> {
        let row = sqlx::query(
            "SELECT access_token_ciphertext, access_token_nonce,
                    refresh_token_ciphertext, refresh_token_nonce, expires_at
             FROM calendar_credentials WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.decode(&row)?)),
            None => Ok(None),
        }
    }

    /// Grava ou substitui a credencial do usuário
    pub async fn upsert(&self, user_id: Uuid, credential: &CalendarCredential) -> DbResult<()> {
        let access = encrypt_str(&credential.access_token, &self.key)?;
        let refresh = credential
            .refresh_token
            .as_deref()
            .map(|token| encrypt_str(token, &self.key))
            .transpose()?;
        let (refresh_ciphertext, refresh_nonce) = match refresh {
            Some(data) => (Some(data.ciphertext), Some(data.nonce)),
            None => (None, None),
        };

        sqlx::query(
            "INSERT INTO calendar_credentials
                 (user_id, access_token_ciphertext, access_token_nonce,
                  refresh_token_ciphertext, refresh_token_nonce, expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (user_id) DO UPDATE SET
                 access_token_ciphertext = excluded.access_token_ciphertext,
                 access_token_nonce = excluded.access_token_nonce,
                 refresh_token_ciphertext = excluded.refresh_token_ciphertext,
                 refresh_token_nonce = excluded.refresh_token_nonce,
                 expires_at = excluded.expires_at,
                 updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(access.ciphertext)
        .bind(access.nonce)
        .bind(refresh_ciphertext)
        .bind(refresh_nonce)
        .bind(credential.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(user_id = %user_id, expires_at = %credential.expires_at, "Credencial de agenda gravada");
        Ok(())
    }

    fn decode(&self, row: &SqliteRow) -> DbResult<CalendarCredential> {
        let access = EncryptedData {
            ciphertext: row.try_get("access_token_ciphertext")?,
            nonce: row.try_get("access_token_nonce")?,
        };
        let refresh_ciphertext: Option<Vec<u8>> = row.try_get("refresh_token_ciphertext")?;
        let refresh_nonce: Option<Vec<u8>> = row.try_get("refresh_token_nonce")?;
        let refresh_token = match (refresh_ciphertext, refresh_nonce) {
            (Some(ciphertext), Some(nonce)) => {
                Some(decrypt_str(&EncryptedData { ciphertext, nonce }, &self.key)?)
            }
            _ => None,
        };
        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;

        Ok(CalendarCredential {
            access_token: decrypt_str(&access, &self.key)?,
            refresh_token,
            expires_at,
        })
    }
}
