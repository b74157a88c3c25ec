//! Common DB - Biblioteca compartilhada de persistência da agenda da clínica
//!
//! Esta biblioteca fornece:
//! - Modelos de dados compartilhados (horários, consultas, participantes)
//! - Migrações automáticas do banco de dados
//! - Repositórios, incluindo a leitura com bloqueio usada na reserva
//! - Criptografia dos tokens OAuth gravados no banco

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod crypto;
pub mod error;
pub mod migrations;
pub mod models;
pub mod repository;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{DbError, DbResult};

/// Configuração da conexão com o banco de dados
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Caminho para o arquivo SQLite
    pub db_path: String,
    /// Frase-senha da qual se deriva a chave dos tokens (Argon2id)
    pub key_phrase: String,
    /// Salt da derivação, com pelo menos 8 bytes
    pub key_salt: String,
    /// Número máximo de conexões no pool
    pub max_connections: u32,
    /// Quanto tempo um escritor aguarda o lock de escrita
    pub busy_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            db_path: "data/clinic.db".to_string(),
            key_phrase: "".to_string(), // Vazio por segurança, deve ser definido explicitamente
            key_salt: "clinic-scheduler".to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Deriva a chave usada para cifrar os tokens OAuth
    pub fn encryption_key(&self) -> Result<crypto::EncryptionKey> {
        crypto::EncryptionKey::derive(&self.key_phrase, &self.key_salt)
            .context("Falha ao derivar a chave de criptografia")
    }
}

/// Inicializa o pool de conexões SQLite e aplica as migrações
pub async fn init_db_pool(config: &DbConfig) -> Result<SqlitePool> {
    let db_path = Path::new(&config.db_path);

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .context("Falha ao criar diretório para banco de dados")?;
        }
    }

    let connection_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout)
        .pragma("synchronous", "NORMAL");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(connection_options)
        .await
        .context("Falha ao conectar ao banco de dados SQLite")?;

    migrations::run_migrations(&pool)
        .await
        .context("Falha ao aplicar migrações")?;

    info!("Banco de dados inicializado com sucesso: {}", config.db_path);
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_db_connection() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("nested").join("test.db");

        let config = DbConfig {
            db_path: db_path.to_string_lossy().into_owned(),
            key_phrase: "test_password".to_string(),
            max_connections: 2,
            ..DbConfig::default()
        };

        let pool = init_db_pool(&config).await?;

        let result: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&pool)
            .await?;
        assert_eq!(result.0, 1);

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await?;
        assert_eq!(foreign_keys, 1);

        Ok(())
    }

    #[test]
    fn test_empty_key_phrase_is_rejected() {
        assert!(DbConfig::default().encryption_key().is_err());
    }
}
