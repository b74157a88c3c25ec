//! Utilitários de teste: banco SQLite descartável com migrações aplicadas

use anyhow::Result;
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::{init_db_pool, DbConfig};

/// Banco temporário; o diretório é removido quando o valor é descartado
pub struct TestDb {
    pub pool: SqlitePool,
    pub config: DbConfig,
    _dir: TempDir,
}

impl TestDb {
    pub async fn new() -> Result<Self> {
        Self::with_connections(5).await
    }

    pub async fn with_connections(max_connections: u32) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let config = DbConfig {
            db_path: dir.path().join("test.db").to_string_lossy().into_owned(),
            key_phrase: "test_password".to_string(),
            max_connections,
            ..DbConfig::default()
        };
        let pool = init_db_pool(&config).await?;
        Ok(Self { pool, config, _dir: dir })
    }
}
