//! Sistema de migrações para banco de dados
//!
//! Este módulo gerencia as migrações do banco de dados SQLite

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{error, info};

/// Lista de migrações SQL a serem aplicadas
pub(crate) const MIGRATIONS: &[&str] = &[
    // 001_scheduling_schema.sql
    r#"
    -- Participantes (médicos e pacientes)
    CREATE TABLE IF NOT EXISTS users (
        id BLOB PRIMARY KEY NOT NULL,
        role TEXT NOT NULL CHECK (role IN ('doctor', 'patient')),
        full_name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    -- Janelas de disponibilidade publicadas pelos médicos
    CREATE TABLE IF NOT EXISTS availability_slots (
        id BLOB PRIMARY KEY NOT NULL,
        doctor_id BLOB NOT NULL,
        date DATE NOT NULL,
        start_time TIME NOT NULL,
        end_time TIME NOT NULL,
        available BOOLEAN NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL,
        CHECK (end_time > start_time),
        UNIQUE (doctor_id, date, start_time, end_time),
        FOREIGN KEY (doctor_id) REFERENCES users (id) ON DELETE CASCADE
    );

    -- Consultas confirmadas
    CREATE TABLE IF NOT EXISTS appointments (
        id BLOB PRIMARY KEY NOT NULL,
        doctor_id BLOB NOT NULL,
        patient_id BLOB NOT NULL,
        slot_id BLOB NOT NULL UNIQUE,
        appointment_date DATE NOT NULL,
        appointment_time TIME NOT NULL,
        notes TEXT NOT NULL DEFAULT '',
        calendar_event_id_doctor TEXT,
        calendar_event_id_patient TEXT,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        UNIQUE (doctor_id, appointment_date, appointment_time),
        FOREIGN KEY (doctor_id) REFERENCES users (id) ON DELETE CASCADE,
        FOREIGN KEY (patient_id) REFERENCES users (id) ON DELETE CASCADE,
        FOREIGN KEY (slot_id) REFERENCES availability_slots (id) ON DELETE CASCADE
    );

    -- Credenciais OAuth da agenda externa (tokens cifrados)
    CREATE TABLE IF NOT EXISTS calendar_credentials (
        user_id BLOB PRIMARY KEY NOT NULL,
        access_token_ciphertext BLOB NOT NULL,
        access_token_nonce BLOB NOT NULL,
        refresh_token_ciphertext BLOB,
        refresh_token_nonce BLOB,
        expires_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
    );

    -- Índices para otimização
    CREATE INDEX IF NOT EXISTS idx_slots_doctor_date ON availability_slots (doctor_id, date);
    CREATE INDEX IF NOT EXISTS idx_appointments_patient_id ON appointments (patient_id);
    CREATE INDEX IF NOT EXISTS idx_appointments_date ON appointments (appointment_date, appointment_time);
    "#,
];

/// Executa todas as migrações pendentes no banco de dados
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Aplicando migrações de banco de dados...");

    let version: i64 = match sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
    {
        Ok(v) => v,
        Err(e) => {
            // Pode ser a primeira execução
            error!("Erro ao obter versão do banco: {}", e);
            0
        }
    };

    info!("Versão atual do banco: {}", version);

    for (i, migration_sql) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as i64;

        if migration_version <= version {
            info!("Migração {} já aplicada", migration_version);
            continue;
        }

        info!("Aplicando migração {}...", migration_version);

        let mut transaction = pool.begin().await.with_context(|| {
            format!("Falha ao iniciar transação para migração {}", migration_version)
        })?;

        sqlx::query(migration_sql)
            .execute(&mut *transaction)
            .await
            .with_context(|| format!("Falha ao executar migração {}", migration_version))?;

        sqlx::query(&format!("PRAGMA user_version = {}", migration_version))
            .execute(&mut *transaction)
            .await
            .with_context(|| format!("Falha ao atualizar versão para {}", migration_version))?;

        transaction.commit().await.with_context(|| {
            format!("Falha ao confirmar transação para migração {}", migration_version)
        })?;

        info!("Migração {} aplicada com sucesso", migration_version);
    }

    info!("Migrações concluídas. Versão atual: {}", MIGRATIONS.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::migrate::MigrateDatabase;
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::Sqlite;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_migrations() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test_migrations.db");
        let db_url = format!("sqlite:{}", db_path.display());

        Sqlite::create_database(&db_url).await?;

        let conn_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(conn_options).await?;

        run_migrations(&pool).await?;

        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await?;

        assert_eq!(version, MIGRATIONS.len() as i64);

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&pool)
        .await?;

        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"availability_slots".to_string()));
        assert!(tables.contains(&"appointments".to_string()));
        assert!(tables.contains(&"calendar_credentials".to_string()));

        // Reaplicar não deve falhar nem alterar a versão
        run_migrations(&pool).await?;
        let again: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await?;
        assert_eq!(again, version);

        Ok(())
    }
}
