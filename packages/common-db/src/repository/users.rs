//! Diretório mínimo de participantes
//!
//! Usado para endereçar notificações e montar os títulos dos eventos.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::returned_row;
use crate::error::{DbError, DbResult};
use crate::models::{NewUser, User};

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new_user: NewUser) -> DbResult<User> {
        let rows = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, role, full_name, email, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, role, full_name, email, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(new_user.role.as_str())
        .bind(&new_user.full_name)
        .bind(&new_user.email)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;
        returned_row(rows).ok_or_else(|| DbError::InternalError("INSERT sem linha retornada".to_string()))
    }

    pub async fn get(&self, id: Uuid) -> DbResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, role, full_name, email, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Usuário {}", id)))
    }
}
