//! Repositório de horários disponíveis
//!
//! O SQLite não tem `SELECT ... FOR UPDATE`: o bloqueio é o lock de escrita
//! do banco. [`SlotRepository::get_for_update`] emite um `UPDATE` neutro com
//! `RETURNING` como primeira instrução da transação, o que adquire o lock
//! (aguardando até o `busy_timeout`) e lê a versão confirmada mais recente
//! da linha de uma só vez. O lock só é liberado no commit ou rollback.

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{returned_row, DbTransaction};
use crate::error::{DbError, DbResult};
use crate::models::{AvailabilitySlot, NewSlot};

const SLOT_COLUMNS: &str = "id, doctor_id, date, start_time, end_time, available, created_at";

/// Acesso à tabela `availability_slots`
#[derive(Debug, Clone)]
pub struct SlotRepository {
    pool: SqlitePool,
}

impl SlotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Abre uma transação no pool deste repositório
    pub async fn begin(&self) -> DbResult<DbTransaction> {
        Ok(self.pool.begin().await?)
    }

    /// Publica um novo horário
    pub async fn create(&self, new_slot: NewSlot) -> DbResult<AvailabilitySlot> {
        if new_slot.end_time <= new_slot.start_time {
            return Err(DbError::ConstraintViolation(
                "O horário final deve ser posterior ao inicial".to_string(),
            ));
        }

        let rows = sqlx::query_as::<_, AvailabilitySlot>(&format!(
            "INSERT INTO availability_slots (id, doctor_id, date, start_time, end_time, available, created_at)
             VALUES (?, ?, ?, ?, ?, 1, ?)
             RETURNING {SLOT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new_slot.doctor_id)
        .bind(new_slot.date)
        .bind(new_slot.start_time)
        .bind(new_slot.end_time)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;
        let slot = returned_row(rows)
            .ok_or_else(|| DbError::InternalError("INSERT sem linha retornada".to_string()))?;

        info!(slot_id = %slot.id, doctor_id = %slot.doctor_id, "Horário publicado");
        Ok(slot)
    }

    /// Busca um horário sem bloqueio
    pub async fn get(&self, id: Uuid) -> DbResult<AvailabilitySlot> {
        sqlx::query_as::<_, AvailabilitySlot>(&format!(
            "SELECT {SLOT_COLUMNS} FROM availability_slots WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Horário {}", id)))
    }

    /// Busca o horário adquirindo o lock exclusivo pelo resto da transação
    ///
    /// Deve ser a primeira instrução executada em `tx`.
    pub async fn get_for_update(&self, tx: &mut DbTransaction, id: Uuid) -> DbResult<AvailabilitySlot> {
        let slot = sqlx::query_as::<_, AvailabilitySlot>(&format!(
            "UPDATE availability_slots SET available = available WHERE id = ?
             RETURNING {SLOT_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Horário {}", id)))?;

        debug!(slot_id = %id, available = slot.available, "Horário bloqueado para atualização");
        Ok(slot)
    }

    /// Marca o horário como consumido dentro da transação que o bloqueou
    pub async fn mark_unavailable(&self, tx: &mut DbTransaction, slot: &AvailabilitySlot) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE availability_slots SET available = 0 WHERE id = ? AND available = 1",
        )
        .bind(slot.id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(DbError::SlotBooked(format!("Horário {}", slot.id)));
        }
        Ok(())
    }

    /// Remove um horário do médico enquanto ainda estiver disponível
    pub async fn delete(&self, id: Uuid, doctor_id: Uuid) -> DbResult<()> {
        let result = sqlx::query(
            "DELETE FROM availability_slots WHERE id = ? AND doctor_id = ? AND available = 1",
        )
        .bind(id)
        .bind(doctor_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            info!(slot_id = %id, "Horário removido");
            return Ok(());
        }

        let slot = self.get(id).await?;
        if slot.doctor_id != doctor_id {
            return Err(DbError::NotFound(format!("Horário {}", id)));
        }
        warn!(slot_id = %id, "Tentativa de remover horário já reservado");
        Err(DbError::SlotBooked(format!("Horário {}", id)))
    }

    /// Horários de um médico a partir de uma data, em ordem cronológica
    pub async fn list_for_doctor(&self, doctor_id: Uuid, from: NaiveDate) -> DbResult<Vec<AvailabilitySlot>> {
        let slots = sqlx::query_as::<_, AvailabilitySlot>(&format!(
            "SELECT {SLOT_COLUMNS} FROM availability_slots
             WHERE doctor_id = ? AND date >= ?
             ORDER BY date, start_time"
        ))
        .bind(doctor_id)
        .bind(from)
        .fetch_all(&self.pool)
        .await?;
        Ok(slots)
    }
}
