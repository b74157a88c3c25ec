//! Repositório de consultas
//!
//! A unicidade por (médico, data, hora) e por horário é garantida pelo
//! esquema; uma violação chega como [`DbError::ConstraintViolation`].

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use super::{returned_row, DbTransaction};
use crate::error::{DbError, DbResult};
use crate::models::{Appointment, NewAppointment};

const APPOINTMENT_COLUMNS: &str = "id, doctor_id, patient_id, slot_id, appointment_date, appointment_time, \
     notes, calendar_event_id_doctor, calendar_event_id_patient, created_at, updated_at";

/// Acesso à tabela `appointments`
#[derive(Debug, Clone)]
pub struct AppointmentRepository {
    pool: SqlitePool,
}

impl AppointmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Registra a consulta dentro da transação de reserva
    pub async fn create(&self, tx: &mut DbTransaction, new: NewAppointment) -> DbResult<Appointment> {
        let now = Utc::now();
        let appointment = sqlx::query_as::<_, Appointment>(&format!(
            "INSERT INTO appointments
                 (id, doctor_id, patient_id, slot_id, appointment_date, appointment_time, notes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {APPOINTMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.doctor_id)
        .bind(new.patient_id)
        .bind(new.slot_id)
        .bind(new.appointment_date)
        .bind(new.appointment_time)
        .bind(&new.notes)
        .bind(now)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;

        debug!(appointment_id = %appointment.id, slot_id = %appointment.slot_id, "Consulta inserida");
        Ok(appointment)
    }

    pub async fn get(&self, id: Uuid) -> DbResult<Appointment> {
        sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Consulta {}", id)))
    }

    /// Consulta que consumiu o horário, se houver
    pub async fn find_by_slot(&self, slot_id: Uuid) -> DbResult<Option<Appointment>> {
        let appointment = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE slot_id = ?"
        ))
        .bind(slot_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(appointment)
    }

    pub async fn count_for_slot(&self, slot_id: Uuid) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM appointments WHERE slot_id = ?")
            .bind(slot_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Anexa os identificadores de evento da agenda externa
    ///
    /// Identificadores ausentes nunca apagam um valor gravado e repetir a
    /// chamada com os mesmos valores não altera a linha (nem `updated_at`).
    pub async fn attach_calendar_ids(
        &self,
        id: Uuid,
        doctor_event_id: Option<&str>,
        patient_event_id: Option<&str>,
    ) -> DbResult<Appointment> {
        let rows = sqlx::query_as::<_, Appointment>(&format!(
            "UPDATE appointments SET
                 calendar_event_id_doctor = COALESCE(?1, calendar_event_id_doctor),
                 calendar_event_id_patient = COALESCE(?2, calendar_event_id_patient),
                 updated_at = CASE
                     WHEN COALESCE(?1, calendar_event_id_doctor) IS NOT calendar_event_id_doctor
                       OR COALESCE(?2, calendar_event_id_patient) IS NOT calendar_event_id_patient
                     THEN ?3 ELSE updated_at END
             WHERE id = ?4
             RETURNING {APPOINTMENT_COLUMNS}"
        ))
        .bind(doctor_event_id)
        .bind(patient_event_id)
        .bind(Utc::now())
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let appointment =
            returned_row(rows).ok_or_else(|| DbError::NotFound(format!("Consulta {}", id)))?;

        info!(
            appointment_id = %id,
            doctor_event = appointment.calendar_event_id_doctor.is_some(),
            patient_event = appointment.calendar_event_id_patient.is_some(),
            "Eventos de agenda anexados"
        );
        Ok(appointment)
    }

    pub async fn list_for_doctor(&self, doctor_id: Uuid) -> DbResult<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE doctor_id = ?
             ORDER BY appointment_date, appointment_time"
        ))
        .bind(doctor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_for_patient(&self, patient_id: Uuid) -> DbResult<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE patient_id = ?
             ORDER BY appointment_date, appointment_time"
        ))
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
