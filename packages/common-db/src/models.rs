//! Modelos de dados compartilhados entre aplicações
//!
//! Este módulo define as estruturas de dados da agenda da clínica:
//! participantes, janelas de disponibilidade, consultas e credenciais de agenda

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

/// Papel de um participante
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Médico que publica horários
    Doctor,
    /// Paciente que reserva horários
    Patient,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Patient => "patient",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doctor" => Ok(Role::Doctor),
            "patient" => Ok(Role::Patient),
            other => Err(format!("Valor de papel inválido: {}", other)),
        }
    }
}

fn decode_role(row: &SqliteRow, column: &str) -> sqlx::Result<Role> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|msg: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    })
}

/// Participante (médico ou paciente)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub role: Role,
    pub full_name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for User {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            role: decode_role(row, "role")?,
            full_name: row.try_get("full_name")?,
            email: row.try_get("email")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Dados para cadastrar um participante
#[derive(Debug, Clone)]
pub struct NewUser {
    pub role: Role,
    pub full_name: String,
    pub email: String,
}

/// Janela de disponibilidade publicada por um médico
///
/// Uma vez que `available` vira `false` o horário está consumido; nada
/// neste pacote o torna disponível novamente.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    /// Identificador único do horário
    pub id: Uuid,
    /// Médico dono do horário
    pub doctor_id: Uuid,
    /// Data do atendimento
    pub date: NaiveDate,
    /// Início (UTC)
    pub start_time: NaiveTime,
    /// Fim (UTC)
    pub end_time: NaiveTime,
    /// Indica se o horário ainda pode ser reservado
    pub available: bool,
    /// Data e hora de criação do registro
    pub created_at: DateTime<Utc>,
}

impl AvailabilitySlot {
    /// Data e hora de início em UTC
    pub fn starts_at(&self) -> DateTime<Utc> {
        NaiveDateTime::new(self.date, self.start_time).and_utc()
    }

    /// Data e hora de término em UTC
    pub fn ends_at(&self) -> DateTime<Utc> {
        NaiveDateTime::new(self.date, self.end_time).and_utc()
    }

    /// O horário começa estritamente depois de `now`
    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.starts_at() > now
    }
}

impl FromRow<'_, SqliteRow> for AvailabilitySlot {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            doctor_id: row.try_get("doctor_id")?,
            date: row.try_get("date")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            available: row.try_get("available")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Dados para publicar um horário
#[derive(Debug, Clone)]
pub struct NewSlot {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Representa uma consulta confirmada
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Identificador único da consulta
    pub id: Uuid,
    /// Médico responsável
    pub doctor_id: Uuid,
    /// Paciente que reservou
    pub patient_id: Uuid,
    /// Horário consumido (no máximo uma consulta por horário)
    pub slot_id: Uuid,
    /// Data da consulta
    pub appointment_date: NaiveDate,
    /// Hora de início
    pub appointment_time: NaiveTime,
    /// Observações do paciente
    pub notes: String,
    /// Evento criado na agenda do médico
    pub calendar_event_id_doctor: Option<String>,
    /// Evento criado na agenda do paciente
    pub calendar_event_id_patient: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for Appointment {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            doctor_id: row.try_get("doctor_id")?,
            patient_id: row.try_get("patient_id")?,
            slot_id: row.try_get("slot_id")?,
            appointment_date: row.try_get("appointment_date")?,
            appointment_time: row.try_get("appointment_time")?,
            notes: row.try_get("notes")?,
            calendar_event_id_doctor: row.try_get("calendar_event_id_doctor")?,
            calendar_event_id_patient: row.try_get("calendar_event_id_patient")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Dados para registrar uma consulta dentro da transação de reserva
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub slot_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub notes: String,
}

/// Credencial OAuth de uma conta de agenda externa
#[derive(Clone, PartialEq, Eq)]
pub struct CalendarCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl CalendarCredential {
    /// O token de acesso expirou em `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl std::fmt::Debug for CalendarCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarCredential")
            .field("access_token", &"**")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "**"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn slot_at(date: NaiveDate, start: NaiveTime) -> AvailabilitySlot {
        AvailabilitySlot {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            date,
            start_time: start,
            end_time: start + Duration::minutes(30),
            available: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_slot_future_is_strict() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let start = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let slot = slot_at(date, start);

        let at_start = NaiveDateTime::new(date, start).and_utc();
        assert!(!slot.is_future(at_start));
        assert!(slot.is_future(at_start - Duration::seconds(1)));
        assert_eq!(slot.ends_at() - slot.starts_at(), Duration::minutes(30));
    }

    #[test]
    fn test_role_round_trip_and_rejection() {
        assert_eq!("doctor".parse::<Role>(), Ok(Role::Doctor));
        assert_eq!(Role::Patient.to_string(), "patient");
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_credential_debug_hides_tokens() {
        let credential = CalendarCredential {
            access_token: "ya29.secret".to_string(),
            refresh_token: Some("1//secret".to_string()),
            expires_at: Utc::now(),
        };
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("secret"));
        assert!(credential.is_expired(credential.expires_at));
    }
}
