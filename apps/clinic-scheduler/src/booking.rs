//! Transação de reserva de horário
//!
//! ```text
//! Requested → Validated → Locked → Committed → SideEffectsAttempted → Done
//!     ↓           ↓          ↓
//!  Rejected    Rejected   Rejected (rollback)
//! ```
//!
//! Só o que acontece antes ou durante a transação pode recusar a reserva.
//! Agenda e e-mail rodam depois do commit, fora do lock, e suas falhas
//! viram avisos anexados ao resultado.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common_db::models::{Appointment, AvailabilitySlot, NewAppointment, User};
use common_db::repository::{AppointmentRepository, CredentialRepository, SlotRepository, UserRepository};
use common_db::DbError;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::calendar::{CalendarAccount, CalendarEvent, CalendarSync};
use crate::notification::{
    BookingConfirmationPayload, NotificationPayload, Notifier, RecipientType, TemplateKind,
};

/// Estágios da máquina de estados da reserva
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStage {
    Requested,
    Validated,
    Locked,
    Committed,
    SideEffectsAttempted,
    Done,
}

impl std::fmt::Display for BookingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BookingStage::Requested => "requested",
            BookingStage::Validated => "validated",
            BookingStage::Locked => "locked",
            BookingStage::Committed => "committed",
            BookingStage::SideEffectsAttempted => "side_effects_attempted",
            BookingStage::Done => "done",
        };
        f.write_str(name)
    }
}

fn unavailable_message(lost_race: &bool) -> &'static str {
    if *lost_race {
        "Este horário acabou de ser reservado por outro paciente"
    } else {
        "Este horário já está reservado"
    }
}

/// Motivos pelos quais uma reserva é recusada
#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Horário {0} não encontrado")]
    NotFound(Uuid),

    #[error("{}", unavailable_message(.lost_race))]
    SlotUnavailable { slot_id: Uuid, lost_race: bool },

    #[error("Não é possível reservar um horário que já começou")]
    SlotExpired(Uuid),

    #[error("Violação de integridade ao reservar: {0}")]
    ConstraintViolation(String),

    #[error("Erro de armazenamento: {0}")]
    Storage(DbError),
}

/// Participante afetado por um efeito colateral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Participant {
    Doctor,
    Patient,
}

/// Falha tolerada de agenda ou e-mail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideEffectWarning {
    pub participant: Participant,
    pub message: String,
}

/// Quais efeitos colaterais tiveram sucesso
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SideEffectReport {
    pub doctor_calendar: bool,
    pub patient_calendar: bool,
    pub doctor_notified: bool,
    pub patient_notified: bool,
}

/// Resultado de uma reserva confirmada
#[derive(Debug, Clone)]
pub struct BookingOutcome {
    pub appointment: Appointment,
    pub side_effects: SideEffectReport,
    pub calendar_warnings: Vec<SideEffectWarning>,
    pub notification_warnings: Vec<SideEffectWarning>,
}

#[derive(Debug, Clone)]
pub struct BookingSettings {
    /// Fuso informado nos eventos de agenda
    pub timezone: String,
    /// Limite de cada chamada de agenda ou e-mail
    pub side_effect_timeout: Duration,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            side_effect_timeout: Duration::from_secs(5),
        }
    }
}

/// Coordenador da transação de reserva
///
/// Único escritor de consultas e único a consumir horários.
pub struct BookingCoordinator {
    slots: SlotRepository,
    appointments: AppointmentRepository,
    users: UserRepository,
    credentials: CredentialRepository,
    calendar: Arc<dyn CalendarSync>,
    notifier: Arc<dyn Notifier>,
    settings: BookingSettings,
}

impl BookingCoordinator {
    pub fn new(
        slots: SlotRepository,
        appointments: AppointmentRepository,
        users: UserRepository,
        credentials: CredentialRepository,
        calendar: Arc<dyn CalendarSync>,
        notifier: Arc<dyn Notifier>,
        settings: BookingSettings,
    ) -> Self {
        Self {
            slots,
            appointments,
            users,
            credentials,
            calendar,
            notifier,
            settings,
        }
    }

    /// Reserva o horário `slot_id` para o paciente
    pub async fn book(
        &self,
        patient: &User,
        slot_id: Uuid,
        notes: &str,
    ) -> Result<BookingOutcome, BookingError> {
        stage(slot_id, BookingStage::Requested);

        // Checagem prévia fora do lock; disponibilidade é revista sob lock
        let snapshot = self.slots.get(slot_id).await.map_err(|e| slot_error(slot_id, e))?;
        if !snapshot.available {
            return Err(BookingError::SlotUnavailable { slot_id, lost_race: false });
        }
        if !snapshot.is_future(Utc::now()) {
            return Err(BookingError::SlotExpired(slot_id));
        }
        stage(slot_id, BookingStage::Validated);

        let (appointment, slot) = self.commit(patient, slot_id, notes).await?;
        info!(
            appointment_id = %appointment.id,
            slot_id = %slot_id,
            patient_id = %patient.id,
            doctor_id = %slot.doctor_id,
            "Consulta reservada"
        );

        let outcome = self.run_side_effects(patient, &slot, appointment).await;
        stage(slot_id, BookingStage::SideEffectsAttempted);

        stage(slot_id, BookingStage::Done);
        Ok(outcome)
    }

    /// Bloqueia o horário, cria a consulta e consome o horário numa transação
    ///
    /// Usa apenas a linha bloqueada; a leitura prévia não é confiável aqui.
    async fn commit(
        &self,
        patient: &User,
        slot_id: Uuid,
        notes: &str,
    ) -> Result<(Appointment, AvailabilitySlot), BookingError> {
        let mut tx = self.slots.begin().await.map_err(BookingError::Storage)?;

        let locked = self
            .slots
            .get_for_update(&mut tx, slot_id)
            .await
            .map_err(|e| slot_error(slot_id, e))?;
        if !locked.available {
            tx.rollback().await.map_err(|e| BookingError::Storage(e.into()))?;
            warn!(slot_id = %slot_id, patient_id = %patient.id, "Horário perdido para outra reserva");
            return Err(BookingError::SlotUnavailable { slot_id, lost_race: true });
        }
        stage(slot_id, BookingStage::Locked);

        let appointment = self
            .appointments
            .create(
                &mut tx,
                NewAppointment {
                    doctor_id: locked.doctor_id,
                    patient_id: patient.id,
                    slot_id: locked.id,
                    appointment_date: locked.date,
                    appointment_time: locked.start_time,
                    notes: notes.to_string(),
                },
            )
            .await
            .map_err(|e| match e {
                DbError::ConstraintViolation(detail) => {
                    error!(
                        slot_id = %slot_id,
                        doctor_id = %locked.doctor_id,
                        date = %locked.date,
                        time = %locked.start_time,
                        detail = %detail,
                        "Restrição de consulta única violada com o horário bloqueado"
                    );
                    BookingError::ConstraintViolation(detail)
                }
                other => BookingError::Storage(other),
            })?;

        self.slots
            .mark_unavailable(&mut tx, &locked)
            .await
            .map_err(|e| slot_error(slot_id, e))?;

        tx.commit().await.map_err(|e| BookingError::Storage(e.into()))?;
        stage(slot_id, BookingStage::Committed);

        Ok((appointment, locked))
    }

    async fn run_side_effects(
        &self,
        patient: &User,
        slot: &AvailabilitySlot,
        mut appointment: Appointment,
    ) -> BookingOutcome {
        let mut side_effects = SideEffectReport::default();
        let mut calendar_warnings = Vec::new();
        let mut notification_warnings = Vec::new();

        let doctor = match self.users.get(slot.doctor_id).await {
            Ok(doctor) => doctor,
            Err(e) => {
                warn!(doctor_id = %slot.doctor_id, error = %e, "Médico não encontrado para efeitos colaterais");
                let message = format!("Dados do médico indisponíveis: {}", e);
                for participant in [Participant::Doctor, Participant::Patient] {
                    calendar_warnings.push(SideEffectWarning { participant, message: message.clone() });
                    notification_warnings.push(SideEffectWarning { participant, message: message.clone() });
                }
                return BookingOutcome {
                    appointment,
                    side_effects,
                    calendar_warnings,
                    notification_warnings,
                };
            }
        };

        // Agenda
        let doctor_event = CalendarEvent {
            title: format!("Appointment with {}", patient.full_name),
            description: appointment.notes.clone(),
            start: slot.starts_at(),
            end: slot.ends_at(),
            timezone: self.settings.timezone.clone(),
        };
        let patient_event = CalendarEvent {
            title: format!("Appointment with Dr. {}", doctor.full_name),
            ..doctor_event.clone()
        };
        let (doctor_result, patient_result) = tokio::join!(
            self.sync_calendar(doctor.id, &doctor_event),
            self.sync_calendar(patient.id, &patient_event),
        );

        let doctor_event_id = collect(Participant::Doctor, doctor_result, &mut calendar_warnings);
        let patient_event_id = collect(Participant::Patient, patient_result, &mut calendar_warnings);
        side_effects.doctor_calendar = doctor_event_id.is_some();
        side_effects.patient_calendar = patient_event_id.is_some();

        if doctor_event_id.is_some() || patient_event_id.is_some() {
            match self
                .appointments
                .attach_calendar_ids(appointment.id, doctor_event_id.as_deref(), patient_event_id.as_deref())
                .await
            {
                Ok(updated) => appointment = updated,
                Err(e) => {
                    warn!(appointment_id = %appointment.id, error = %e, "Falha ao gravar ids de eventos");
                    side_effects.doctor_calendar = false;
                    side_effects.patient_calendar = false;
                    let message = format!("Evento criado mas não registrado: {}", e);
                    if doctor_event_id.is_some() {
                        calendar_warnings.push(SideEffectWarning { participant: Participant::Doctor, message: message.clone() });
                    }
                    if patient_event_id.is_some() {
                        calendar_warnings.push(SideEffectWarning { participant: Participant::Patient, message });
                    }
                }
            }
        }

        // E-mail
        let confirmation = |recipient_type| {
            NotificationPayload::BookingConfirmation(BookingConfirmationPayload {
                patient_name: patient.full_name.clone(),
                doctor_name: doctor.full_name.clone(),
                appointment_date: slot.date.to_string(),
                appointment_time: slot.start_time.to_string(),
                recipient_type,
            })
        };
        let patient_payload = confirmation(RecipientType::Patient);
        let doctor_payload = confirmation(RecipientType::Doctor);
        let (patient_sent, doctor_sent) = tokio::join!(
            self.bounded(self.notifier.send(TemplateKind::BookingConfirmation, &patient.email, &patient_payload)),
            self.bounded(self.notifier.send(TemplateKind::BookingConfirmation, &doctor.email, &doctor_payload)),
        );

        side_effects.patient_notified =
            collect(Participant::Patient, patient_sent, &mut notification_warnings).is_some();
        side_effects.doctor_notified =
            collect(Participant::Doctor, doctor_sent, &mut notification_warnings).is_some();

        BookingOutcome {
            appointment,
            side_effects,
            calendar_warnings,
            notification_warnings,
        }
    }

    /// Carrega a conta do participante e cria o evento
    async fn sync_calendar(&self, user_id: Uuid, event: &CalendarEvent) -> Result<String, String> {
        let credential = self
            .credentials
            .get(user_id)
            .await
            .map_err(|e| format!("Credencial de agenda ilegível: {}", e))?;
        let account = CalendarAccount { user_id, credential };

        self.bounded(self.calendar.create_event(&account, event)).await
    }

    /// Aplica o limite de tempo dos efeitos colaterais
    async fn bounded<T, E, F>(&self, call: F) -> Result<T, String>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.settings.side_effect_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("Tempo esgotado".to_string()),
        }
    }
}

fn stage(slot_id: Uuid, stage: BookingStage) {
    debug!(slot_id = %slot_id, stage = %stage, "Reserva avançou");
}

fn slot_error(slot_id: Uuid, error: DbError) -> BookingError {
    match error {
        DbError::NotFound(_) => BookingError::NotFound(slot_id),
        DbError::SlotBooked(_) => BookingError::SlotUnavailable { slot_id, lost_race: true },
        other => BookingError::Storage(other),
    }
}

fn collect<T>(
    participant: Participant,
    result: Result<T, String>,
    warnings: &mut Vec<SideEffectWarning>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(message) => {
            warn!(?participant, message = %message, "Efeito colateral da reserva falhou");
            warnings.push(SideEffectWarning { participant, message });
            None
        }
    }
}
