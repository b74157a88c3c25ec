//! Estado compartilhado entre os handlers

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::FromRef;
use common_db::repository::{AppointmentRepository, CredentialRepository, SlotRepository, UserRepository};
use sqlx::SqlitePool;

use crate::auth::AuthKeys;
use crate::booking::{BookingCoordinator, BookingSettings};
use crate::calendar::{CalendarLink, CalendarSync, GoogleCalendarClient};
use crate::config::AppConfig;
use crate::notification::{HttpEmailNotifier, Notifier};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<BookingCoordinator>,
    pub slots: SlotRepository,
    pub appointments: AppointmentRepository,
    pub users: UserRepository,
    pub calendar_link: Arc<dyn CalendarLink>,
    pub auth: AuthKeys,
}

impl AppState {
    /// Monta o estado com os adaptadores HTTP reais
    pub fn build(pool: SqlitePool, config: &AppConfig) -> Result<Self> {
        let key = config.database.encryption_key()?;
        let credentials = CredentialRepository::new(pool.clone(), Arc::new(key));

        let google = Arc::new(
            GoogleCalendarClient::new(config.calendar.clone(), credentials.clone())
                .context("Falha ao criar cliente do Google Calendar")?,
        );
        let notifier = HttpEmailNotifier::new(&config.notification)
            .context("Falha ao criar cliente do serviço de e-mail")?;

        let settings = BookingSettings {
            timezone: config.calendar.timezone.clone(),
            side_effect_timeout: config.side_effect_timeout,
        };

        Ok(Self::with_adapters(
            pool,
            credentials,
            google.clone(),
            google,
            Arc::new(notifier),
            settings,
            AuthKeys::new(&config.jwt_secret),
        ))
    }

    pub fn with_adapters(
        pool: SqlitePool,
        credentials: CredentialRepository,
        calendar: Arc<dyn CalendarSync>,
        calendar_link: Arc<dyn CalendarLink>,
        notifier: Arc<dyn Notifier>,
        settings: BookingSettings,
        auth: AuthKeys,
    ) -> Self {
        let slots = SlotRepository::new(pool.clone());
        let appointments = AppointmentRepository::new(pool.clone());
        let users = UserRepository::new(pool);

        let coordinator = BookingCoordinator::new(
            slots.clone(),
            appointments.clone(),
            users.clone(),
            credentials,
            calendar,
            notifier,
            settings,
        );

        Self {
            coordinator: Arc::new(coordinator),
            slots,
            appointments,
            users,
            calendar_link,
            auth,
        }
    }
}

impl FromRef<AppState> for AuthKeys {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
