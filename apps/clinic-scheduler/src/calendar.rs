//! Sincronização com a agenda externa (Google Calendar)
//!
//! O adaptador nunca propaga falhas para quem reserva: toda falha volta
//! como [`CalendarError`] e vira um aviso na resposta da reserva.
//!
//! A vinculação da conta segue o fluxo OAuth de código de autorização:
//! [`CalendarLink::authorization_url`] monta o endereço de consentimento e
//! [`CalendarLink::link`] troca o código pelo token e o grava cifrado.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use common_db::models::CalendarCredential;
use common_db::repository::CredentialRepository;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CalendarConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Conta de agenda não vinculada")]
    NotLinked,

    #[error("Credencial expirada e não renovável: {0}")]
    CredentialExpired(String),

    #[error("Falha na API de agenda: {0}")]
    Remote(String),

    #[error("Tempo esgotado na API de agenda")]
    Timeout,

    #[error("Falha ao gravar credencial de agenda: {0}")]
    Storage(String),
}

/// Conta de agenda de um participante
#[derive(Debug, Clone)]
pub struct CalendarAccount {
    pub user_id: Uuid,
    pub credential: Option<CalendarCredential>,
}

/// Evento a ser criado na agenda do participante
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timezone: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendarSync: Send + Sync {
    /// Cria o evento e devolve o identificador opaco atribuído pela agenda
    async fn create_event(
        &self,
        account: &CalendarAccount,
        event: &CalendarEvent,
    ) -> Result<String, CalendarError>;
}

/// Vinculação da conta de agenda de um usuário
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendarLink: Send + Sync {
    /// Endereço de consentimento; `state` volta intacto no callback
    fn authorization_url(&self, state: &str) -> Result<String, CalendarError>;

    /// Troca o código de autorização pela credencial e a grava
    async fn link(&self, user_id: Uuid, code: &str) -> Result<CalendarCredential, CalendarError>;
}

const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

#[derive(Serialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: String,
    #[serde(rename = "timeZone")]
    time_zone: String,
}

#[derive(Serialize)]
struct EventBody {
    summary: String,
    description: String,
    start: EventTime,
    end: EventTime,
}

#[derive(Deserialize)]
struct EventCreated {
    id: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

/// Cliente HTTP do Google Calendar
pub struct GoogleCalendarClient {
    http: reqwest::Client,
    config: CalendarConfig,
    credentials: CredentialRepository,
}

impl GoogleCalendarClient {
    pub fn new(config: CalendarConfig, credentials: CredentialRepository) -> Result<Self, CalendarError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CalendarError::Remote(e.to_string()))?;
        Ok(Self {
            http,
            config,
            credentials,
        })
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/primary/events",
            self.config.api_base.trim_end_matches('/')
        )
    }

    /// Renova o token uma única vez e grava a nova credencial
    async fn refresh(
        &self,
        user_id: Uuid,
        credential: &CalendarCredential,
    ) -> Result<CalendarCredential, CalendarError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| CalendarError::CredentialExpired("sem refresh token".to_string()))?;

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| CalendarError::CredentialExpired(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CalendarError::CredentialExpired(format!(
                "renovação recusada com status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::CredentialExpired(e.to_string()))?;

        let refreshed = CalendarCredential {
            expires_at: token_expiry(token.expires_in).ok_or_else(|| {
                CalendarError::CredentialExpired(format!("expires_in fora do intervalo: {}", token.expires_in))
            })?,
            access_token: token.access_token,
            // O Google só devolve um novo refresh token quando o rotaciona
            refresh_token: token.refresh_token.or_else(|| credential.refresh_token.clone()),
        };

        if let Err(e) = self.credentials.upsert(user_id, &refreshed).await {
            warn!(user_id = %user_id, error = %e, "Falha ao gravar credencial renovada");
        } else {
            info!(user_id = %user_id, "Credencial de agenda renovada");
        }
        Ok(refreshed)
    }
}

/// Instante de expiração a partir do `expires_in` informado pelo provedor
fn token_expiry(expires_in: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(expires_in).and_then(|ttl| Utc::now().checked_add_signed(ttl))
}

fn map_transport_error(error: reqwest::Error) -> CalendarError {
    if error.is_timeout() {
        CalendarError::Timeout
    } else {
        CalendarError::Remote(error.to_string())
    }
}

#[async_trait]
impl CalendarSync for GoogleCalendarClient {
    async fn create_event(
        &self,
        account: &CalendarAccount,
        event: &CalendarEvent,
    ) -> Result<String, CalendarError> {
        let credential = account.credential.as_ref().ok_or(CalendarError::NotLinked)?;

        let credential = if credential.is_expired(Utc::now()) {
            debug!(user_id = %account.user_id, "Token de agenda expirado, renovando");
            self.refresh(account.user_id, credential).await?
        } else {
            credential.clone()
        };

        let body = EventBody {
            summary: event.title.clone(),
            description: event.description.clone(),
            start: EventTime {
                date_time: event.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                time_zone: event.timezone.clone(),
            },
            end: EventTime {
                date_time: event.end.to_rfc3339_opts(SecondsFormat::Secs, true),
                time_zone: event.timezone.clone(),
            },
        };

        let response = self
            .http
            .post(self.events_url())
            .bearer_auth(&credential.access_token)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(CalendarError::Remote(format!(
                "criação do evento recusada com status {}",
                response.status()
            )));
        }

        let created: EventCreated = response.json().await.map_err(map_transport_error)?;
        debug!(user_id = %account.user_id, event_id = %created.id, "Evento de agenda criado");
        Ok(created.id)
    }
}

#[async_trait]
impl CalendarLink for GoogleCalendarClient {
    fn authorization_url(&self, state: &str) -> Result<String, CalendarError> {
        let url = reqwest::Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", CALENDAR_SCOPE),
                ("access_type", "offline"),
                ("include_granted_scopes", "true"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| CalendarError::Remote(format!("GOOGLE_AUTH_URL inválida: {}", e)))?;
        Ok(url.into())
    }

    async fn link(&self, user_id: Uuid, code: &str) -> Result<CalendarCredential, CalendarError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(CalendarError::Remote(format!(
                "troca do código recusada com status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await.map_err(map_transport_error)?;
        let expires_at = token_expiry(token.expires_in).ok_or_else(|| {
            CalendarError::Remote(format!("expires_in fora do intervalo: {}", token.expires_in))
        })?;
        if token.refresh_token.is_none() {
            warn!(user_id = %user_id, "Vinculação sem refresh token; a conta precisará ser revinculada ao expirar");
        }

        let credential = CalendarCredential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
        };
        self.credentials
            .upsert(user_id, &credential)
            .await
            .map_err(|e| CalendarError::Storage(e.to_string()))?;

        info!(user_id = %user_id, "Conta de agenda vinculada");
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_db::crypto::EncryptionKey;
    use common_db::models::{NewUser, Role};
    use common_db::repository::UserRepository;
    use common_db::testing::TestDb;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _db: TestDb,
        server: MockServer,
        credentials: CredentialRepository,
        client: GoogleCalendarClient,
        user_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let db = TestDb::new().await.unwrap();
        let server = MockServer::start().await;
        let user_id = UserRepository::new(db.pool.clone())
            .create(NewUser {
                role: Role::Doctor,
                full_name: "Ana Souza".to_string(),
                email: "ana@clinica.med.br".to_string(),
            })
            .await
            .unwrap()
            .id;
        let credentials =
            CredentialRepository::new(db.pool.clone(), Arc::new(EncryptionKey::generate()));
        let config = CalendarConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            auth_url: "https://accounts.example.com/o/oauth2/auth".to_string(),
            token_url: format!("{}/token", server.uri()),
            redirect_uri: "http://localhost:8080/calendar/callback".to_string(),
            api_base: server.uri(),
            timezone: "UTC".to_string(),
            request_timeout: std::time::Duration::from_millis(500),
        };
        let client = GoogleCalendarClient::new(config, credentials.clone()).unwrap();
        Fixture {
            _db: db,
            server,
            credentials,
            client,
            user_id,
        }
    }

    fn event() -> CalendarEvent {
        let start = Utc::now() + Duration::days(1);
        CalendarEvent {
            title: "Appointment with Pedro Lima".to_string(),
            description: "follow-up".to_string(),
            start,
            end: start + Duration::minutes(30),
            timezone: "UTC".to_string(),
        }
    }

    fn credential(expires_in: Duration, refresh: Option<&str>) -> CalendarCredential {
        CalendarCredential {
            access_token: "ya29.current".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at: Utc::now() + expires_in,
        }
    }

    #[tokio::test]
    async fn test_not_linked_account() {
        let f = fixture().await;
        let account = CalendarAccount { user_id: f.user_id, credential: None };
        let result = f.client.create_event(&account, &event()).await;
        assert_eq!(result, Err(CalendarError::NotLinked));
    }

    #[tokio::test]
    async fn test_creates_event_with_valid_token() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(header("authorization", "Bearer ya29.current"))
            .and(body_string_contains("Appointment with Pedro Lima"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "evt-123"})))
            .expect(1)
            .mount(&f.server)
            .await;

        let account = CalendarAccount {
            user_id: f.user_id,
            credential: Some(credential(Duration::hours(1), None)),
        };
        let id = f.client.create_event(&account, &event()).await.unwrap();
        assert_eq!(id, "evt-123");
    }

    #[tokio::test]
    async fn test_refreshes_expired_token_and_persists_it() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&f.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(header("authorization", "Bearer ya29.fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "evt-456"})))
            .expect(1)
            .mount(&f.server)
            .await;

        let account = CalendarAccount {
            user_id: f.user_id,
            credential: Some(credential(-Duration::minutes(5), Some("1//refresh"))),
        };
        let id = f.client.create_event(&account, &event()).await.unwrap();
        assert_eq!(id, "evt-456");

        let stored = f.credentials.get(f.user_id).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "ya29.fresh");
        assert_eq!(stored.refresh_token.as_deref(), Some("1//refresh"));
        assert!(!stored.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token() {
        let f = fixture().await;
        let account = CalendarAccount {
            user_id: f.user_id,
            credential: Some(credential(-Duration::minutes(5), None)),
        };
        let result = f.client.create_event(&account, &event()).await;
        assert!(matches!(result, Err(CalendarError::CredentialExpired(_))));
    }

    #[tokio::test]
    async fn test_refused_refresh_is_unavailable() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&f.server)
            .await;

        let account = CalendarAccount {
            user_id: f.user_id,
            credential: Some(credential(-Duration::minutes(5), Some("1//revoked"))),
        };
        let result = f.client.create_event(&account, &event()).await;
        assert!(matches!(result, Err(CalendarError::CredentialExpired(_))));
        assert!(f.credentials.get(f.user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remote_failure_and_timeout() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&f.server)
            .await;

        let account = CalendarAccount {
            user_id: f.user_id,
            credential: Some(credential(Duration::hours(1), None)),
        };
        let result = f.client.create_event(&account, &event()).await;
        assert!(matches!(result, Err(CalendarError::Remote(_))));

        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "late"}))
                    .set_delay(std::time::Duration::from_secs(2)),
            )
            .mount(&f.server)
            .await;
        let result = f.client.create_event(&account, &event()).await;
        assert_eq!(result, Err(CalendarError::Timeout));
    }

    #[tokio::test]
    async fn test_out_of_range_expires_in_is_an_error() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "expires_in": i64::MAX
            })))
            .mount(&f.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "never"})))
            .expect(0)
            .mount(&f.server)
            .await;

        let account = CalendarAccount {
            user_id: f.user_id,
            credential: Some(credential(-Duration::minutes(5), Some("1//refresh"))),
        };
        let result = f.client.create_event(&account, &event()).await;
        assert!(matches!(result, Err(CalendarError::CredentialExpired(_))));
        assert!(f.credentials.get(f.user_id).await.unwrap().is_none());

        let linked = f.client.link(f.user_id, "4/code").await;
        assert!(matches!(linked, Err(CalendarError::Remote(_))));
    }

    #[test]
    fn test_token_expiry_bounds() {
        assert!(token_expiry(3600).is_some());
        assert!(token_expiry(i64::MAX).is_none());
        assert!(token_expiry(i64::MIN).is_none());
    }

    #[tokio::test]
    async fn test_authorization_url_carries_state_and_offline_access() {
        let f = fixture().await;
        let url = f.client.authorization_url("estado-assinado").unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        let params: std::collections::HashMap<String, String> =
            parsed.query_pairs().into_owned().collect();

        assert_eq!(parsed.host_str(), Some("accounts.example.com"));
        assert_eq!(params["client_id"], "client");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["scope"], CALENDAR_SCOPE);
        assert_eq!(params["redirect_uri"], "http://localhost:8080/calendar/callback");
        assert_eq!(params["state"], "estado-assinado");
    }

    #[tokio::test]
    async fn test_link_exchanges_code_and_stores_credential() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=4%2Fcode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.linked",
                "refresh_token": "1//linked",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&f.server)
            .await;

        let linked = f.client.link(f.user_id, "4/code").await.unwrap();
        assert_eq!(linked.access_token, "ya29.linked");

        let stored = f.credentials.get(f.user_id).await.unwrap().unwrap();
        assert_eq!(stored.access_token, linked.access_token);
        assert_eq!(stored.refresh_token.as_deref(), Some("1//linked"));
    }

    #[tokio::test]
    async fn test_link_rejected_code_stores_nothing() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&f.server)
            .await;

        let result = f.client.link(f.user_id, "4/stale").await;
        assert!(matches!(result, Err(CalendarError::Remote(_))));
        assert!(f.credentials.get(f.user_id).await.unwrap().is_none());
    }
}
