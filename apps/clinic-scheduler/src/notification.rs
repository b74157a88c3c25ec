//! Envio de e-mails de confirmação pelo relay HTTP
//!
//! O relay recebe `{action, to, ...payload}` e cuida do template e do SMTP.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::NotificationConfig;

/// Modelo de e-mail que o relay deve montar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TemplateKind {
    #[serde(rename = "SIGNUP_WELCOME")]
    WelcomeSignup,
    #[serde(rename = "BOOKING_CONFIRMATION")]
    BookingConfirmation,
}

/// Lado da consulta que recebe a confirmação
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Patient,
    Doctor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WelcomePayload {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingConfirmationPayload {
    pub patient_name: String,
    pub doctor_name: String,
    pub appointment_date: String,
    pub appointment_time: String,
    pub recipient_type: RecipientType,
}

/// Dados estruturados enviados junto ao modelo
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    Welcome(WelcomePayload),
    BookingConfirmation(BookingConfirmationPayload),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Falha ao enviar e-mail para {recipient}: {detail}")]
pub struct DeliveryFailed {
    pub recipient: String,
    pub detail: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        kind: TemplateKind,
        recipient: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryFailed>;
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    action: TemplateKind,
    to: &'a str,
    #[serde(flatten)]
    payload: &'a NotificationPayload,
}

/// Notificador que publica no serviço de e-mail
pub struct HttpEmailNotifier {
    http: reqwest::Client,
    url: String,
}

impl HttpEmailNotifier {
    pub fn new(config: &NotificationConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            url: config.email_service_url.clone(),
        })
    }
}

#[async_trait]
impl Notifier for HttpEmailNotifier {
    async fn send(
        &self,
        kind: TemplateKind,
        recipient: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryFailed> {
        let failed = |detail: String| DeliveryFailed {
            recipient: recipient.to_string(),
            detail,
        };

        let response = self
            .http
            .post(&self.url)
            .json(&EmailRequest {
                action: kind,
                to: recipient,
                payload,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    failed("tempo esgotado".to_string())
                } else {
                    failed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(failed(format!("relay respondeu {}", response.status())));
        }

        debug!(?kind, recipient, "E-mail entregue ao relay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(server: &MockServer, timeout: Duration) -> HttpEmailNotifier {
        HttpEmailNotifier::new(&NotificationConfig {
            email_service_url: format!("{}/dev/send-email", server.uri()),
            request_timeout: timeout,
        })
        .unwrap()
    }

    fn confirmation() -> NotificationPayload {
        NotificationPayload::BookingConfirmation(BookingConfirmationPayload {
            patient_name: "Pedro Lima".to_string(),
            doctor_name: "Ana Souza".to_string(),
            appointment_date: "2025-06-01".to_string(),
            appointment_time: "10:00:00".to_string(),
            recipient_type: RecipientType::Patient,
        })
    }

    #[tokio::test]
    async fn test_booking_confirmation_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dev/send-email"))
            .and(body_json(serde_json::json!({
                "action": "BOOKING_CONFIRMATION",
                "to": "pedro@exemplo.com",
                "patient_name": "Pedro Lima",
                "doctor_name": "Ana Souza",
                "appointment_date": "2025-06-01",
                "appointment_time": "10:00:00",
                "recipient_type": "patient"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server, Duration::from_secs(1))
            .send(TemplateKind::BookingConfirmation, "pedro@exemplo.com", &confirmation())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_welcome_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "action": "SIGNUP_WELCOME",
                "to": "ana@clinica.med.br",
                "name": "Ana Souza",
                "role": "doctor"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let payload = NotificationPayload::Welcome(WelcomePayload {
            name: "Ana Souza".to_string(),
            role: "doctor".to_string(),
        });
        notifier(&server, Duration::from_secs(1))
            .send(TemplateKind::WelcomeSignup, "ana@clinica.med.br", &payload)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_relay_error_is_delivery_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = notifier(&server, Duration::from_secs(1))
            .send(TemplateKind::BookingConfirmation, "pedro@exemplo.com", &confirmation())
            .await
            .unwrap_err();
        assert_eq!(err.recipient, "pedro@exemplo.com");
        assert!(err.detail.contains("500"));
    }

    #[tokio::test]
    async fn test_slow_relay_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = notifier(&server, Duration::from_millis(200))
            .send(TemplateKind::BookingConfirmation, "pedro@exemplo.com", &confirmation())
            .await
            .unwrap_err();
        assert_eq!(err.detail, "tempo esgotado");
    }
}
