//! Configuração do serviço carregada de variáveis de ambiente

use std::net::SocketAddr;
use std::time::Duration;

use common_db::DbConfig;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Variável de ambiente obrigatória ausente: {0}")]
    Missing(&'static str),

    #[error("Valor inválido para {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Formato de saída dos logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Limite de requisições atendidas simultaneamente
    pub max_concurrent_requests: usize,
}

/// Integração com o Google Calendar
#[derive(Debug, Clone)]
pub struct CalendarConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Endereço de consentimento OAuth
    pub auth_url: String,
    pub token_url: String,
    /// Callback registrado no Google para a vinculação da conta
    pub redirect_uri: String,
    pub api_base: String,
    /// Fuso exibido nos eventos criados
    pub timezone: String,
    pub request_timeout: Duration,
}

/// Serviço de e-mail (relay HTTP)
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub email_service_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DbConfig,
    pub jwt_secret: String,
    pub calendar: CalendarConfig,
    pub notification: NotificationConfig,
    /// Limite de cada efeito colateral após o commit
    pub side_effect_timeout: Duration,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Monta a configuração a partir de uma função de consulta de variáveis
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let bind_addr = parse(&lookup, "BIND_ADDR", "0.0.0.0:8080")?;
        let max_concurrent_requests = positive(&lookup, "MAX_CONCURRENT_REQUESTS", "128")?;
        let side_effect_timeout = Duration::from_secs(positive(&lookup, "SIDE_EFFECT_TIMEOUT_SECS", "5")?);

        let key_phrase = lookup("DATABASE_KEY").ok_or(ConfigError::Missing("DATABASE_KEY"))?;
        let jwt_secret = lookup("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let log_format = match get("LOG_FORMAT", "text").as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        let defaults = DbConfig::default();
        Ok(Self {
            server: ServerConfig {
                bind_addr,
                max_concurrent_requests,
            },
            database: DbConfig {
                db_path: get("DATABASE_PATH", &defaults.db_path),
                key_phrase,
                key_salt: get("DATABASE_KEY_SALT", &defaults.key_salt),
                max_connections: positive(&lookup, "DATABASE_MAX_CONNECTIONS", "5")?,
                busy_timeout: Duration::from_secs(parse(&lookup, "DATABASE_BUSY_TIMEOUT_SECS", "5")?),
            },
            jwt_secret,
            calendar: CalendarConfig {
                client_id: get("GOOGLE_CALENDAR_CLIENT_ID", ""),
                client_secret: get("GOOGLE_CALENDAR_CLIENT_SECRET", ""),
                auth_url: get("GOOGLE_AUTH_URL", "https://accounts.google.com/o/oauth2/auth"),
                token_url: get("GOOGLE_TOKEN_URL", "https://oauth2.googleapis.com/token"),
                redirect_uri: get("GOOGLE_REDIRECT_URI", "http://localhost:8080/calendar/callback"),
                api_base: get("GOOGLE_CALENDAR_API_BASE", "https://www.googleapis.com/calendar/v3"),
                timezone: get("CALENDAR_TIMEZONE", "UTC"),
                request_timeout: side_effect_timeout,
            },
            notification: NotificationConfig {
                email_service_url: get("EMAIL_SERVICE_URL", "http://localhost:3000/dev/send-email"),
                request_timeout: side_effect_timeout,
            },
            side_effect_timeout,
            log_format,
        })
    }
}

fn parse<T, F>(lookup: &F, var: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(var).unwrap_or_else(|| default.to_string());
    value.parse().map_err(|_| ConfigError::Invalid { var, value })
}

/// Como [`parse`], recusando zero
fn positive<T, F>(lookup: &F, var: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
    F: Fn(&str) -> Option<String>,
{
    let value: T = parse(lookup, var, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
        });
    }
    Ok(value)
}
