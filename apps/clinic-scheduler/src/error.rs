//! Erros da API e mapeamento para respostas HTTP

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common_db::DbError;
use serde::Serialize;
use tracing::error;

use crate::booking::BookingError;
use crate::calendar::CalendarError;

/// Corpo JSON padrão de erro
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    /// Código estável para máquinas
    pub code: &'static str,
    /// Mensagem segura para o cliente
    pub message: String,
}

/// Erro HTTP com código estável
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<BookingError> for ApiError {
    fn from(error: BookingError) -> Self {
        match &error {
            BookingError::NotFound(_) => ApiError::not_found(error.to_string()),
            BookingError::SlotUnavailable { .. } => ApiError::conflict("SLOT_UNAVAILABLE", error.to_string()),
            BookingError::SlotExpired(_) => {
                ApiError::new(StatusCode::GONE, "SLOT_EXPIRED", error.to_string())
            }
            BookingError::ConstraintViolation(_) => {
                ApiError::internal("Não foi possível concluir a reserva")
            }
            BookingError::Storage(e) => {
                error!(error = %e, "Falha de armazenamento durante a reserva");
                ApiError::internal("Não foi possível concluir a reserva")
            }
        }
    }
}

impl From<DbError> for ApiError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::NotFound(what) => ApiError::not_found(format!("{} não encontrado", what)),
            DbError::SlotBooked(_) => {
                ApiError::conflict("SLOT_BOOKED", "Não é possível remover um horário reservado")
            }
            DbError::ConstraintViolation(detail) => ApiError::conflict("CONFLICT", detail),
            other => {
                error!(error = %other, "Falha de armazenamento");
                ApiError::internal("Erro interno")
            }
        }
    }
}

impl From<CalendarError> for ApiError {
    fn from(error: CalendarError) -> Self {
        match error {
            CalendarError::Storage(detail) => {
                error!(detail = %detail, "Falha ao gravar credencial de agenda");
                ApiError::internal("Erro interno")
            }
            other => ApiError::new(StatusCode::BAD_GATEWAY, "CALENDAR_LINK_FAILED", other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION", errors.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_booking_errors_map_to_statuses() {
        let id = Uuid::new_v4();
        let cases = [
            (BookingError::NotFound(id), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                BookingError::SlotUnavailable { slot_id: id, lost_race: true },
                StatusCode::CONFLICT,
                "SLOT_UNAVAILABLE",
            ),
            (BookingError::SlotExpired(id), StatusCode::GONE, "SLOT_EXPIRED"),
            (
                BookingError::ConstraintViolation("UNIQUE constraint failed".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
            ),
        ];

        for (error, status, code) in cases {
            let api: ApiError = error.into();
            assert_eq!(api.status(), status);
            assert_eq!(api.code(), code);
        }
    }

    #[test]
    fn test_calendar_link_errors() {
        let remote: ApiError = CalendarError::Remote("status 400".to_string()).into();
        assert_eq!(remote.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(remote.code(), "CALENDAR_LINK_FAILED");

        let storage: ApiError = CalendarError::Storage("calendar_credentials".to_string()).into();
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!storage.message.contains("calendar_credentials"));
    }

    #[test]
    fn test_constraint_detail_is_not_leaked() {
        let api: ApiError = BookingError::ConstraintViolation("appointments.doctor_id".to_string()).into();
        assert!(!api.message.contains("appointments"));
    }
}
