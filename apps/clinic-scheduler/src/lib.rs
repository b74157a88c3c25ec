//! Serviço de agendamento de consultas
//!
//! Reserva atômica de horários com sincronização de agenda e
//! notificações por e-mail executadas depois do commit.

pub mod auth;
pub mod booking;
pub mod build_info;
pub mod calendar;
pub mod config;
pub mod error;
pub mod notification;
pub mod routes;
pub mod state;
pub mod telemetry;
