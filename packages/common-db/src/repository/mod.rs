//! Repositórios sobre o pool SQLite
//!
//! Operações que participam da transação de reserva recebem a transação
//! aberta pelo chamador; as demais usam o pool diretamente.

pub mod appointments;
pub mod credentials;
pub mod slots;
pub mod users;

pub use appointments::AppointmentRepository;
pub use credentials::CredentialRepository;
pub use slots::SlotRepository;
pub use users::UserRepository;

/// Transação SQLite aberta a partir do pool
pub type DbTransaction = sqlx::Transaction<'static, sqlx::Sqlite>;

/// Linha devolvida por uma escrita autocommit com `RETURNING`
///
/// O commit implícito só acontece quando a instrução chega ao fim; por isso
/// essas escritas usam `fetch_all`, que só retorna depois disso.
pub(crate) fn returned_row<T>(rows: Vec<T>) -> Option<T> {
    rows.into_iter().next()
}
