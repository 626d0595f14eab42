use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("proxy {0} not found")]
    ProxyNotFound(i32),
}

pub type Result<T> = std::result::Result<T, DbError>;
