use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("usage view refresh failed: {0}")]
    RefreshFailed(#[from] rota_db::DbError),
}
