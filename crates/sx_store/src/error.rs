use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Write rejected by store: {0}")]
    WriteRejected(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
