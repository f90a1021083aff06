#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),
}

impl DbError {
    /// True when the statement hit a unique constraint
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::SqlxError(sqlx::Error::Database(e)) => e.is_unique_violation(),
            _ => false,
        }
    }
}
