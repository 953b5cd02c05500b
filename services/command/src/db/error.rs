use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// An environment variable holds an unusable value.
    #[error("invalid {var}: {message}")]
    Config { var: &'static str, message: String },

    /// A stored row could not be mapped back to an event.
    #[error("corrupt event row at position {position}: {message}")]
    CorruptRow { position: i64, message: String },
}
