/// User primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of a migration, batch, or rollback operation (UUID v7, time-ordered).
pub type OperationId = uuid::Uuid;
