/// Domain errors raised by the capture/annotation/mapping state machine.
///
/// Geometry failures are recoverable: callers skip the overlay or abort
/// the gesture. Validation and state errors reject a single intent and
/// leave all other state untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Geometry unavailable: {0}")]
    Geometry(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
