//! Error type for the bus-facing operations.

use crate::domain::foundation::{DestinationId, DomainError, ErrorCode, ValidationError};
use crate::domain::recovery::RecoveryError;
use crate::ports::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Destination not found: {0}")]
    DestinationNotFound(DestinationId),

    #[error("Event bus is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

impl EventBusError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EventBusError::Validation(_) => ErrorCode::ValidationFailed,
            EventBusError::Storage(StorageError::MessageNotFound(_)) => ErrorCode::MessageNotFound,
            EventBusError::Storage(_) => ErrorCode::StorageError,
            EventBusError::DestinationNotFound(_) => ErrorCode::DestinationNotFound,
            EventBusError::ShuttingDown => ErrorCode::ShuttingDown,
            EventBusError::Recovery(_) => ErrorCode::InternalError,
        }
    }
}

impl From<EventBusError> for DomainError {
    fn from(err: EventBusError) -> Self {
        DomainError::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_domain_codes() {
        let err: DomainError = EventBusError::DestinationNotFound(DestinationId::new()).into();
        assert_eq!(err.code, ErrorCode::DestinationNotFound);

        let err: DomainError = EventBusError::from(ValidationError::empty_field("url")).into();
        assert_eq!(err.code, ErrorCode::ValidationFailed);

        let err: DomainError = EventBusError::from(StorageError::Closed).into();
        assert_eq!(err.code, ErrorCode::StorageError);
    }
}
