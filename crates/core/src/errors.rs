use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Turn-level failures. A turn that returns one of these leaves the conversation untouched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("intent classification failed: {0}")]
    Classification(String),
    #[error("knowledge retrieval failed: {0}")]
    Retrieval(String),
    #[error("answer generation failed: {0}")]
    Generation(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl TurnError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Classification(_) => "classification_failure",
            Self::Retrieval(_) => "retrieval_failure",
            Self::Generation(_) => "generation_failure",
            Self::Domain(_) => "domain_failure",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Retryable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("temporarily unavailable: {message}")]
    Retryable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Retryable { .. } => {
                "Sorry, I couldn't process that just now. Please try again."
            }
            Self::Internal { .. } => {
                "Sorry, something went wrong on my side. Please try again."
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Retryable { correlation_id, .. } | Self::Internal { correlation_id, .. } => {
                correlation_id
            }
        }
    }
}

impl From<TurnError> for InterfaceError {
    fn from(value: TurnError) -> Self {
        let message = value.to_string();
        match value {
            TurnError::Classification(_) | TurnError::Retrieval(_) | TurnError::Generation(_) => {
                Self::Retryable { message, correlation_id: "unassigned".to_owned() }
            }
            TurnError::Domain(_) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{DomainError, InterfaceError, TurnError};

    #[test]
    fn collaborator_failures_map_to_retryable_interface_error() {
        for error in [
            TurnError::Classification("connection refused".to_owned()),
            TurnError::Retrieval("index unavailable".to_owned()),
            TurnError::Generation("timed out after 30s".to_owned()),
        ] {
            let interface = error.into_interface("turn-1");
            assert!(matches!(
                interface,
                InterfaceError::Retryable { ref correlation_id, .. } if correlation_id == "turn-1"
            ));
            assert_eq!(
                interface.user_message(),
                "Sorry, I couldn't process that just now. Please try again."
            );
        }
    }

    #[test]
    fn domain_failure_maps_to_internal() {
        let interface =
            TurnError::from(DomainError::InvariantViolation("lead field overwrite".to_owned()))
                .into_interface("turn-2");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.correlation_id(), "turn-2");
    }

    #[test]
    fn error_class_names_are_stable() {
        assert_eq!(
            TurnError::Classification(String::new()).error_class(),
            "classification_failure"
        );
        assert_eq!(TurnError::Retrieval(String::new()).error_class(), "retrieval_failure");
        assert_eq!(TurnError::Generation(String::new()).error_class(), "generation_failure");
    }
}
