use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures reported to an HTTP caller, each carrying the correlation id that
/// ties the response to the server log.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "Verification failed",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. } | Self::Forbidden { correlation_id, .. } => {
                correlation_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::InterfaceError;

    #[test]
    fn bad_request_hides_parser_detail_from_user() {
        let error = InterfaceError::BadRequest {
            message: "expected value at line 1 column 1".to_owned(),
            correlation_id: "req-1".to_owned(),
        };

        assert_eq!(error.correlation_id(), "req-1");
        assert_eq!(
            error.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
        assert!(error.to_string().contains("line 1 column 1"));
    }

    #[test]
    fn forbidden_reports_failed_verification() {
        let error = InterfaceError::Forbidden {
            message: "verify token mismatch".to_owned(),
            correlation_id: "req-2".to_owned(),
        };

        assert_eq!(error.user_message(), "Verification failed");
        assert_eq!(error.correlation_id(), "req-2");
    }
}
