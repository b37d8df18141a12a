use serde::{Deserialize, Serialize};

/// Events that drive task status transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// A worker takes ownership of a claimable task
    Claim,
    /// The worker starts running the handler
    Start,
    /// The handler succeeded
    Complete,
    /// The handler failed with an error message
    Fail(String),
    /// Operator or producer cancellation
    Cancel,
}

impl TaskEvent {
    /// Stable name used in log fields and transition errors
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
        }
    }

    /// Handler error carried by a `Fail` event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(message) => Some(message),
            _ => None,
        }
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        assert_eq!(TaskEvent::Claim.event_type(), "claim");
        assert_eq!(TaskEvent::fail_with_error("boom").event_type(), "fail");
        assert_eq!(
            TaskEvent::fail_with_error("boom").error_message(),
            Some("boom")
        );
        assert_eq!(TaskEvent::Cancel.error_message(), None);
    }
}
