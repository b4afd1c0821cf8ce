//! Delivery failure classification.

use std::error::Error as StdError;

use crate::BrokerError;

const RETRYABLE_MARKER: &str = "retryable";

/// How a failed send should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to clear after a delay; goes through the retry topic.
    Transient,
    /// Will never succeed; goes straight to the fail topic.
    Terminal,
}

impl ErrorClass {
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Classify a send failure.
///
/// One level of the cause chain is unwrapped: if `error` has a source, the source is
/// inspected instead. The root is transient when it is a timeout, queue-full,
/// retriable or connection broker error, or when its message mentions "retryable"
/// (case-insensitive). Everything else is terminal.
pub fn classify(error: &(dyn StdError + 'static)) -> ErrorClass {
    let root = error.source().unwrap_or(error);

    // `Wrapped` keeps its cause boxed, so the source surfaces as `Box<BrokerError>`.
    let broker = root
        .downcast_ref::<BrokerError>()
        .or_else(|| root.downcast_ref::<Box<BrokerError>>().map(|b| &**b));

    if let Some(broker) = broker {
        if matches!(
            broker,
            BrokerError::Timeout(_)
                | BrokerError::QueueFull(_)
                | BrokerError::Retriable(_)
                | BrokerError::Connection(_)
        ) {
            return ErrorClass::Transient;
        }
    }

    if root
        .to_string()
        .to_lowercase()
        .contains(RETRYABLE_MARKER)
    {
        return ErrorClass::Transient;
    }

    ErrorClass::Terminal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_transient() {
        let err = BrokerError::Timeout("request timed out".into());
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn buffer_exhaustion_is_transient() {
        let err = BrokerError::QueueFull("local queue full".into());
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn retriable_broker_conditions_are_transient() {
        assert!(classify(&BrokerError::Retriable("not leader for partition".into())).is_transient());
        assert!(classify(&BrokerError::Connection("connection refused".into())).is_transient());
    }

    #[test]
    fn retryable_marker_in_message_is_transient() {
        let err = BrokerError::Rejected("broker says: RETRYABLE condition".into());
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn serialization_and_authorization_are_terminal() {
        assert_eq!(
            classify(&BrokerError::Serialization("bad payload".into())),
            ErrorClass::Terminal
        );
        assert_eq!(
            classify(&BrokerError::Authorization("topic denied".into())),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn wrapped_cause_is_inspected() {
        let err = BrokerError::wrap(
            "send failed",
            BrokerError::Timeout("metadata not available".into()),
        );
        assert_eq!(classify(&err), ErrorClass::Transient);

        let err = BrokerError::wrap(
            "send failed (retryable?)",
            BrokerError::Authorization("denied".into()),
        );
        // The wrapper's own message is not consulted once a cause exists.
        assert_eq!(classify(&err), ErrorClass::Terminal);
    }

    #[test]
    fn every_wrapped_transient_kind_stays_transient() {
        let causes = [
            BrokerError::Timeout("t".into()),
            BrokerError::QueueFull("q".into()),
            BrokerError::Retriable("r".into()),
            BrokerError::Connection("c".into()),
        ];
        for cause in causes {
            let err = BrokerError::wrap("delivery failed", cause.clone());
            assert_eq!(classify(&err), ErrorClass::Transient, "{cause:?}");
        }
    }

    #[test]
    fn foreign_errors_are_classified_by_message() {
        let io = std::io::Error::other("temporarily unavailable, Retryable");
        assert_eq!(classify(&io), ErrorClass::Transient);

        let io = std::io::Error::other("disk full");
        assert_eq!(classify(&io), ErrorClass::Terminal);
    }
}
