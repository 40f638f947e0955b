//! failure classification for retry policy

use crate::SendError;

/// how a failed attempt is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorClass {
    /// stale/duplicate/underpriced-replacement sequence: reconcile, then resend
    SequenceConflict,
    /// congestion or temporary fee/budget rejection: wait, then resend
    Transient,
    /// no healthy route at selection time: attempt counted, then resend
    RouteUnavailable,
    /// anything else: stop
    Fatal,
}

impl ErrorClass {
    #[inline]
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Fatal)
    }
}

/// backend messages meaning the sequence number is wrong.
/// checked first: "replacement transaction underpriced" is a conflict.
const CONFLICT_MARKERS: &[&str] = &[
    "nonce too low",
    "nonce too high",
    "invalid nonce",
    "already known",
    "known transaction",
    "replacement transaction underpriced",
    "nonce has already been used",
    "transaction already imported",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "underpriced",
    "insufficient funds for gas",
    "gas required exceeds",
    "intrinsic gas too low",
    "max fee per gas less than block base fee",
    "txpool is full",
    "too many requests",
    "rate limit",
    "timeout",
    "timed out",
    "temporarily",
    "connection",
    "busy",
];

/// classify a send failure
pub fn classify(error: &SendError) -> ErrorClass {
    match error {
        SendError::SequenceConflict(_) => ErrorClass::SequenceConflict,
        SendError::Transient(_) | SendError::Timeout => ErrorClass::Transient,
        SendError::RouteUnavailable => ErrorClass::RouteUnavailable,
        SendError::Unsupported => ErrorClass::Fatal,
        SendError::Rejected(message) => classify_message(message),
        // the egress failed, not the payload: another route may work
        SendError::Transport(message) => match classify_message(message) {
            ErrorClass::Fatal => ErrorClass::Transient,
            class => class,
        },
    }
}

/// classify a raw backend error message
pub fn classify_message(message: &str) -> ErrorClass {
    let message = message.to_ascii_lowercase();
    if CONFLICT_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorClass::SequenceConflict
    } else if TRANSIENT_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_variants() {
        assert_eq!(
            classify(&SendError::SequenceConflict("x".into())),
            ErrorClass::SequenceConflict
        );
        assert_eq!(classify(&SendError::Timeout), ErrorClass::Transient);
        assert_eq!(
            classify(&SendError::RouteUnavailable),
            ErrorClass::RouteUnavailable
        );
        assert_eq!(classify(&SendError::Unsupported), ErrorClass::Fatal);
    }

    #[test]
    fn test_conflict_messages() {
        for msg in [
            "nonce too low",
            "Nonce too high: expected 4",
            "already known",
            "replacement transaction underpriced",
            "ERR: nonce has already been used",
        ] {
            assert_eq!(
                classify(&SendError::Rejected(msg.into())),
                ErrorClass::SequenceConflict,
                "{}",
                msg
            );
        }
    }

    #[test]
    fn test_transient_messages() {
        for msg in [
            "transaction underpriced",
            "insufficient funds for gas * price + value",
            "txpool is full",
            "429 Too Many Requests",
        ] {
            assert_eq!(
                classify(&SendError::Rejected(msg.into())),
                ErrorClass::Transient,
                "{}",
                msg
            );
        }
    }

    #[test]
    fn test_unknown_rejection_is_fatal() {
        assert_eq!(
            classify(&SendError::Rejected("execution reverted".into())),
            ErrorClass::Fatal
        );
        assert!(!ErrorClass::Fatal.is_retryable());
        assert!(ErrorClass::RouteUnavailable.is_retryable());
    }

    #[test]
    fn test_route_fault_follows_class() {
        // same condition, either representation
        assert!(SendError::Transient("txpool is full".into()).is_route_fault());
        assert!(SendError::Rejected("txpool is full".into()).is_route_fault());
        assert!(SendError::Rejected("429 Too Many Requests".into()).is_route_fault());
        assert_eq!(
            SendError::Rejected("txpool is full".into()).class(),
            SendError::Transient("txpool is full".into()).class()
        );

        assert!(!SendError::Rejected("nonce too low".into()).is_route_fault());
        assert!(!SendError::Rejected("execution reverted".into()).is_route_fault());
        assert!(!SendError::RouteUnavailable.is_route_fault());
    }

    #[test]
    fn test_transport_never_fatal() {
        assert_eq!(
            classify(&SendError::Transport("proxy auth required".into())),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&SendError::Transport("nonce too low".into())),
            ErrorClass::SequenceConflict
        );
    }
}
