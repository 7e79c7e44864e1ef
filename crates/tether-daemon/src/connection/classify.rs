/// Remote errors that will not clear up by retrying soon. They still get
/// retried, just on the long fatal backoff.
pub const FATAL_ERROR_PATTERNS: &[&str] = &[
    "machine not found",
    "permission denied",
    "permission_denied",
    "invalid_grant",
    "unauthenticated",
    "machine has been deleted",
    "not registered",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

pub fn classify(error: &str) -> ErrorClass {
    let lower = error.to_lowercase();
    if FATAL_ERROR_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClass::Fatal
    } else {
        ErrorClass::Transient
    }
}
