//! Error types shared by every layer of the storage substrate.

/// Result type alias used throughout `contextd-core` and its dependents.
pub type Result<T> = std::result::Result<T, Error>;

/// Error sentinel kinds for the storage subsystem (see spec §6.2).
///
/// Each variant names a specific failure mode so that callers can pattern
/// match on `code()` rather than parsing message strings.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The call-local tenant context was absent (fail-closed).
    #[error("tenant context missing")]
    MissingTenant,

    /// The tenant id failed sanitisation (`[a-z0-9][a-z0-9_]{0,62}[a-z0-9]?`).
    #[error("invalid tenant id: {0}")]
    InvalidTenant(String),

    /// A caller-supplied filter attempted to override a stamped tenant-scope key.
    #[error("filter key '{0}' is reserved for tenant isolation")]
    TenantFilterInjection(String),

    /// An embedded collection has document files but no metadata file.
    #[error("collection '{0}' has no metadata file (corrupt)")]
    CollectionMetadataMissing(String),

    /// The named collection does not exist.
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    /// A write could not be completed and any partial effects were rolled back.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The secret scrubber reported an error; the write was rejected fail-closed.
    #[error("scrubbing failed: {0}")]
    ScrubbingFailed(String),

    /// The embedding provider could not produce a vector for the given input.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A branch's token budget has been exhausted.
    #[error("budget exhausted")]
    BudgetExhausted,

    /// A rate limit (branch creation, HTTP ingress, ...) was exceeded.
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// A backend call did not complete within its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The remote/local backend could not be reached at all.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// A confidence value fell outside `[0, 1]`.
    #[error("invalid confidence value: {0}")]
    InvalidConfidence(f32),

    /// An outcome string was not one of the recognised values.
    #[error("invalid outcome: {0}")]
    InvalidOutcome(String),

    /// Caller is not authorized for the requested operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Generic validation failure (required field missing, length limit, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// WAL entry checksum did not match its canonical encoding.
    #[error("WAL entry checksum mismatch for entry {0}")]
    ChecksumMismatch(String),

    /// WAL entry operation was not one of the whitelisted kinds.
    #[error("WAL entry operation not permitted: {0}")]
    InvalidWalOperation(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Circuit breaker is open; the call was rejected without reaching the backend.
    #[error("circuit breaker open")]
    CircuitBreakerOpen,

    /// Configuration error (unrecognised option, malformed file, ...).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Stable string code for this error, used by callers that need to match
    /// on error identity (e.g. the `contextd-server` response envelope).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::MissingTenant => "MissingTenant",
            Error::InvalidTenant(_) => "InvalidTenant",
            Error::TenantFilterInjection(_) => "TenantFilterInjection",
            Error::CollectionMetadataMissing(_) => "CollectionMetadataMissing",
            Error::CollectionNotFound(_) => "CollectionNotFound",
            Error::WriteFailed(_) => "WriteFailed",
            Error::ScrubbingFailed(_) => "ScrubbingFailed",
            Error::EmbeddingUnavailable(_) => "EmbeddingUnavailable",
            Error::BudgetExhausted => "BudgetExhausted",
            Error::RateLimitExceeded(_) => "RateLimitExceeded",
            Error::Timeout(_) => "Timeout",
            Error::Unreachable(_) => "Unreachable",
            Error::InvalidConfidence(_) => "InvalidConfidence",
            Error::InvalidOutcome(_) => "InvalidOutcome",
            Error::Unauthorized(_) => "Unauthorized",
            Error::Validation(_) => "Validation",
            Error::ChecksumMismatch(_) => "ChecksumMismatch",
            Error::InvalidWalOperation(_) => "InvalidWalOperation",
            Error::Serialization(_) => "Serialization",
            Error::Io(_) => "Io",
            Error::CircuitBreakerOpen => "CircuitBreakerOpen",
            Error::Configuration(_) => "Configuration",
        }
    }

    /// Whether this error is recoverable — i.e. a retry at a higher layer
    /// (sync manager, health monitor) might succeed. Mirrors the policy in
    /// spec §7: validation/authorization errors are never retried,
    /// transient/system errors are.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::Unreachable(_)
                | Error::CircuitBreakerOpen
                | Error::WriteFailed(_)
                | Error::EmbeddingUnavailable(_)
                | Error::Io(_)
        )
    }
}
