use thiserror::Error;

/// Application-wide error types.
///
/// This enum represents every failure the crawler, the writer and the
/// collaborator jobs can surface. It uses `thiserror` for ergonomic
/// conversion from the underlying library errors.
///
/// # Error Conversion
///
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
/// - `std::io::Error` → `AppError::IoError`
///
/// # Fetch-side taxonomy
///
/// The storefront client maps HTTP statuses onto dedicated variants so the
/// pagination loop can decide what to do without inspecting raw responses:
///
/// | Status      | Variant                          | Fetcher reaction              |
/// |-------------|----------------------------------|-------------------------------|
/// | 404, 400    | [`AppError::EndpointNotFound`]   | try the next endpoint         |
/// | 401         | [`AppError::AuthRequired`]       | abandon the origin            |
/// | 429         | [`AppError::RateLimitExceeded`]  | back off, retry the same page |
/// | other       | [`AppError::ClientError`]        | propagate                     |
///
/// # Examples
///
/// ```
/// use storecrawl_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Wraps every SQLx error, including connection failures, query errors
    /// and constraint violations. Use [`crate::writer::PersistenceFailure::classify`]
    /// to decide whether a batch should be retried.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// HTTP request failed with a status the crawler has no special policy for,
    /// or the transport failed in a way that is neither a timeout nor a
    /// connection error.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A response body could not be decoded into the expected shape.
    #[error("Invalid JSON: {0}")]
    InvalidPayload(String),

    /// The catalog endpoint does not exist on this origin (HTTP 404 or 400).
    #[error("Endpoint not available: HTTP {status} from {url}")]
    EndpointNotFound { status: u16, url: String },

    /// None of the candidate catalog endpoints exist on this origin.
    #[error("No product endpoint found for {0}")]
    NotFound(String),

    /// The origin demands credentials (HTTP 401).
    #[error("Authentication required")]
    AuthRequired,

    /// Network or connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded (HTTP 429 or a store-side throttling signal).
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// Filesystem error while reading the origin list or writing the dump.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration error, such as an unreadable origin list or an invalid URL.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    ///
    /// Use this sparingly - prefer creating specific error variants
    /// for better error handling and debugging.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Check DATABASE_URL or run without persistence.".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::ClientError(msg) => {
                if msg.contains("timeout") || msg.contains("timed out") {
                    "Request timed out. The storefront may be slow or unreachable.".to_string()
                } else if msg.contains("connect") {
                    format!(
                        "Cannot connect to storefront: {}\n   Check your internet connection.",
                        msg
                    )
                } else {
                    format!("Request failed: {}", msg)
                }
            }
            AppError::NotFound(origin) => {
                format!("{} does not expose a public products endpoint.", origin)
            }
            AppError::AuthRequired => {
                "The storefront requires authentication; password-protected shops are skipped."
                    .to_string()
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => {
                format!(
                    "Request timed out after {} seconds.\n   The storefront may be overloaded.",
                    secs
                )
            }
            AppError::RateLimitExceeded => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            AppError::ConfigError(msg) => {
                format!("Configuration error: {}\n   Check your flags and .env file.", msg)
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// # Examples
    ///
    /// ```
    /// use storecrawl_core::error::AppError;
    ///
    /// let err = AppError::NetworkError("connection reset".to_string());
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::RateLimitExceeded;
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::AuthRequired;
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::DatabaseError(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }

    /// Short reason string recorded against a failed origin in the run report.
    ///
    /// Transport and decoding failures are prefixed the same way whatever
    /// their exact variant, so the report groups them consistently.
    pub fn failure_reason(&self) -> String {
        match self {
            AppError::AuthRequired => "Authentication required".to_string(),
            AppError::NotFound(_) => "No product endpoint".to_string(),
            AppError::ClientError(_)
            | AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::EndpointNotFound { .. } => format!("Request failed: {}", self),
            AppError::InvalidPayload(msg) => format!("Invalid JSON: {}", msg),
            AppError::SerializationError(e) => format!("Invalid JSON: {}", e),
            other => format!("Unexpected error: {}", other),
        }
    }
}
