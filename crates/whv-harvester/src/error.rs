use thiserror::Error;

/// Cause of a single failed fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchCause {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("dns resolution failed: {0}")]
    Dns(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("malformed url: {0}")]
    MalformedUrl(String),
    #[error("error reading body: {0}")]
    Body(String),
    #[error("{0}")]
    Other(String),
}

impl FetchCause {
    /// Whether a retry could plausibly succeed. 429 handling is a policy
    /// choice surfaced through configuration.
    pub fn is_transient(&self, retry_on_429: bool) -> bool {
        match self {
            Self::Timeout | Self::Connect(_) | Self::Body(_) => true,
            Self::Status(429) => retry_on_429,
            Self::Status(code) => (500..600).contains(code),
            Self::Dns(_) | Self::MalformedUrl(_) | Self::Other(_) => false,
        }
    }
}

/// Terminal fetch failure, after classification and (for transient causes)
/// retry exhaustion.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("giving up on {url} after {attempts} attempts: {cause}")]
    Exhausted {
        url: String,
        attempts: u32,
        cause: FetchCause,
    },
    #[error("permanent failure for {url}: {cause}")]
    Permanent {
        url: String,
        attempts: u32,
        cause: FetchCause,
    },
}

impl FetchError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Permanent { attempts, .. } => *attempts,
        }
    }

    pub fn cause(&self) -> &FetchCause {
        match self {
            Self::Exhausted { cause, .. } | Self::Permanent { cause, .. } => cause,
        }
    }
}

/// Why a page was dropped without being stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("text shorter than configured minimum")]
    TooShort,
    #[error("language not in allowed set")]
    LanguageNotAllowed,
    #[error("blocklist phrase matched: {0:?}")]
    BlocklistMatch(String),
    #[error("disallowed by robots.txt")]
    RejectedByPolicy,
}

/// Why a downloaded image payload was discarded. These are permanent
/// verdicts about the payload, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ImageReject {
    #[error("empty payload")]
    Empty,
    #[error("unrecognized image signature")]
    UnknownSignature,
    #[error("payload exceeds configured size limit")]
    Oversized,
}

/// A storage sink failed to accept a record. Fatal for the run: once a sink
/// is unwritable the run cannot guarantee data integrity.
#[derive(Debug, Error)]
#[error("storage sink `{sink}` failed for record from {source_url}")]
pub struct StoreError {
    pub sink: &'static str,
    pub source_url: String,
    #[source]
    pub source: std::io::Error,
}
