use std::fmt;
use std::os::unix::io::RawFd;

/// Error returned by a success or failure callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`Multi`](crate::Multi) operations.
///
/// Per-request failures never show up here; they are handed to the request's
/// failure callback as a [`RequestError`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Exactly one callback failed during a cycle. The callback's own error is
    /// carried unchanged.
    #[error("{0}")]
    Callback(CallbackError),

    /// More than one callback failed during a cycle.
    #[error(transparent)]
    Multiple(#[from] MultiError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("curl error: {0}")]
    Curl(#[from] curl::Error),

    #[error("curl multi error: {0}")]
    CurlMulti(#[from] curl::MultiError),

    /// The transport refused a request for a reason other than the
    /// admission ceiling.
    #[error("Request for {url} rejected: {message}")]
    Rejected { url: String, message: String },

    #[error("select(): {0}")]
    Select(#[source] std::io::Error),

    #[error("Invalid file descriptor: {0}")]
    InvalidDescriptor(RawFd),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A transport or OS failure ended a call after callbacks had already
    /// failed during it. Both are kept.
    #[error("{source}; {callbacks}")]
    Interrupted {
        #[source]
        source: Box<Error>,
        callbacks: MultiError,
    },
}

impl Error {
    /// Folds the callback errors collected during a cycle into a result.
    ///
    /// No errors is success, a single error is returned as-is and anything
    /// more becomes a [`MultiError`].
    pub(crate) fn collected(mut errors: Vec<CallbackError>) -> Result<(), Error> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(Error::Callback(errors.remove(0))),
            _ => Err(Error::Multiple(MultiError { errors })),
        }
    }

    /// Attaches callback errors collected earlier in the same call, so a later
    /// failure does not hide them.
    pub(crate) fn after_callbacks(self, errors: Vec<CallbackError>) -> Error {
        if errors.is_empty() {
            return self;
        }
        Error::Interrupted {
            source: Box::new(self),
            callbacks: MultiError { errors },
        }
    }

    /// The callback errors carried by this error, if it came from callbacks.
    pub fn callback_errors(&self) -> &[CallbackError] {
        match self {
            Error::Callback(error) => std::slice::from_ref(error),
            Error::Multiple(multi) => &multi.errors,
            Error::Interrupted { callbacks, .. } => &callbacks.errors,
            _ => &[],
        }
    }
}

/// Several callbacks failed in the same cycle.
#[derive(Debug)]
pub struct MultiError {
    /// Collected errors, in the order the callbacks ran.
    pub errors: Vec<CallbackError>,
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multiple errors: [")?;
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", error)?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for MultiError {}

/// Why a single request failed. Delivered to its failure callback.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The transport reported a non-OK result (connect, DNS, TLS, ...).
    Transport { code: i64, message: String },

    /// The transfer completed but the status was not 200.
    Http { status: u32 },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Transport { code, message } => {
                write!(f, "Transport error {}: {}", code, message)
            }
            RequestError::Http { status } => {
                let reason = u16::try_from(*status)
                    .ok()
                    .and_then(|code| http::StatusCode::from_u16(code).ok())
                    .and_then(|code| code.canonical_reason());
                match reason {
                    Some(reason) => write!(f, "HTTP error {} {}", status, reason),
                    None => write!(f, "HTTP error {}", status),
                }
            }
        }
    }
}

impl RequestError {
    /// HTTP status for [`RequestError::Http`].
    pub fn status(&self) -> Option<u32> {
        match self {
            RequestError::Http { status } => Some(*status),
            RequestError::Transport { .. } => None,
        }
    }
}
