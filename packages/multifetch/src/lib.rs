//! # multifetch
//!
//! Many concurrent HTTP fetches driven from a single thread.
//!
//! A [`Multi`] registers requests with a non-blocking transport (libcurl's
//! multi interface by default), collects each response body as it streams
//! in, and runs exactly one of the request's callbacks when it finishes.
//! Nothing happens in the background: progress is made only inside
//! [`Multi::enqueue`], [`Multi::work`] and [`Multi::select`].
//!
//! ## Fetching
//!
//! ```ignore
//! use multifetch::{Callbacks, Multi};
//!
//! let mut multi = Multi::new()?;
//!
//! multi.get(
//!     "https://example.com/",
//!     Callbacks::new(|response| {
//!         println!("{}", response.text());
//!         Ok(())
//!     }),
//! )?;
//!
//! multi.post(
//!     "https://example.com/search",
//!     [("q", "rust"), ("page", "2")],
//!     Callbacks::new(|_| Ok(())).on_failure(|error| {
//!         eprintln!("search failed: {}", error);
//!         Ok(())
//!     }),
//! )?;
//!
//! while multi.size() > 0 {
//!     multi.select(&[], &[])?;
//! }
//! ```
//!
//! ## Failures
//!
//! Only a 200 response counts as success. Transport failures and any other
//! status go to the failure callback as a [`RequestError`]. Errors returned
//! by callbacks surface from the call that ran them: one error as
//! [`Error::Callback`], several from the same cycle as [`Error::Multiple`].
//!
//! ## Backpressure
//!
//! At most [`Config::max_in_flight`] requests are registered at once (500 by
//! default). Enqueueing past the ceiling drives the transport until a slot
//! frees, so a caller can enqueue in a plain loop without tracking capacity.
//!
//! ## Logging
//!
//! Lifecycle events are emitted through `tracing`: queueing, completion and
//! backpressure at `debug`, failing callbacks at `warn`, and libcurl's
//! transfer chatter (with [`Config::verbose`]) at `trace`. Install any
//! subscriber to see them.

pub mod config;
pub mod error;
pub mod multi;
pub mod readiness;
pub mod transport;
pub mod types;

mod record;

// Re-export main types
pub use config::{Config, DEFAULT_MAX_IN_FLIGHT};
pub use error::{CallbackError, Error, MultiError, RequestError};
pub use multi::Multi;
pub use readiness::Ready;
pub use transport::curl::{init, CurlTransport};
pub use transport::{ChunkSink, Completion, Interest, Token, Transport, TransportFailure};
pub use types::{encode_params, CallbackResult, Callbacks, Method, Request, Response};
