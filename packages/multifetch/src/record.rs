//! Per-request state tracked by [`Multi`](crate::Multi).
//!
//! A [`Record`] is a pending fetch. The transport streams body chunks into it
//! through the [`ChunkSink`] it holds for the request's handle. When the
//! transport reports completion, [`Record::complete`] consumes the record and
//! produces a [`Finished`] value, which is either a success or a failure and
//! can run its callback exactly once.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use url::Url;

use crate::error::RequestError;
use crate::transport::{ChunkSink, TransportFailure};
use crate::types::{CallbackResult, Callbacks, FailureFn, Response, SuccessFn};

/// The only HTTP status treated as success.
pub const HTTP_OK: u32 = 200;

/// Append-only response body, shared between a record and the sink the
/// transport holds for it.
#[derive(Clone, Default)]
pub(crate) struct BodyBuffer(Rc<RefCell<Vec<u8>>>);

impl BodyBuffer {
    fn len(&self) -> usize {
        self.0.borrow().len()
    }

    fn take(&self) -> Vec<u8> {
        mem::take(&mut *self.0.borrow_mut())
    }
}

impl ChunkSink for BodyBuffer {
    fn add_chunk(&mut self, chunk: &[u8]) {
        self.0.borrow_mut().extend_from_slice(chunk);
    }
}

/// A registered fetch that has not finished yet.
pub(crate) struct Record {
    url: Url,
    body: BodyBuffer,
    callbacks: Callbacks,
}

impl Record {
    pub(crate) fn new(url: Url, callbacks: Callbacks) -> Self {
        Self {
            url,
            body: BodyBuffer::default(),
            callbacks,
        }
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    /// Sink the transport writes this record's body chunks into.
    pub(crate) fn sink(&self) -> Box<dyn ChunkSink> {
        Box::new(self.body.clone())
    }

    pub(crate) fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Applies the transport's completion signal.
    ///
    /// A transport failure wins over the HTTP status; otherwise anything but
    /// 200 is an HTTP failure.
    pub(crate) fn complete(
        self,
        transport: Result<(), TransportFailure>,
        http_status: u32,
    ) -> Finished {
        let Callbacks { success, failure } = self.callbacks;

        let error = match transport {
            Err(cause) => Some(RequestError::Transport {
                code: cause.code,
                message: cause.message,
            }),
            Ok(()) if http_status != HTTP_OK => Some(RequestError::Http {
                status: http_status,
            }),
            Ok(()) => None,
        };

        match error {
            Some(error) => Finished::Failure {
                url: self.url,
                error,
                failure,
            },
            None => Finished::Success {
                response: Response {
                    url: self.url,
                    status: http_status,
                    body: self.body.take(),
                },
                success,
            },
        }
    }
}

/// A record after its one-way transition out of the pending state.
pub(crate) enum Finished {
    Success {
        response: Response,
        success: SuccessFn,
    },
    Failure {
        url: Url,
        error: RequestError,
        failure: FailureFn,
    },
}

impl Finished {
    pub(crate) fn is_failure(&self) -> bool {
        matches!(self, Finished::Failure { .. })
    }

    pub(crate) fn url(&self) -> &Url {
        match self {
            Finished::Success { response, .. } => &response.url,
            Finished::Failure { url, .. } => url,
        }
    }

    /// Runs whichever callback matches the outcome.
    pub(crate) fn run(self) -> CallbackResult {
        match self {
            Finished::Success { response, success } => success(response),
            Finished::Failure { error, failure, .. } => failure(error),
        }
    }
}
