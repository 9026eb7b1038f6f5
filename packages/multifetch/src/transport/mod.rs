//! Transport abstraction for driving fetches.
//!
//! [`Multi`](crate::Multi) only talks to the HTTP engine through the
//! [`Transport`] trait, so the engine can be swapped for a scripted one in
//! tests without touching the network.

pub mod curl;

use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::Error;
use crate::types::Request;

/// Identifies one registered request for the lifetime of its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

/// Receives a request's body as the transport reads it.
///
/// The transport holds one sink per registered handle and calls
/// [`add_chunk`](ChunkSink::add_chunk) zero or more times, always before the
/// request's [`Completion`] is reported.
pub trait ChunkSink {
    fn add_chunk(&mut self, chunk: &[u8]);
}

/// Low-level failure reported by the transport for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub code: i64,
    pub message: String,
}

/// A request the transport has finished with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub token: Token,

    /// `Ok` when the transfer itself succeeded, whatever the HTTP status.
    pub transport: Result<(), TransportFailure>,

    /// Status of the response, or 0 if none was received.
    pub http_status: u32,
}

/// Descriptors the transport wants watched before its next advance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interest {
    pub read: Vec<RawFd>,
    pub write: Vec<RawFd>,

    /// Longest the caller should wait before advancing again. `None` means
    /// the transport has no preference.
    pub timeout: Option<Duration>,
}

/// A non-blocking HTTP engine.
///
/// The admission ceiling is not the transport's concern; `Multi` checks it
/// before calling [`register`](Transport::register).
pub trait Transport {
    /// Start fetching `request`. Body chunks go to `sink`.
    ///
    /// Errors here are not retried.
    fn register(
        &mut self,
        token: Token,
        request: &Request,
        sink: Box<dyn ChunkSink>,
    ) -> Result<(), Error>;

    /// Perform whatever I/O is possible right now and return the requests
    /// that finished. Never blocks.
    fn advance(&mut self) -> Result<Vec<Completion>, Error>;

    /// Descriptors and timeout to wait on before the next advance.
    fn interest(&mut self) -> Result<Interest, Error>;

    /// Drop every registered request without reporting it.
    fn clear(&mut self);
}

/// Scripted transport for testing.
///
/// Responses are looked up by URL. Each one completes after a configurable
/// number of advances, and its body is delivered to the sink in two chunks
/// just before completion.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// What the mock transport does with a matching request.
    #[derive(Debug, Clone)]
    pub struct MockResponse {
        pub status: u32,
        pub body: Vec<u8>,
        pub failure: Option<TransportFailure>,
        /// Advances needed before the request completes.
        pub cycles: usize,
    }

    impl MockResponse {
        /// A 200 response with the given body, done on the next advance.
        pub fn ok(body: impl Into<Vec<u8>>) -> Self {
            Self {
                status: 200,
                body: body.into(),
                failure: None,
                cycles: 1,
            }
        }

        /// A response with the given status and an empty body.
        pub fn status(status: u32) -> Self {
            Self {
                status,
                body: Vec::new(),
                failure: None,
                cycles: 1,
            }
        }

        /// A transfer that fails before any response arrives.
        pub fn transport_failure(code: i64, message: &str) -> Self {
            Self {
                status: 0,
                body: Vec::new(),
                failure: Some(TransportFailure {
                    code,
                    message: message.to_string(),
                }),
                cycles: 1,
            }
        }

        /// Complete only after `cycles` advances.
        pub fn after(mut self, cycles: usize) -> Self {
            self.cycles = cycles.max(1);
            self
        }
    }

    struct InFlight {
        token: Token,
        remaining: usize,
        response: MockResponse,
        sink: Box<dyn ChunkSink>,
    }

    /// A transport that completes requests according to a script.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        /// Responses keyed by URL.
        responses: Arc<Mutex<HashMap<String, MockResponse>>>,
        /// Response used when no URL matches.
        default_response: Arc<Mutex<Option<MockResponse>>>,
        /// Error message to refuse registrations with.
        refuse_with: Arc<Mutex<Option<String>>>,
        in_flight: Arc<Mutex<Vec<InFlight>>>,
        recorded_requests: Arc<Mutex<Vec<Request>>>,
        advances: Arc<Mutex<usize>>,
        clears: Arc<Mutex<usize>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a response for a specific URL.
        pub fn with_response(self, url: impl Into<String>, response: MockResponse) -> Self {
            self.responses.lock().unwrap().insert(url.into(), response);
            self
        }

        /// Set a default response when no URL matches.
        pub fn with_default_response(self, response: MockResponse) -> Self {
            *self.default_response.lock().unwrap() = Some(response);
            self
        }

        /// Refuse every registration with a non-retryable error.
        pub fn refuse_with(self, message: impl Into<String>) -> Self {
            *self.refuse_with.lock().unwrap() = Some(message.into());
            self
        }

        /// URLs of all registered requests, in registration order.
        pub fn registered(&self) -> Vec<String> {
            self.recorded_requests
                .lock()
                .unwrap()
                .iter()
                .map(|request| request.url().to_string())
                .collect()
        }

        pub fn recorded_requests(&self) -> Vec<Request> {
            self.recorded_requests.lock().unwrap().clone()
        }

        pub fn in_flight(&self) -> usize {
            self.in_flight.lock().unwrap().len()
        }

        pub fn advances(&self) -> usize {
            *self.advances.lock().unwrap()
        }

        pub fn clears(&self) -> usize {
            *self.clears.lock().unwrap()
        }

        fn response_for(&self, request: &Request) -> MockResponse {
            if let Some(response) = self.responses.lock().unwrap().get(request.url().as_str()) {
                return response.clone();
            }
            if let Some(ref response) = *self.default_response.lock().unwrap() {
                return response.clone();
            }
            MockResponse::status(404)
        }
    }

    impl Transport for MockTransport {
        fn register(
            &mut self,
            token: Token,
            request: &Request,
            sink: Box<dyn ChunkSink>,
        ) -> Result<(), Error> {
            if let Some(message) = self.refuse_with.lock().unwrap().clone() {
                return Err(Error::Rejected {
                    url: request.url().to_string(),
                    message,
                });
            }

            let response = self.response_for(request);
            self.recorded_requests.lock().unwrap().push(request.clone());
            self.in_flight.lock().unwrap().push(InFlight {
                token,
                remaining: response.cycles,
                response,
                sink,
            });
            Ok(())
        }

        fn advance(&mut self) -> Result<Vec<Completion>, Error> {
            *self.advances.lock().unwrap() += 1;

            let mut in_flight = self.in_flight.lock().unwrap();
            let mut completions = Vec::new();
            let mut still_running = Vec::with_capacity(in_flight.len());

            for mut entry in in_flight.drain(..) {
                entry.remaining -= 1;
                if entry.remaining > 0 {
                    still_running.push(entry);
                    continue;
                }

                let (head, tail) = entry.response.body.split_at(entry.response.body.len() / 2);
                for chunk in [head, tail] {
                    if !chunk.is_empty() {
                        entry.sink.add_chunk(chunk);
                    }
                }

                completions.push(Completion {
                    token: entry.token,
                    transport: match entry.response.failure {
                        Some(failure) => Err(failure),
                        None => Ok(()),
                    },
                    http_status: entry.response.status,
                });
            }

            *in_flight = still_running;
            Ok(completions)
        }

        fn interest(&mut self) -> Result<Interest, Error> {
            let timeout = if self.in_flight.lock().unwrap().is_empty() {
                None
            } else {
                Some(Duration::ZERO)
            };

            Ok(Interest {
                timeout,
                ..Interest::default()
            })
        }

        fn clear(&mut self) {
            self.in_flight.lock().unwrap().clear();
            *self.clears.lock().unwrap() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockResponse, MockTransport};
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Collected(Rc<RefCell<Vec<Vec<u8>>>>);

    impl ChunkSink for Collected {
        fn add_chunk(&mut self, chunk: &[u8]) {
            self.0.borrow_mut().push(chunk.to_vec());
        }
    }

    #[test]
    fn mock_completes_after_configured_cycles() {
        let mut transport = MockTransport::new().with_response(
            "http://example.com/slow",
            MockResponse::ok("slow body").after(3),
        );
        let sink = Collected::default();
        let request = Request::get("http://example.com/slow").unwrap();

        transport
            .register(Token(7), &request, Box::new(sink.clone()))
            .unwrap();

        assert!(transport.advance().unwrap().is_empty());
        assert!(transport.advance().unwrap().is_empty());
        assert!(sink.0.borrow().is_empty());

        let completions = transport.advance().unwrap();
        assert_eq!(
            completions,
            vec![Completion {
                token: Token(7),
                transport: Ok(()),
                http_status: 200,
            }]
        );
        assert_eq!(sink.0.borrow().concat(), b"slow body".to_vec());
        assert_eq!(sink.0.borrow().len(), 2);
        assert_eq!(transport.advances(), 3);
    }

    #[test]
    fn mock_returns_404_when_no_match() {
        let mut transport = MockTransport::new();
        let request = Request::get("http://example.com/missing").unwrap();
        transport
            .register(Token(0), &request, Box::new(Collected::default()))
            .unwrap();

        let completions = transport.advance().unwrap();
        assert_eq!(completions[0].http_status, 404);
        assert_eq!(completions[0].transport, Ok(()));
    }

    #[test]
    fn mock_reports_transport_failures() {
        let mut transport = MockTransport::new()
            .with_default_response(MockResponse::transport_failure(7, "connection refused"));
        let request = Request::get("http://example.com/").unwrap();
        transport
            .register(Token(1), &request, Box::new(Collected::default()))
            .unwrap();

        let completions = transport.advance().unwrap();
        assert_eq!(
            completions[0].transport,
            Err(TransportFailure {
                code: 7,
                message: "connection refused".to_string()
            })
        );
    }

    #[test]
    fn mock_interest_reflects_in_flight_requests() {
        let mut transport = MockTransport::new();
        assert_eq!(transport.interest().unwrap().timeout, None);

        let request = Request::get("http://example.com/").unwrap();
        transport
            .register(Token(1), &request, Box::new(Collected::default()))
            .unwrap();
        assert_eq!(transport.interest().unwrap().timeout, Some(Duration::ZERO));

        transport.clear();
        assert_eq!(transport.in_flight(), 0);
        assert_eq!(transport.interest().unwrap().timeout, None);
        assert_eq!(transport.clears(), 1);
    }

    #[test]
    fn mock_refuses_registration_when_configured() {
        let mut transport = MockTransport::new().refuse_with("no");
        let request = Request::get("http://example.com/").unwrap();
        let result = transport.register(Token(1), &request, Box::new(Collected::default()));
        assert!(matches!(result, Err(Error::Rejected { .. })));
        assert!(transport.registered().is_empty());
    }
}
