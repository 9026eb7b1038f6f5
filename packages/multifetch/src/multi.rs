//! The request multiplexer.
//!
//! [`Multi`] owns every in-flight request, admits new ones under a fixed
//! ceiling, and turns transport completions into callback invocations. All
//! progress happens on the caller's thread: [`Multi::work`] never blocks,
//! and [`Multi::select`] is the single place that waits on the OS.
//!
//! ## Example
//!
//! ```ignore
//! use multifetch::{Callbacks, Multi};
//!
//! let mut multi = Multi::new()?;
//!
//! for url in ["https://example.com/a", "https://example.com/b"] {
//!     multi.get(
//!         url,
//!         Callbacks::new(move |response| {
//!             println!("{}: {} bytes", url, response.body.len());
//!             Ok(())
//!         })
//!         .on_failure(move |error| {
//!             eprintln!("{}: {}", url, error);
//!             Ok(())
//!         }),
//!     )?;
//! }
//!
//! // Drive everything to completion
//! multi.drain()?;
//! ```
//!
//! An application with its own descriptors can share the wait instead:
//!
//! ```ignore
//! loop {
//!     let ready = multi.select(&[stdin_fd], &[])?;
//!     if ready.read.contains(&stdin_fd) {
//!         handle_input()?;
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::os::unix::io::RawFd;

use crate::config::Config;
use crate::error::{CallbackError, Error};
use crate::readiness::{self, Ready};
use crate::record::{Finished, Record};
use crate::transport::curl::CurlTransport;
use crate::transport::{Token, Transport};
use crate::types::{Callbacks, Request};

/// Drives many HTTP requests at once from a single thread.
pub struct Multi<T: Transport = CurlTransport> {
    transport: T,
    live: HashMap<Token, Record>,
    next_token: usize,
    config: Config,
}

impl Multi<CurlTransport> {
    /// A multiplexer over libcurl with the default configuration.
    pub fn new() -> Result<Self, Error> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self, Error> {
        let transport = CurlTransport::new(&config);
        Self::with_transport(transport, config)
    }
}

impl<T: Transport> Multi<T> {
    /// A multiplexer over any transport.
    pub fn with_transport(transport: T, config: Config) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            transport,
            live: HashMap::new(),
            next_token: 0,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of requests registered and not yet finished.
    pub fn size(&self) -> usize {
        self.live.len()
    }

    /// Queue a GET of `url`.
    pub fn get(&mut self, url: &str, callbacks: Callbacks) -> Result<(), Error> {
        self.enqueue(Request::get(url)?, callbacks)
    }

    /// Queue a form-encoded POST of `params` to `url`.
    pub fn post<I, K, V>(&mut self, url: &str, params: I, callbacks: Callbacks) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.enqueue(Request::post_form(url, params)?, callbacks)
    }

    /// Register `request` with the transport and run one cycle.
    ///
    /// When the admission ceiling is reached this waits, through
    /// `select(&[], &[])`, until a request finishes and frees a slot. Callback
    /// errors from those cycles are held back until the new request has been
    /// registered and then returned like [`work`](Self::work) returns them.
    /// A transport refusal is returned immediately and nothing is registered;
    /// callback errors collected before it come back inside
    /// [`Error::Interrupted`].
    pub fn enqueue(&mut self, request: Request, callbacks: Callbacks) -> Result<(), Error> {
        let mut errors = Vec::new();
        match self.admit(request, callbacks, &mut errors) {
            Ok(()) => Error::collected(errors),
            Err(error) => Err(error.after_callbacks(errors)),
        }
    }

    /// Advance the transport once without blocking and run the callbacks of
    /// every request that finished.
    ///
    /// A failing callback does not stop the others. If exactly one fails its
    /// error is returned unchanged; if several fail they are returned together
    /// as [`Error::Multiple`].
    pub fn work(&mut self) -> Result<(), Error> {
        let mut errors = Vec::new();
        self.work_into(&mut errors)?;
        Error::collected(errors)
    }

    /// Wait until one of the caller's descriptors is ready, advancing the
    /// transport after every wake-up.
    ///
    /// With both slices empty this waits once (at most for the transport's
    /// recommended timeout), runs one cycle and returns an empty [`Ready`].
    /// Otherwise it keeps waiting until a caller descriptor is ready.
    pub fn select(&mut self, read: &[RawFd], write: &[RawFd]) -> Result<Ready, Error> {
        let mut errors = Vec::new();
        match self.select_into(read, write, &mut errors) {
            Ok(ready) => Error::collected(errors).map(|()| ready),
            Err(error) => Err(error.after_callbacks(errors)),
        }
    }

    /// Run `select(&[], &[])` until no requests are left in flight.
    pub fn drain(&mut self) -> Result<(), Error> {
        while !self.live.is_empty() {
            self.select(&[], &[])?;
        }
        Ok(())
    }

    /// Forget every in-flight request. Their callbacks never run.
    pub fn cleanup(&mut self) {
        if !self.live.is_empty() {
            tracing::debug!("discarding {} in-flight requests", self.live.len());
        }
        self.live.clear();
        self.transport.clear();
    }

    fn admit(
        &mut self,
        request: Request,
        callbacks: Callbacks,
        errors: &mut Vec<CallbackError>,
    ) -> Result<(), Error> {
        while self.live.len() >= self.config.max_in_flight {
            tracing::debug!(
                "{} requests in flight, waiting for a slot before {}",
                self.live.len(),
                request.url()
            );
            self.select_into(&[], &[], errors)?;
        }

        let token = Token(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);

        let record = Record::new(request.url().clone(), callbacks);
        self.transport.register(token, &request, record.sink())?;
        self.live.insert(token, record);

        tracing::debug!("{} {} queued as {:?}", request.method(), request.url(), token);

        self.work_into(errors)
    }

    fn select_into(
        &mut self,
        read: &[RawFd],
        write: &[RawFd],
        errors: &mut Vec<CallbackError>,
    ) -> Result<Ready, Error> {
        loop {
            let interest = self.transport.interest()?;
            let ready = readiness::wait(&interest, read, write)?;

            // The transport's own sockets may be what woke us up.
            self.work_into(errors)?;

            if !ready.is_empty() {
                return Ok(ready);
            }
            if (read.is_empty() && write.is_empty()) || !errors.is_empty() {
                return Ok(Ready::default());
            }
        }
    }

    fn work_into(&mut self, errors: &mut Vec<CallbackError>) -> Result<(), Error> {
        let completions = self.transport.advance()?;
        if completions.is_empty() {
            return Ok(());
        }

        let mut finished = Vec::with_capacity(completions.len());
        for completion in completions {
            let Some(record) = self.live.remove(&completion.token) else {
                tracing::trace!("ignoring completion of discarded {:?}", completion.token);
                continue;
            };
            tracing::debug!(
                "{} finished with status {} after {} bytes",
                record.url(),
                completion.http_status,
                record.body_len()
            );
            finished.push(record.complete(completion.transport, completion.http_status));
        }

        let (failed, succeeded): (Vec<_>, Vec<_>) =
            finished.into_iter().partition(Finished::is_failure);

        for done in succeeded.into_iter().chain(failed) {
            let url = done.url().clone();
            if let Err(error) = done.run() {
                tracing::warn!("callback for {} failed: {}", url, error);
                errors.push(error);
            }
        }

        Ok(())
    }
}

impl<T: Transport> fmt::Debug for Multi<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<&Token> = self.live.keys().collect();
        tokens.sort();
        f.debug_struct("Multi")
            .field(
                "live",
                &tokens
                    .into_iter()
                    .map(|token| self.live[token].url().as_str())
                    .collect::<Vec<_>>(),
            )
            .field("max_in_flight", &self.config.max_in_flight)
            .finish()
    }
}
