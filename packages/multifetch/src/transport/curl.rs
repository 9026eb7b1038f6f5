//! libcurl multi-interface transport.
//!
//! Every request becomes an easy handle attached to one multi handle. Body
//! bytes flow from libcurl's write callback straight into the request's
//! [`ChunkSink`]; completions are read from the multi handle's message queue
//! after each `perform`.

use std::collections::HashMap;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;
use std::sync::Once;
use std::time::Duration;

use curl::easy::{Easy2, Handler, InfoType, List, WriteError};
use curl::multi::{Easy2Handle, Multi};

use crate::config::Config;
use crate::error::Error;
use crate::transport::{ChunkSink, Completion, Interest, Token, Transport, TransportFailure};
use crate::types::{Request, FORM_CONTENT_TYPE};

/// Wait suggested when libcurl has transfers running but exposes neither
/// descriptors nor a timeout (e.g. while resolving names on a thread).
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

static GLOBAL_INIT: Once = Once::new();

/// Performs libcurl's process-wide initialization.
///
/// Runs at most once per process no matter how often it is called. Called
/// by [`CurlTransport::new`], so calling it directly is only needed to pay
/// the cost up front, before any other threads exist.
pub fn init() {
    GLOBAL_INIT.call_once(|| {
        curl::init();
        tracing::debug!("libcurl {} initialized", curl::Version::get().version());
    });
}

impl From<curl::Error> for TransportFailure {
    fn from(error: curl::Error) -> Self {
        Self {
            code: i64::from(error.code()),
            message: error.to_string(),
        }
    }
}

impl From<curl::MultiError> for TransportFailure {
    fn from(error: curl::MultiError) -> Self {
        Self {
            code: i64::from(error.code()),
            message: error.to_string(),
        }
    }
}

/// Easy-handle callbacks for one request.
struct Collector {
    sink: Box<dyn ChunkSink>,
}

impl Handler for Collector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.sink.add_chunk(data);
        Ok(data.len())
    }

    fn debug(&mut self, kind: InfoType, data: &[u8]) {
        let prefix = match kind {
            InfoType::Text => "*",
            InfoType::HeaderIn => "<",
            InfoType::HeaderOut => ">",
            _ => return,
        };
        tracing::trace!("{} {}", prefix, String::from_utf8_lossy(data).trim_end());
    }
}

/// [`Transport`] backed by a libcurl multi handle.
pub struct CurlTransport {
    handles: HashMap<Token, Easy2Handle<Collector>>,
    multi: Multi,
    user_agent: Option<String>,
    connect_timeout: Option<Duration>,
    verbose: bool,
}

impl CurlTransport {
    pub fn new(config: &Config) -> Self {
        init();

        Self {
            handles: HashMap::new(),
            multi: Multi::new(),
            user_agent: config.user_agent.clone(),
            connect_timeout: config.connect_timeout(),
            verbose: config.verbose,
        }
    }

    /// Build an easy handle for `request`.
    fn easy_handle(
        &self,
        request: &Request,
        sink: Box<dyn ChunkSink>,
    ) -> Result<Easy2<Collector>, Error> {
        let mut easy = Easy2::new(Collector { sink });
        easy.url(request.url().as_str())?;

        match request.body() {
            Some(body) => {
                easy.post(true)?;
                easy.post_fields_copy(body)?;

                let mut headers = List::new();
                headers.append(&format!("Content-Type: {}", FORM_CONTENT_TYPE))?;
                easy.http_headers(headers)?;
            }
            None => easy.get(true)?,
        }

        if let Some(user_agent) = &self.user_agent {
            easy.useragent(user_agent)?;
        }
        if let Some(timeout) = self.connect_timeout {
            easy.connect_timeout(timeout)?;
        }
        easy.verbose(self.verbose)?;

        Ok(easy)
    }

    /// Remove a finished handle from the multi handle and read its status.
    fn detach(&self, handle: Easy2Handle<Collector>) -> Result<u32, TransportFailure> {
        let easy = self.multi.remove2(handle)?;
        Ok(easy.response_code()?)
    }
}

/// Builds the completion for a finished transfer. A failed transfer wins over
/// a failed detach; either way the request is reported, with status 0 when
/// none could be read.
fn completion(
    token: Token,
    result: Result<(), curl::Error>,
    detached: Result<u32, TransportFailure>,
) -> Completion {
    match (result, detached) {
        (result, Ok(http_status)) => Completion {
            token,
            transport: result.map_err(TransportFailure::from),
            http_status,
        },
        (Err(error), Err(_)) => Completion {
            token,
            transport: Err(error.into()),
            http_status: 0,
        },
        (Ok(()), Err(failure)) => Completion {
            token,
            transport: Err(failure),
            http_status: 0,
        },
    }
}

impl Transport for CurlTransport {
    fn register(
        &mut self,
        token: Token,
        request: &Request,
        sink: Box<dyn ChunkSink>,
    ) -> Result<(), Error> {
        let easy = self.easy_handle(request, sink)?;
        let mut handle = self.multi.add2(easy)?;
        handle.set_token(token.0)?;
        self.handles.insert(token, handle);

        tracing::trace!("registered {} {} as {:?}", request.method(), request.url(), token);
        Ok(())
    }

    fn advance(&mut self) -> Result<Vec<Completion>, Error> {
        self.multi.perform()?;

        let handles = &self.handles;
        let mut finished = Vec::new();
        self.multi.messages(|message| {
            let Ok(token) = message.token() else {
                return;
            };
            let token = Token(token);
            if let Some(result) = handles
                .get(&token)
                .and_then(|handle| message.result_for2(handle))
            {
                finished.push((token, result));
            }
        });

        let mut completions = Vec::with_capacity(finished.len());
        for (token, result) in finished {
            let Some(handle) = self.handles.remove(&token) else {
                continue;
            };
            let detached = self.detach(handle);
            if let Err(failure) = &detached {
                tracing::warn!("failed to detach {:?}: {}", token, failure.message);
            }
            completions.push(completion(token, result, detached));
        }

        Ok(completions)
    }

    fn interest(&mut self) -> Result<Interest, Error> {
        let mut read = empty_fd_set();
        let mut write = empty_fd_set();
        let mut except = empty_fd_set();

        let max_fd = self
            .multi
            .fdset2(Some(&mut read), Some(&mut write), Some(&mut except))?;

        let mut interest = Interest {
            timeout: self.multi.get_timeout()?,
            ..Interest::default()
        };

        if let Some(max_fd) = max_fd {
            for fd in 0..=max_fd {
                if fd_is_set(fd, &read) || fd_is_set(fd, &except) {
                    interest.read.push(fd);
                }
                if fd_is_set(fd, &write) {
                    interest.write.push(fd);
                }
            }
        }

        if interest.read.is_empty()
            && interest.write.is_empty()
            && interest.timeout.is_none()
            && !self.handles.is_empty()
        {
            interest.timeout = Some(IDLE_POLL_INTERVAL);
        }

        Ok(interest)
    }

    fn clear(&mut self) {
        for (token, handle) in self.handles.drain() {
            if let Err(error) = self.multi.remove2(handle) {
                tracing::warn!("failed to detach {:?} from multi handle: {}", token, error);
            }
        }
    }
}

fn empty_fd_set() -> libc::fd_set {
    let mut set = MaybeUninit::<libc::fd_set>::uninit();
    // SAFETY: FD_ZERO initializes every bit of the set.
    unsafe {
        libc::FD_ZERO(set.as_mut_ptr());
        set.assume_init()
    }
}

fn fd_is_set(fd: RawFd, set: &libc::fd_set) -> bool {
    // SAFETY: libcurl only reports descriptors below FD_SETSIZE.
    unsafe { libc::FD_ISSET(fd, set) }
}
