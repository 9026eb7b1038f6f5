use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CallbackError, RequestError};

/// Content type declared for form-encoded POST bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP method for requests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    GET,
    POST,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::GET => write!(f, "GET"),
            Method::POST => write!(f, "POST"),
        }
    }
}

/// A fetch to hand to [`Multi::enqueue`](crate::Multi::enqueue).
///
/// The URL is parsed when the request is built, so a malformed URL is
/// reported before anything is registered with the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    url: Url,
    body: Option<Vec<u8>>,
}

impl Request {
    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            method: Method::GET,
            url: Url::parse(url)?,
            body: None,
        })
    }

    /// A POST whose body is `params` encoded as `key=value&...`.
    ///
    /// Parameters keep the iteration order of `params`.
    pub fn post_form<I, K, V>(url: &str, params: I) -> Result<Self, url::ParseError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Ok(Self {
            method: Method::POST,
            url: Url::parse(url)?,
            body: Some(encode_params(params).into_bytes()),
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request body. `None` for GET.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// Encodes parameters as an `application/x-www-form-urlencoded` string.
pub fn encode_params<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key.as_ref(), value.as_ref());
    }
    serializer.finish()
}

/// A successfully completed fetch, handed to the success callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: Url,

    /// HTTP status code. Always 200 for responses given to success callbacks.
    pub status: u32,

    /// Every chunk the transport delivered, in order.
    pub body: Vec<u8>,
}

impl Response {
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Result returned by callbacks.
pub type CallbackResult = Result<(), CallbackError>;

pub(crate) type SuccessFn = Box<dyn FnOnce(Response) -> CallbackResult>;
pub(crate) type FailureFn = Box<dyn FnOnce(RequestError) -> CallbackResult>;

/// The pair of callbacks attached to a request. Exactly one of them runs,
/// once, when the request finishes.
///
/// ```ignore
/// let callbacks = Callbacks::new(|response| {
///     println!("{} bytes", response.body.len());
///     Ok(())
/// })
/// .on_failure(|error| {
///     eprintln!("fetch failed: {}", error);
///     Ok(())
/// });
/// ```
pub struct Callbacks {
    pub(crate) success: SuccessFn,
    pub(crate) failure: FailureFn,
}

impl Callbacks {
    /// Callbacks with the given success handler and a failure handler that
    /// does nothing.
    pub fn new<S>(success: S) -> Self
    where
        S: FnOnce(Response) -> CallbackResult + 'static,
    {
        Self {
            success: Box::new(success),
            failure: Box::new(|_| Ok(())),
        }
    }

    pub fn on_failure<F>(mut self, failure: F) -> Self
    where
        F: FnOnce(RequestError) -> CallbackResult + 'static,
    {
        self.failure = Box::new(failure);
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}
