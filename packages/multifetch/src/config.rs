use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default ceiling on simultaneously registered requests. Keeps the number of
/// open sockets well under typical descriptor limits.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 500;

/// Settings for a [`Multi`](crate::Multi) and the transport it drives.
///
/// Every field has a default, so hosts can embed this in their own config
/// files and only set what they care about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Admission ceiling. `enqueue` waits for a free slot once this many
    /// requests are in flight.
    pub max_in_flight: usize,

    /// User-Agent header sent with every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Connection-phase timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,

    /// Emit libcurl's transfer chatter at trace level.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            user_agent: None,
            connect_timeout_ms: None,
            verbose: false,
        }
    }
}

impl Config {
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Rejects settings that would make `Multi` unusable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_in_flight == 0 {
            return Err(Error::InvalidConfig {
                message: "max_in_flight must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
