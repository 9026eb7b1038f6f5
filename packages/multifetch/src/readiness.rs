//! One OS-level wait over the caller's descriptors and the transport's.

use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use libc::{c_int, nfds_t, poll, pollfd, EINTR, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};

use crate::error::Error;
use crate::transport::Interest;

/// Caller descriptors found ready by [`Multi::select`](crate::Multi::select).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ready {
    pub read: Vec<RawFd>,
    pub write: Vec<RawFd>,
}

impl Ready {
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }
}

/// Blocks until a descriptor in `read`/`write`/`interest` is ready or the
/// transport's timeout passes, then reports which of the caller's own
/// descriptors are ready.
///
/// With nothing to watch and no timeout the wait is skipped, since it could
/// never end.
pub(crate) fn wait(interest: &Interest, read: &[RawFd], write: &[RawFd]) -> Result<Ready, Error> {
    let mut events: BTreeMap<RawFd, i16> = BTreeMap::new();
    for &fd in interest.read.iter().chain(read) {
        *events.entry(fd).or_default() |= POLLIN;
    }
    for &fd in interest.write.iter().chain(write) {
        *events.entry(fd).or_default() |= POLLOUT;
    }

    let timeout = match interest.timeout {
        Some(timeout) => timeout_millis(timeout),
        None if events.is_empty() => 0,
        None => -1,
    };

    let mut fds: Vec<pollfd> = events
        .into_iter()
        .map(|(fd, events)| pollfd {
            fd,
            events,
            revents: 0,
        })
        .collect();

    tracing::trace!("waiting on {} descriptors, timeout {}ms", fds.len(), timeout);

    // SAFETY: `fds` is a valid, exclusively borrowed array of `fds.len()` entries.
    let result = unsafe { poll(fds.as_mut_ptr(), fds.len() as nfds_t, timeout) };
    if result < 0 {
        let error = io::Error::last_os_error();
        if error.raw_os_error() == Some(EINTR) {
            return Ok(Ready::default());
        }
        return Err(Error::Select(error));
    }

    let revents = |fd: RawFd| -> Result<i16, Error> {
        let revents = fds
            .binary_search_by_key(&fd, |entry| entry.fd)
            .map(|index| fds[index].revents)
            .unwrap_or(0);
        if revents & POLLNVAL != 0 {
            return Err(Error::InvalidDescriptor(fd));
        }
        Ok(revents)
    };

    let mut ready = Ready::default();
    for &fd in read {
        if revents(fd)? & (POLLIN | POLLHUP | POLLERR) != 0 {
            ready.read.push(fd);
        }
    }
    for &fd in write {
        if revents(fd)? & (POLLOUT | POLLHUP | POLLERR) != 0 {
            ready.write.push(fd);
        }
    }

    Ok(ready)
}

/// Converts a wait timeout to whole milliseconds, rounding up so that a
/// sub-millisecond timeout still sleeps instead of spinning.
fn timeout_millis(timeout: Duration) -> c_int {
    let millis = timeout.as_micros().div_ceil(1000);
    c_int::try_from(millis).unwrap_or(c_int::MAX)
}
