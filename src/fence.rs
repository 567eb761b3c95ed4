//! Shared synchronization fences
//!
//! A [`Fence`] is a cheap, cloneable handle. Every clone refers to the same
//! sync object, and a sync-file descriptor is closed only when the last
//! holder drops it. The coordinator never waits on a fence; it only records
//! fences handed back by the device and reports whether they have signaled.

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hal::Nsecs;

/// Signal state of a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTime {
    /// No sync object behind the handle, or it could not be queried.
    Invalid,
    Pending,
    Signaled(Nsecs),
}

enum FenceInner {
    /// Kernel sync file handed over by the device.
    SyncFile {
        fd: OwnedFd,
        observed: Mutex<Option<Nsecs>>,
    },
    /// Software timeline point, signaled explicitly.
    Timeline(Mutex<Option<Nsecs>>),
}

/// Reference-counted fence handle
#[derive(Clone, Default)]
pub struct Fence {
    inner: Option<Arc<FenceInner>>,
}

impl Fence {
    /// Placeholder that never signals and carries no sync object
    pub const NO_FENCE: Fence = Fence { inner: None };

    /// Take ownership of a sync-file descriptor
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self {
            inner: Some(Arc::new(FenceInner::SyncFile {
                fd,
                observed: Mutex::new(None),
            })),
        }
    }

    /// An unsignaled software fence
    pub fn pending() -> Self {
        Self {
            inner: Some(Arc::new(FenceInner::Timeline(Mutex::new(None)))),
        }
    }

    /// A software fence that has already signaled at `timestamp`
    pub fn signaled(timestamp: Nsecs) -> Self {
        Self {
            inner: Some(Arc::new(FenceInner::Timeline(Mutex::new(Some(timestamp))))),
        }
    }

    /// Signal a software fence. Sync-file fences are signaled by the kernel,
    /// so this returns false for them and for `NO_FENCE`.
    pub fn signal(&self, timestamp: Nsecs) -> bool {
        match self.inner.as_deref() {
            Some(FenceInner::Timeline(state)) => {
                let mut state = state.lock();
                if state.is_none() {
                    *state = Some(timestamp);
                }
                true
            }
            _ => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    pub fn signal_time(&self) -> SignalTime {
        match self.inner.as_deref() {
            None => SignalTime::Invalid,
            Some(FenceInner::Timeline(state)) => match *state.lock() {
                Some(ts) => SignalTime::Signaled(ts),
                None => SignalTime::Pending,
            },
            Some(FenceInner::SyncFile { fd, observed }) => {
                let mut observed = observed.lock();
                if let Some(ts) = *observed {
                    return SignalTime::Signaled(ts);
                }
                match poll_signaled(fd.as_raw_fd()) {
                    Some(true) => {
                        let ts = monotonic_now();
                        *observed = Some(ts);
                        SignalTime::Signaled(ts)
                    }
                    Some(false) => SignalTime::Pending,
                    None => SignalTime::Invalid,
                }
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.signal_time() == SignalTime::Pending
    }

    /// Duplicate the underlying descriptor for a consumer that needs its own
    pub fn dup_fd(&self) -> Option<OwnedFd> {
        match self.inner.as_deref() {
            Some(FenceInner::SyncFile { fd, .. }) => fd.try_clone().ok(),
            _ => None,
        }
    }

    /// Whether both handles share the same sync object
    pub fn same_as(&self, other: &Fence) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Number of live handles to this sync object
    pub fn holders(&self) -> usize {
        self.inner.as_ref().map_or(0, Arc::strong_count)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.as_deref() {
            None => f.write_str("Fence::NO_FENCE"),
            Some(FenceInner::SyncFile { fd, .. }) => {
                write!(f, "Fence(fd={}, {:?})", fd.as_raw_fd(), self.signal_time())
            }
            Some(FenceInner::Timeline(_)) => write!(f, "Fence(sw, {:?})", self.signal_time()),
        }
    }
}

/// `Some(true)` when the fd is readable, i.e. the sync file signaled.
fn poll_signaled(fd: RawFd) -> Option<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
    if ret < 0 || pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        return None;
    }
    Some(ret > 0 && pfd.revents & libc::POLLIN != 0)
}

/// Current CLOCK_MONOTONIC time in nanoseconds
pub fn monotonic_now() -> Nsecs {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as Nsecs * 1_000_000_000 + ts.tv_nsec as Nsecs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::FromRawFd;

    #[test]
    fn test_no_fence_is_invalid() {
        assert!(!Fence::NO_FENCE.is_valid());
        assert_eq!(Fence::NO_FENCE.signal_time(), SignalTime::Invalid);
        assert!(!Fence::NO_FENCE.is_pending());
        assert!(!Fence::NO_FENCE.signal(10));
    }

    #[test]
    fn test_software_fence_signals_once() {
        let fence = Fence::pending();
        let other = fence.clone();
        assert!(fence.is_pending());
        assert!(other.signal(100));
        assert!(other.signal(200));
        assert_eq!(fence.signal_time(), SignalTime::Signaled(100));
        assert!(fence.same_as(&other));
        assert_eq!(fence.holders(), 2);
        drop(other);
        assert_eq!(fence.holders(), 1);
    }

    #[test]
    fn test_sync_file_fence_polls_fd() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (read_end, write_end) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        let fence = Fence::from_fd(read_end);
        assert_eq!(fence.signal_time(), SignalTime::Pending);

        let byte = [1u8];
        let written = unsafe { libc::write(write_end.as_raw_fd(), byte.as_ptr().cast(), 1) };
        assert_eq!(written, 1);

        let first = fence.signal_time();
        assert!(matches!(first, SignalTime::Signaled(_)));
        assert_eq!(fence.signal_time(), first);
        assert!(fence.dup_fd().is_some());
    }
}
