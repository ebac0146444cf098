//! Peer credentials attached to inbound frames.

use std::fmt;

/// Kernel-supplied identity of the process on the other end of a port.
///
/// The transport obtains these out-of-band (never from the payload) and
/// stamps them on every inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// Remote process id.
    pub pid: i32,
    /// Remote effective user id.
    pub uid: u32,
    /// Remote primary group id.
    pub gid: u32,
}

impl Credentials {
    /// Credentials of the calling process. Used by loopback transports.
    pub fn current() -> Self {
        // SAFETY: getpid/geteuid/getegid take no arguments and cannot fail.
        unsafe {
            Self {
                pid: libc::getpid(),
                uid: libc::geteuid(),
                gid: libc::getegid(),
            }
        }
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={} uid={} gid={}", self.pid, self.uid, self.gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_matches_process() {
        let creds = Credentials::current();
        assert_eq!(creds.pid, std::process::id() as i32);
    }
}
