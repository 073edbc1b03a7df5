//! Guest exit.
//!
//! Exiting is reported as a value: a loader returns the [`GuestExit`] from
//! the guest's host call to unwind the guest, and the session reports the
//! code. Exit code 0 counts as success.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("guest exited with code {code}")]
pub struct GuestExit {
    pub code: u8,
}

impl GuestExit {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// `exit(ok)` is code 0, `exit(err)` is code 1.
pub fn exit(status: Result<(), ()>) -> GuestExit {
    GuestExit {
        code: if status.is_ok() { 0 } else { 1 },
    }
}

pub fn exit_with_code(code: u8) -> GuestExit {
    GuestExit { code }
}
