//! Shared error taxonomy for the invocation runtime.
//!
//! The device and the host share one enum because its numeric value is
//! transmitted on the wire as `Result.error` (spec §3, §7). The thread-local
//! "last error" slot is latching: it is not cleared by later successful
//! operations, only by an explicit read-and-clear through [`last_error`].

use core::fmt;

/// Error taxonomy shared by the wire `Result.error` field and the
/// thread-local "last error" slot.
///
/// Discriminants are part of the wire contract (spec §7) and must not be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LfError {
    Ok = 0,
    Malloc = 1,
    Null = 2,
    Overflow = 3,
    NoDevice = 4,
    Endpoint = 5,
    Checksum = 6,
    Subclass = 7,
    Type = 8,
    Module = 9,
    Name = 10,
    Fmr = 11,
    Test = 12,
}

impl LfError {
    /// Reconstructs an `LfError` from a wire-transmitted code.
    ///
    /// Unknown codes collapse to [`LfError::Fmr`] (the source's catch-all
    /// "state machine confused itself" bucket) rather than panicking.
    pub fn from_wire(code: u32) -> Self {
        match code {
            0 => LfError::Ok,
            1 => LfError::Malloc,
            2 => LfError::Null,
            3 => LfError::Overflow,
            4 => LfError::NoDevice,
            5 => LfError::Endpoint,
            6 => LfError::Checksum,
            7 => LfError::Subclass,
            8 => LfError::Type,
            9 => LfError::Module,
            10 => LfError::Name,
            12 => LfError::Test,
            _ => LfError::Fmr,
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }

    pub fn is_ok(self) -> bool {
        matches!(self, LfError::Ok)
    }
}

impl fmt::Display for LfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LfError::Ok => "ok",
            LfError::Malloc => "allocation failed",
            LfError::Null => "null pointer or out-of-range index",
            LfError::Overflow => "buffer or argument list overflow",
            LfError::NoDevice => "no device selected",
            LfError::Endpoint => "transport endpoint failure",
            LfError::Checksum => "packet checksum or magic mismatch",
            LfError::Subclass => "unrecognized packet class",
            LfError::Type => "unsupported or illegal wire type",
            LfError::Module => "module not bound on this device",
            LfError::Name => "module or function name not found",
            LfError::Fmr => "perform engine fault",
            LfError::Test => "test sentinel",
        };
        f.write_str(s)
    }
}

impl std::error::Error for LfError {}

std::thread_local! {
    static LAST_ERROR: core::cell::Cell<LfError> = const { core::cell::Cell::new(LfError::Ok) };
}

/// Latches `err` into the calling thread's "last error" slot.
///
/// Per spec §7, this never clears the slot on success; callers that want
/// the slot cleared must go through [`last_error`].
pub fn set_last_error(err: LfError) {
    LAST_ERROR.with(|slot| slot.set(err));
}

/// Reads and clears the calling thread's "last error" slot.
///
/// Backs the `lf_error_get` ABI entry point (spec §6).
pub fn last_error() -> LfError {
    LAST_ERROR.with(|slot| slot.replace(LfError::Ok))
}
