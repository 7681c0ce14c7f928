//! The variadic, type-tagged argument list (spec §3 "Argument list", §4.2).
//!
//! `ArgList` replaces the source's singly-linked list built by a variadic
//! builder (spec §9) with an owned, fixed-capacity array that is built
//! once by the caller and consumed exactly once by the packet codec.

use crate::error::LfError;
use crate::types::WireType;

/// Maximum number of arguments a single invocation may carry.
///
/// Fixed at 16 so the packed type word (4 bits per tag) fits in a single
/// `u64`, per spec §3 invariant A1.
pub const MAX_ARGC: usize = 16;

/// One `(tag, value)` pair. `value` is a 64-bit holding cell; values
/// narrower than 64 bits are zero- or sign-extended here and re-narrowed
/// to their wire width by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arg {
    pub tag: WireType,
    pub value: u64,
}

/// An ordered, growable sequence of arguments with a strict maximum arity.
///
/// Single-consumer: intended to be built with [`ArgList::append`] and then
/// handed once to [`crate::packet::build_invocation`] or similar, which
/// drains it via [`ArgList::iter`].
#[derive(Debug, Clone)]
pub struct ArgList {
    items: [Arg; MAX_ARGC],
    len: usize,
}

impl Default for ArgList {
    fn default() -> Self {
        ArgList {
            items: [Arg { tag: WireType::U8, value: 0 }; MAX_ARGC],
            len: 0,
        }
    }
}

impl ArgList {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one argument.
    ///
    /// Returns [`LfError::Overflow`] without mutating the list if it is
    /// already at [`MAX_ARGC`] (spec §4.2, P4). `tag` must not be
    /// [`WireType::Void`] (only legal as a return type); violating that
    /// returns [`LfError::Type`].
    pub fn append(&mut self, value: u64, tag: WireType) -> Result<(), LfError> {
        if !tag.is_legal_argument() {
            return Err(LfError::Type);
        }
        if self.len == MAX_ARGC {
            return Err(LfError::Overflow);
        }
        self.items[self.len] = Arg { tag, value };
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates the arguments in append order, which is wire order, which
    /// is native-call parameter order (spec §3 invariant A2).
    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.items[..self.len].iter()
    }

    /// Consumes the list, releasing its storage. Provided to mirror the
    /// source's explicit `release()` step (spec §4.2); on this owned,
    /// stack-allocated representation it is just `drop`.
    pub fn release(self) {
        drop(self)
    }
}
