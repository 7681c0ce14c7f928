//! The call trampoline: unpacks a wire argument blob into a native call
//! frame, performs the indirect call, and normalizes the return (spec §3
//! C6, §4.6 — "the hardest piece").
//!
//! Spec §4.6 fixes the contract (`call(entry, ret_tag, argc, types_word,
//! argv_bytes) -> u64`) and leaves the calling-convention marshaling
//! ABI-specific: "the source provides two reference assembly
//! implementations... implementers of this spec must supply one
//! trampoline per supported device ABI." [`NativeTrampoline`] is the
//! portable reference implementation for any ABI (this crate's test host
//! included) where integer and pointer arguments are each carried in one
//! register-or-stack-slot-sized native call parameter; a real firmware
//! target with a cramped ABI (the source's 8-bit AVR reference) would
//! swap in an assembly trampoline behind the same [`Trampoline`] trait,
//! per spec §9's "keep it behind the single contract in §4.6" guidance.

use crate::args::MAX_ARGC;
use crate::error::{self, LfError};
use crate::packet::PackedArgs;
use crate::types::{self, PointerWidth, WireType};

/// Sentinel returned by a failed trampoline call (spec §4.6 "Failure
/// modes"). The perform engine pairs this with whatever [`LfError`] was
/// latched into the thread-local slot.
pub const SENTINEL: u64 = u64::MAX;

/// Signature-erased device function entry point.
///
/// Stores the raw address of a native function; [`Trampoline`]
/// implementations cast it to a concrete calling-convention-specific
/// function pointer type at call time, using the arity carried alongside
/// it in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint(usize);

impl EntryPoint {
    pub fn new(address: usize) -> Self {
        EntryPoint(address)
    }

    pub fn address(self) -> usize {
        self.0
    }
}

/// The per-call state machine spec §4.6 describes: `Idle -> Unpacking ->
/// Calling -> Normalizing -> Replying -> Idle`, with no re-entrancy within
/// a single channel. Exposed so the perform engine can log (or a debugger
/// can observe) which stage a wedged call is stuck in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "device-log", derive(defmt::Format))]
pub enum CallState {
    Idle,
    Unpacking,
    Calling,
    Normalizing,
    Replying,
}

/// An ABI-specific marshaling strategy for [`EntryPoint`] calls.
pub trait Trampoline {
    /// Unpacks `args`, marshals them into this ABI's native call frame,
    /// invokes `entry`, and normalizes the return per `ret`.
    ///
    /// On any failure (an illegal tag mid-unpack, or a width this ABI
    /// cannot carry), latches the appropriate [`LfError`] into the
    /// thread-local slot and returns [`SENTINEL`] (spec §4.6 "Failure
    /// modes") instead of panicking — the perform engine always owes the
    /// channel a reply.
    fn call<I>(&self, entry: EntryPoint, ret: WireType, args: I, ptr_width: PointerWidth) -> u64
    where
        I: Iterator<Item = Result<(WireType, u64), LfError>>;
}

/// Reference trampoline for ABIs where every integer/pointer parameter
/// occupies one native register-or-stack-slot (the common case for
/// 32-bit and 64-bit targets; the source's second, implicit reference
/// implementation is for such an ARM target).
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeTrampoline;

impl Trampoline for NativeTrampoline {
    fn call<I>(&self, entry: EntryPoint, ret: WireType, args: I, ptr_width: PointerWidth) -> u64
    where
        I: Iterator<Item = Result<(WireType, u64), LfError>>,
    {
        let mut regs = [0u64; MAX_ARGC];
        let mut argc = 0usize;

        for item in args {
            match item {
                Ok((_, value)) => {
                    if argc >= MAX_ARGC {
                        error::set_last_error(LfError::Overflow);
                        return SENTINEL;
                    }
                    regs[argc] = value;
                    argc += 1;
                }
                Err(e) => {
                    // Unknown tag mid-unpack (spec §4.6 failure mode 1).
                    error::set_last_error(e);
                    return SENTINEL;
                }
            }
        }

        // Safety: `entry` is taken from the registry, whose sole
        // constructor (`Module::new`/`Registry::register`) is only ever
        // fed function pointers matching the arity and integer/pointer
        // parameter kinds recorded alongside them.
        let raw = unsafe { invoke_native(entry, argc, &regs) };

        if ret == WireType::Void {
            return 0;
        }
        let width = ret.sizeof(ptr_width);
        if width == 0 || width > 8 {
            // Unsupported ABI width (spec §4.6 failure mode 2, e.g. u64
            // return on an 8-bit reference ABI — not reachable through
            // this native trampoline, but a narrower ABI's trampoline
            // hits this path).
            error::set_last_error(LfError::Type);
            return SENTINEL;
        }
        match types::unpack(&raw.to_le_bytes()[..width], ret, ptr_width) {
            Ok(v) => v,
            Err(e) => {
                error::set_last_error(e);
                SENTINEL
            }
        }
    }
}

/// Casts `entry` to an `extern "C" fn` of exactly `argc` `u64` parameters
/// and performs the indirect call.
///
/// # Safety
/// `entry` must address a function compiled for the host's C calling
/// convention taking exactly `argc` integer-or-pointer-sized parameters
/// and returning an integer-or-pointer-sized value.
unsafe fn invoke_native(entry: EntryPoint, argc: usize, regs: &[u64; MAX_ARGC]) -> u64 {
    macro_rules! call_n {
        ($($idx:tt),*) => {{
            type F = extern "C" fn($(call_n!(@unit $idx)),*) -> u64;
            let f: F = unsafe { core::mem::transmute::<usize, F>(entry.address()) };
            f($(regs[$idx]),*)
        }};
        (@unit $idx:tt) => { u64 };
    }

    match argc {
        0 => call_n!(),
        1 => call_n!(0),
        2 => call_n!(0, 1),
        3 => call_n!(0, 1, 2),
        4 => call_n!(0, 1, 2, 3),
        5 => call_n!(0, 1, 2, 3, 4),
        6 => call_n!(0, 1, 2, 3, 4, 5),
        7 => call_n!(0, 1, 2, 3, 4, 5, 6),
        8 => call_n!(0, 1, 2, 3, 4, 5, 6, 7),
        9 => call_n!(0, 1, 2, 3, 4, 5, 6, 7, 8),
        10 => call_n!(0, 1, 2, 3, 4, 5, 6, 7, 8, 9),
        11 => call_n!(0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10),
        12 => call_n!(0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11),
        13 => call_n!(0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12),
        14 => call_n!(0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13),
        15 => call_n!(0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14),
        16 => call_n!(0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15),
        _ => unreachable!("argc is bounded by MAX_ARGC"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgList;
    use crate::packet::{build_invocation, parse, Class, ParsedBody};

    extern "C" fn add3(a: u64, b: u64, c: u64) -> u64 {
        a.wrapping_add(b).wrapping_add(c)
    }

    extern "C" fn returns_negative_one_i16() -> u64 {
        0xFFFF
    }

    extern "C" fn no_args_void() -> u64 {
        0
    }

    fn packed_args_for<'a>(parsed: &'a crate::packet::ParsedInvocation<'a>) -> PackedArgs<'a> {
        parsed.args(PointerWidth::Bits32)
    }

    #[test]
    fn calls_through_and_sums_arguments() {
        let mut args = ArgList::new();
        args.append(10, WireType::U8).unwrap();
        args.append(20, WireType::U8).unwrap();
        args.append(30, WireType::U8).unwrap();
        let pkt = build_invocation::<64>(Class::Standard, 0, 0, WireType::U8, &args, PointerWidth::Bits32).unwrap();
        let parsed = parse(pkt.as_slice()).unwrap();
        let ParsedBody::Invocation(inv) = parsed.body else { panic!() };

        let trampoline = NativeTrampoline;
        let result = trampoline.call(
            EntryPoint::new(add3 as usize),
            WireType::U8,
            packed_args_for(&inv),
            PointerWidth::Bits32,
        );
        assert_eq!(result, 60);
    }

    #[test]
    fn normalizes_signed_return_matches_spec_scenario_3() {
        let args = ArgList::new();
        let pkt = build_invocation::<64>(Class::Standard, 0, 0, WireType::I16, &args, PointerWidth::Bits32).unwrap();
        let parsed = parse(pkt.as_slice()).unwrap();
        let ParsedBody::Invocation(inv) = parsed.body else { panic!() };

        let trampoline = NativeTrampoline;
        let result = trampoline.call(
            EntryPoint::new(returns_negative_one_i16 as usize),
            WireType::I16,
            packed_args_for(&inv),
            PointerWidth::Bits32,
        );
        assert_eq!(result, 0xFFFF_FFFF_FFFF_FFFFu64);
    }

    #[test]
    fn void_call_returns_zero_matches_spec_scenario_1() {
        let args = ArgList::new();
        let pkt = build_invocation::<64>(Class::Standard, 0, 0, WireType::Void, &args, PointerWidth::Bits32).unwrap();
        let parsed = parse(pkt.as_slice()).unwrap();
        let ParsedBody::Invocation(inv) = parsed.body else { panic!() };

        let trampoline = NativeTrampoline;
        let result = trampoline.call(
            EntryPoint::new(no_args_void as usize),
            WireType::Void,
            packed_args_for(&inv),
            PointerWidth::Bits32,
        );
        assert_eq!(result, 0);
    }
}
