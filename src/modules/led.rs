//! A worked example device-side module: an RGB LED with a three-channel
//! write and a single-channel read-back (spec §8 scenarios 1-2, §9
//! "include at least one worked module example").
//!
//! This module is registered the way any user module is: build its
//! [`Function`] table, wrap it in a [`Module`], and
//! [`Registry::register`] it before the perform engine starts pulling
//! packets.

use crate::registry::{Function, Module, ParamTypes};
use crate::trampoline::EntryPoint;
use crate::types::WireType;

/// Process-local channel state this example module's native functions
/// operate on. A real device would address hardware registers directly;
/// this stand-in lets the module be exercised on a host in tests.
static CHANNELS: std::sync::Mutex<[u8; 3]> = std::sync::Mutex::new([0, 0, 0]);

/// `void rgb_write(u8 r, u8 g, u8 b)` — spec §8 scenario 2.
extern "C" fn rgb_write(r: u64, g: u64, b: u64) -> u64 {
    let mut channels = CHANNELS.lock().unwrap();
    channels[0] = r as u8;
    channels[1] = g as u8;
    channels[2] = b as u8;
    0
}

/// `u8 rgb_read(u8 channel)` — reads one of the three channels back.
extern "C" fn rgb_read(channel: u64) -> u64 {
    let channels = CHANNELS.lock().unwrap();
    channels.get(channel as usize).copied().unwrap_or(0) as u64
}

/// `void rgb_write_push(ptr, len, u8 r, u8 g, u8 b)` — the push-class
/// counterpart of `rgb_write` (spec §8 scenario 5): the device allocates a
/// destination pointer and length for the pushed bytes and invokes this
/// function with them leading the argument list, exactly as
/// `PerformEngine::handle_push` synthesizes.
extern "C" fn rgb_write_push(_ptr: u64, _len: u64, r: u64, g: u64, b: u64) -> u64 {
    rgb_write(r, g, b)
}

/// Builds the `led` module's function table and wraps it in a [`Module`]
/// ready for [`crate::registry::Registry::register`].
pub fn module() -> Result<Module, crate::error::LfError> {
    let functions: &'static [Function] = Box::leak(
        vec![
            Function {
                entry: EntryPoint::new(rgb_write as usize),
                parameters: ParamTypes::new(&[WireType::U8, WireType::U8, WireType::U8]),
                return_type: WireType::Void,
            },
            Function {
                entry: EntryPoint::new(rgb_read as usize),
                parameters: ParamTypes::new(&[WireType::U8]),
                return_type: WireType::U8,
            },
            Function {
                entry: EntryPoint::new(rgb_write_push as usize),
                parameters: ParamTypes::new(&[WireType::Ptr, WireType::Uint, WireType::U8, WireType::U8, WireType::U8]),
                return_type: WireType::Void,
            },
        ]
        .into_boxed_slice(),
    );
    Module::new("led", functions)
}
