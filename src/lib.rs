//! Host-to-device remote procedure invocation runtime for a small embedded
//! coprocessor (spec §1 "Purpose & Scope").
//!
//! A host process talks to a coprocessor over an opaque byte transport
//! (USB, UART, a test loopback); this crate owns wire framing ([`packet`]),
//! the argument calling convention ([`args`], [`types`]), the device-side
//! dispatch-and-call loop ([`perform`], [`trampoline`], [`registry`]), the
//! host-side blocking invocation engine ([`invoke`]), and the stable C ABI
//! ([`abi`]) language bindings are built against.
//!
//! [`modules::led`] is a worked example of a device-side module registered
//! against this runtime.

pub mod abi;
pub mod args;
pub mod crc;
pub mod error;
pub mod invoke;
pub mod modules;
pub mod packet;
pub mod perform;
pub mod registry;
pub mod trampoline;
pub mod transport;
pub mod types;

pub use args::ArgList;
pub use error::LfError;
pub use invoke::InvocationEngine;
pub use packet::Class;
pub use perform::PerformEngine;
pub use registry::Registry;
pub use trampoline::{NativeTrampoline, Trampoline};
pub use transport::Endpoint;
pub use types::{PointerWidth, WireType};
