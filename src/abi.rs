//! The stable C ABI boundary used by language bindings (spec §6 "Host C
//! ABI").
//!
//! Every entry point returns an [`LfResult`] and follows the propagation
//! policy of spec §7: on failure it also latches an [`LfError`] into the
//! thread-local slot via [`crate::error::set_last_error`], readable through
//! [`lf_error_get`]. This module is the only place raw pointers and handles
//! appear in this crate; everything behind it is safe Rust.

use std::ffi::CStr;
use std::os::raw::c_char;

use std::slice;

use crate::args::ArgList;
use crate::error::{self, LfError};
use crate::invoke::InvocationEngine;
use crate::packet::Class;
use crate::registry::Registry;
use crate::transport::Endpoint;
use crate::types::WireType;

/// Result code returned by every ABI entry point (spec §6 `LfResult`).
///
/// Discriminants are part of the stable ABI and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LfResult {
    Success = 0,
    NullPointer = 1,
    InvalidString = 2,
    PackageNotLoaded = 3,
    NoDevicesFound = 4,
    IndexOutOfBounds = 5,
    IllegalType = 6,
    InvocationError = 7,
    IllegalHandle = 8,
}

impl From<LfError> for LfResult {
    fn from(err: LfError) -> Self {
        match err {
            LfError::Ok => LfResult::Success,
            LfError::Null => LfResult::NullPointer,
            LfError::NoDevice => LfResult::NoDevicesFound,
            LfError::Type | LfError::Subclass => LfResult::IllegalType,
            LfError::Module | LfError::Name => LfResult::PackageNotLoaded,
            _ => LfResult::InvocationError,
        }
    }
}

/// Fixed header every loaded module or application image begins with
/// (spec §6 "Device image handoff").
///
/// An application has `entry != 0`; a module has `entry == 0`. Offsets and
/// sizes are relative to the start of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ImageHeader {
    pub entry: u32,
    pub module_off: u32,
    pub module_size: u32,
    pub data_off: u32,
    pub data_size: u32,
    pub bss_off: u32,
    pub bss_size: u32,
    pub got_off: u32,
    pub got_size: u32,
}

impl ImageHeader {
    pub const SIZE: usize = 36;

    /// Parses a header from its little-endian on-wire representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LfError> {
        if bytes.len() < Self::SIZE {
            return Err(LfError::Overflow);
        }
        let mut fields = [0u32; 9];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        }
        Ok(ImageHeader {
            entry: fields[0],
            module_off: fields[1],
            module_size: fields[2],
            data_off: fields[3],
            data_size: fields[4],
            bss_off: fields[5],
            bss_size: fields[6],
            got_off: fields[7],
            got_size: fields[8],
        })
    }

    /// `true` for an application image, `false` for a bare module.
    pub fn is_application(&self) -> bool {
        self.entry != 0
    }
}

/// An opaque argument-list handle, created by [`lf_create_args`] and
/// consumed by [`lf_invoke`] or released by [`lf_release`].
pub struct ArgsHandle(pub(crate) ArgList);

/// Allocates an empty argument list, returning its handle through `out`.
///
/// # Safety
/// `out` must be a valid, properly aligned pointer to a `*mut ArgsHandle`.
pub unsafe fn lf_create_args(out: *mut *mut ArgsHandle) -> LfResult {
    if out.is_null() {
        error::set_last_error(LfError::Null);
        return LfResult::NullPointer;
    }
    let handle = Box::new(ArgsHandle(ArgList::new()));
    unsafe {
        *out = Box::into_raw(handle);
    }
    LfResult::Success
}

/// Appends `(value, tag)` to the argument list behind `argv`.
///
/// # Safety
/// `argv` must be a live handle returned by [`lf_create_args`] and not yet
/// released.
pub unsafe fn lf_append_arg(argv: *mut ArgsHandle, value: u64, tag: u8) -> LfResult {
    if argv.is_null() {
        error::set_last_error(LfError::Null);
        return LfResult::NullPointer;
    }
    let wire_tag = match WireType::from_tag(tag) {
        Ok(t) => t,
        Err(e) => {
            error::set_last_error(e);
            return LfResult::IllegalType;
        }
    };
    let args = unsafe { &mut (*argv).0 };
    match args.append(value, wire_tag) {
        Ok(()) => LfResult::Success,
        Err(e) => {
            error::set_last_error(e);
            LfResult::IllegalType
        }
    }
}

/// Releases an `ArgsHandle` allocated by [`lf_create_args`].
///
/// # Safety
/// `argv` must be a handle previously returned by [`lf_create_args`] and
/// must not be used again after this call.
pub unsafe fn lf_release(argv: *mut ArgsHandle) -> LfResult {
    if argv.is_null() {
        error::set_last_error(LfError::Null);
        return LfResult::NullPointer;
    }
    drop(unsafe { Box::from_raw(argv) });
    LfResult::Success
}

/// Binds `name`-identified devices discovered over USB-backed endpoints.
///
/// This reference binding exposes only the pattern language bindings use;
/// actual USB discovery is left to the `Endpoint` implementor a caller
/// supplies through [`InvocationEngine::bind`] directly — this entry point
/// exists for parity with spec §6's named boundary and always reports no
/// devices found, since device enumeration is transport-specific and out
/// of this crate's scope (spec §1 Non-goals).
pub unsafe fn lf_attach_usb(out_count: *mut u32) -> LfResult {
    if out_count.is_null() {
        error::set_last_error(LfError::Null);
        return LfResult::NullPointer;
    }
    unsafe {
        *out_count = 0;
    }
    error::set_last_error(LfError::NoDevice);
    LfResult::NoDevicesFound
}

/// Selects device `idx` within `engine` as the process-wide target (spec
/// §5, §6 `lf_select`).
pub fn lf_select<E: Endpoint>(engine: &mut InvocationEngine<E>, idx: usize) -> LfResult {
    log::trace!("lf_select: idx={idx}");
    match engine.select(idx) {
        Ok(()) => LfResult::Success,
        Err(e) => {
            error::set_last_error(e);
            LfResult::IndexOutOfBounds
        }
    }
}

/// Resolves `module_name` against `registry`'s dynamic loader table,
/// writing the resulting index through `out_index` (spec §4.8 `bind`).
/// The returned index is what [`lf_invoke`] expects as its `module_index`
/// argument.
///
/// # Safety
/// `module_name` must be a valid, NUL-terminated C string; `out_index`
/// must be a valid, properly aligned pointer to a `u8`.
pub unsafe fn lf_bind_module<E: Endpoint>(
    engine: &mut InvocationEngine<E>,
    device_index: usize,
    registry: &Registry,
    module_name: *const c_char,
    out_index: *mut u8,
) -> LfResult {
    if out_index.is_null() {
        error::set_last_error(LfError::Null);
        return LfResult::NullPointer;
    }
    let name = match unsafe { str_from_c(module_name) } {
        Ok(n) => n,
        Err(e) => {
            error::set_last_error(e);
            return LfResult::InvalidString;
        }
    };
    match engine.bind_module(device_index, registry, name) {
        Ok(index) => {
            unsafe {
                *out_index = index;
            }
            LfResult::Success
        }
        Err(e) => {
            error::set_last_error(e);
            LfResult::from(e)
        }
    }
}

/// Invokes `module_name::function` on the selected device with the
/// argument list behind `argv`, writing the result through `out_value`
/// (spec §6 `lf_invoke`).
///
/// # Safety
/// `argv` must be a live handle from [`lf_create_args`]; `out_value` must
/// be a valid, properly aligned pointer to a `u64`.
pub unsafe fn lf_invoke<E: Endpoint>(
    engine: &mut InvocationEngine<E>,
    module_index: u8,
    function: u8,
    argv: *const ArgsHandle,
    ret_tag: u8,
    out_value: *mut u64,
) -> LfResult {
    if argv.is_null() || out_value.is_null() {
        error::set_last_error(LfError::Null);
        return LfResult::NullPointer;
    }
    let ret = match WireType::from_tag(ret_tag) {
        Ok(t) => t,
        Err(e) => {
            error::set_last_error(e);
            return LfResult::IllegalType;
        }
    };
    let args = unsafe { &(*argv).0 };
    log::trace!("lf_invoke: module_index={module_index:#04x} function={function}");
    match engine.invoke(Class::Standard, module_index, function, ret, args) {
        Ok(value) => {
            unsafe {
                *out_value = value;
            }
            LfResult::Success
        }
        Err(e) => {
            // Per spec §7: the caller sees a generic invocation_error; the
            // actual code is recovered from the thread-local slot.
            error::set_last_error(e);
            log::warn!("lf_invoke: {e}");
            LfResult::InvocationError
        }
    }
}

/// Pushes `len` bytes from `src` to the selected device, invoking
/// `function` on the destination pointer the device allocates for them
/// (spec §4.7 "Push", §6 `lf_push`).
///
/// # Safety
/// `src` must be valid for reads of `len` bytes.
pub unsafe fn lf_push<E: Endpoint>(engine: &mut InvocationEngine<E>, module_index: u8, function: u8, src: *const u8, len: u32) -> LfResult {
    if src.is_null() {
        error::set_last_error(LfError::Null);
        return LfResult::NullPointer;
    }
    let payload = unsafe { slice::from_raw_parts(src, len as usize) };
    log::trace!("lf_push: module_index={module_index:#04x} function={function} len={len}");
    let extra_args = ArgList::new();
    match engine.push_bytes(Class::Push, len, module_index, function, WireType::Void, &extra_args, payload) {
        Ok(_) => LfResult::Success,
        Err(e) => {
            error::set_last_error(e);
            log::warn!("lf_push: {e}");
            LfResult::InvocationError
        }
    }
}

/// Pulls `len` bytes from the selected device into `dst`, invoking
/// `function` to produce them from the device-allocated source pointer
/// (spec §4.7 "Pull", §6 `lf_pull`).
///
/// # Safety
/// `dst` must be valid for writes of `len` bytes.
pub unsafe fn lf_pull<E: Endpoint>(engine: &mut InvocationEngine<E>, module_index: u8, function: u8, dst: *mut u8, len: u32) -> LfResult {
    if dst.is_null() {
        error::set_last_error(LfError::Null);
        return LfResult::NullPointer;
    }
    let out = unsafe { slice::from_raw_parts_mut(dst, len as usize) };
    log::trace!("lf_pull: module_index={module_index:#04x} function={function} len={len}");
    let extra_args = ArgList::new();
    match engine.pull_bytes(Class::Pull, module_index, function, WireType::Void, &extra_args, out) {
        Ok(_) => LfResult::Success,
        Err(e) => {
            error::set_last_error(e);
            log::warn!("lf_pull: {e}");
            LfResult::InvocationError
        }
    }
}

/// Reads and clears the calling thread's last-error slot (spec §6, §7
/// `lf_error_get`).
pub fn lf_error_get() -> LfError {
    error::last_error()
}

/// Validates a NUL-terminated C string and returns its `&str` view.
///
/// # Safety
/// `ptr` must be a valid pointer to a NUL-terminated byte string, or null.
pub unsafe fn str_from_c(ptr: *const c_char) -> Result<&'static str, LfError> {
    if ptr.is_null() {
        return Err(LfError::Null);
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().map_err(|_| LfError::Name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet;
    use crate::registry::{name_identifier, Function, Module, ParamTypes};
    use crate::trampoline::EntryPoint;
    use crate::transport::loopback::LoopbackEndpoint;
    use crate::types::WireType;
    use std::ffi::CString;

    /// Binds and selects one device, preloading its inbound queue with the
    /// configuration reply `bind` consumes plus one extra `Result` reply
    /// for whichever call the test drives next.
    fn bound_engine() -> (InvocationEngine<LoopbackEndpoint>, usize) {
        let mut engine: InvocationEngine<LoopbackEndpoint> = InvocationEngine::new();
        let mut ep = LoopbackEndpoint::new();
        ep.inbound.extend(vec![1u8, 16, 1]); // Bits32, MAX_ARGC, one module
        ep.inbound.extend(packet::encode_result(0, LfError::Ok.to_wire()));
        ep.inbound.extend(packet::encode_result(0, LfError::Ok.to_wire()));
        let idx = engine.bind("coproc", ep).unwrap();
        engine.select(idx).unwrap();
        (engine, idx)
    }

    extern "C" fn dummy(a: u64) -> u64 {
        a
    }

    fn registry_with_led() -> Registry {
        let mut registry = Registry::new();
        let functions: &'static [Function] = Box::leak(
            vec![Function {
                entry: EntryPoint::new(dummy as usize),
                parameters: ParamTypes::new(&[WireType::U8]),
                return_type: WireType::U8,
            }]
            .into_boxed_slice(),
        );
        registry.register(Module::new("led", functions).unwrap()).unwrap();
        registry
    }

    #[test]
    fn lf_bind_module_resolves_name_through_registry() {
        let (mut engine, idx) = bound_engine();
        let registry = registry_with_led();
        let name = CString::new("led").unwrap();
        let mut out_index = 0u8;
        unsafe {
            let result = lf_bind_module(&mut engine, idx, &registry, name.as_ptr(), &mut out_index);
            assert_eq!(result, LfResult::Success);
        }
        assert_eq!(out_index & 0x7F, registry.find_by_identifier(name_identifier("led")).unwrap().index());
    }

    #[test]
    fn lf_bind_module_unknown_name_reports_package_not_loaded() {
        let (mut engine, idx) = bound_engine();
        let registry = registry_with_led();
        let name = CString::new("missing").unwrap();
        let mut out_index = 0u8;
        unsafe {
            let result = lf_bind_module(&mut engine, idx, &registry, name.as_ptr(), &mut out_index);
            assert_eq!(result, LfResult::PackageNotLoaded);
        }
    }

    #[test]
    fn lf_push_pushes_payload_then_reports_success() {
        let (mut engine, _idx) = bound_engine();
        let payload = [0xDEu8, 0xAD, 0xBE, 0xEF];
        unsafe {
            let result = lf_push(&mut engine, 0, 0, payload.as_ptr(), payload.len() as u32);
            assert_eq!(result, LfResult::Success);
        }
    }

    #[test]
    fn lf_pull_null_dst_is_null_pointer() {
        let (mut engine, _idx) = bound_engine();
        unsafe {
            let result = lf_pull(&mut engine, 0, 0, std::ptr::null_mut(), 4);
            assert_eq!(result, LfResult::NullPointer);
        }
    }

    #[test]
    fn create_append_release_round_trip() {
        unsafe {
            let mut handle: *mut ArgsHandle = std::ptr::null_mut();
            assert_eq!(lf_create_args(&mut handle), LfResult::Success);
            assert!(!handle.is_null());
            assert_eq!(lf_append_arg(handle, 7, WireType::U8.tag()), LfResult::Success);
            assert_eq!((*handle).0.len(), 1);
            assert_eq!(lf_release(handle), LfResult::Success);
        }
    }

    #[test]
    fn append_with_illegal_tag_reports_illegal_type() {
        unsafe {
            let mut handle: *mut ArgsHandle = std::ptr::null_mut();
            lf_create_args(&mut handle);
            assert_eq!(lf_append_arg(handle, 0, 0xFF), LfResult::IllegalType);
            lf_release(handle);
        }
    }

    #[test]
    fn null_argv_is_null_pointer() {
        unsafe {
            assert_eq!(lf_append_arg(std::ptr::null_mut(), 0, 0), LfResult::NullPointer);
        }
    }

    #[test]
    fn error_mapping_covers_every_variant() {
        assert_eq!(LfResult::from(LfError::Ok), LfResult::Success);
        assert_eq!(LfResult::from(LfError::Null), LfResult::NullPointer);
        assert_eq!(LfResult::from(LfError::NoDevice), LfResult::NoDevicesFound);
        assert_eq!(LfResult::from(LfError::Type), LfResult::IllegalType);
        assert_eq!(LfResult::from(LfError::Module), LfResult::PackageNotLoaded);
        assert_eq!(LfResult::from(LfError::Checksum), LfResult::InvocationError);
    }

    #[test]
    fn image_header_round_trip() {
        let mut bytes = [0u8; ImageHeader::SIZE];
        let fields: [u32; 9] = [0x1000, 0x40, 0x100, 0x200, 0x40, 0x300, 0x20, 0x400, 0x10];
        for (i, f) in fields.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&f.to_le_bytes());
        }
        let header = ImageHeader::from_bytes(&bytes).unwrap();
        assert!(header.is_application());
        assert_eq!(header.module_size, 0x100);
    }
}
