//! The host-side invocation engine: binds devices, tracks which one is
//! selected, and drives a blocking `invoke -> perform -> reply` round trip
//! over an [`Endpoint`] (spec §3 C8, §5).
//!
//! Unlike the teacher crate's async, multi-connection-aware host stack,
//! this engine is deliberately synchronous (spec §5: "each `invoke` blocks
//! until the `Result` is pulled") and tracks a single process-wide
//! selected device (spec §5 "Device selection"), matching the source's
//! `fmr_select` global rather than inventing per-call device arguments.

use crate::args::ArgList;
use crate::error::LfError;
use crate::packet::{self, Class};
use crate::registry::{name_identifier, Registry};
use crate::transport::Endpoint;
use crate::types::{PointerWidth, WireType};

/// Bit set in a resolved module index to mark a user (dynamically loaded)
/// invocation rather than a standard one (spec §3 class table, §4.8).
pub const USER_INVOCATION_BIT: u8 = 0x80;

/// A bound device: its identity, negotiated attributes, and transport.
pub struct Device<E: Endpoint> {
    name: String,
    identifier: u16,
    ptr_width: PointerWidth,
    endpoint: E,
}

impl<E: Endpoint> Device<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }
}

/// The host-side engine: a table of bound devices plus the single
/// "currently selected" index (spec §5).
///
/// `bind` is idempotent by name (P7): binding the same name twice returns
/// the existing device rather than creating a duplicate entry.
pub struct InvocationEngine<E: Endpoint> {
    devices: Vec<Device<E>>,
    selected: Option<usize>,
}

impl<E: Endpoint> Default for InvocationEngine<E> {
    fn default() -> Self {
        InvocationEngine {
            devices: Vec::new(),
            selected: None,
        }
    }
}

impl<E: Endpoint> InvocationEngine<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `endpoint`, configuring it and querying its
    /// attributes via a `Configuration` packet (spec §4.7, §5 "Binding").
    ///
    /// If a device with this name is already bound, returns its existing
    /// index unchanged (P7) instead of configuring `endpoint` a second
    /// time; the caller's `endpoint` is then dropped.
    pub fn bind(&mut self, name: &str, mut endpoint: E) -> Result<usize, LfError> {
        let identifier = name_identifier(name);
        if let Some(idx) = self.devices.iter().position(|d| d.identifier == identifier) {
            log::debug!("bind: '{name}' already bound at index {idx}");
            return Ok(idx);
        }

        log::trace!("bind: configuring endpoint for '{name}'");
        endpoint.configure().map_err(|_| LfError::Endpoint)?;

        let query = packet::build_configuration::<{packet::DEFAULT_CAPACITY}>()?;
        endpoint.push(query.as_slice()).map_err(|_| LfError::Endpoint)?;

        let mut attrs = [0u8; 3];
        endpoint.pull(&mut attrs).map_err(|_| LfError::Endpoint)?;
        let ptr_width = match attrs[0] {
            0 => PointerWidth::Bits16,
            _ => PointerWidth::Bits32,
        };
        let mut reply = [0u8; packet::RESULT_LEN];
        endpoint.pull(&mut reply).map_err(|_| LfError::Endpoint)?;
        let (_, error) = packet::decode_result(&reply)?;
        let error = LfError::from_wire(error);
        if !error.is_ok() {
            log::warn!("bind: '{name}' rejected the configuration query: {error}");
            return Err(error);
        }

        self.devices.push(Device {
            name: name.to_string(),
            identifier,
            ptr_width,
            endpoint,
        });
        log::debug!("bind: '{name}' attached at index {}", self.devices.len() - 1);
        Ok(self.devices.len() - 1)
    }

    /// Resolves `module_name` against the device's dynamic loader table
    /// (spec §4.8 `bind(module)`): computes the name-CRC, looks it up in
    /// `registry`, and returns the assigned index with the user-invocation
    /// bit set. The returned index is what `lf_invoke` expects as its
    /// `module_index` argument.
    pub fn bind_module(&self, device_index: usize, registry: &Registry, module_name: &str) -> Result<u8, LfError> {
        if device_index >= self.devices.len() {
            return Err(LfError::NoDevice);
        }
        let identifier = name_identifier(module_name);
        let module = match registry.find_by_identifier(identifier) {
            Some(m) => m,
            None => {
                log::warn!("bind_module: '{module_name}' not found in the device's module table");
                return Err(LfError::Module);
            }
        };
        let index = module.index() | USER_INVOCATION_BIT;
        log::debug!("bind_module: '{module_name}' resolved to index {index:#04x} on device {device_index}");
        Ok(index)
    }

    /// Selects the device at `index` as the process-wide target for
    /// subsequent `invoke` calls (spec §5). Does not itself touch the
    /// transport.
    pub fn select(&mut self, index: usize) -> Result<(), LfError> {
        if index >= self.devices.len() {
            log::warn!("select: index {index} out of range");
            return Err(LfError::NoDevice);
        }
        log::trace!("select: device {index}");
        self.selected = Some(index);
        Ok(())
    }

    /// Releases the selected device's transport and removes it from the
    /// table, leaving no device selected.
    pub fn detach(&mut self, index: usize) -> Result<(), LfError> {
        if index >= self.devices.len() {
            return Err(LfError::NoDevice);
        }
        let mut device = self.devices.remove(index);
        device.endpoint.destroy().map_err(|_| LfError::Endpoint)?;
        self.selected = match self.selected {
            Some(s) if s == index => None,
            Some(s) if s > index => Some(s - 1),
            other => other,
        };
        Ok(())
    }

    fn selected_device(&mut self) -> Result<&mut Device<E>, LfError> {
        let idx = self.selected.ok_or(LfError::NoDevice)?;
        self.devices.get_mut(idx).ok_or(LfError::NoDevice)
    }

    /// Blocking call: builds a `Standard`/`User` invocation packet, pushes
    /// it, and blocks until the `Result` reply is pulled (spec §5).
    pub fn invoke(
        &mut self,
        class: Class,
        index: u8,
        function: u8,
        ret: WireType,
        args: &ArgList,
    ) -> Result<u64, LfError> {
        let device = self.selected_device()?;
        let ptr_width = device.ptr_width;
        log::trace!("invoke: class={class:?} index={index} function={function}");
        let pkt = packet::build_invocation::<{packet::DEFAULT_CAPACITY}>(class, index, function, ret, args, ptr_width)?;
        device.endpoint.push(pkt.as_slice()).map_err(|_| LfError::Endpoint)?;

        let mut reply = [0u8; packet::RESULT_LEN];
        device.endpoint.pull(&mut reply).map_err(|_| LfError::Endpoint)?;
        let (value, error) = packet::decode_result(&reply)?;
        let error = LfError::from_wire(error);
        if error.is_ok() {
            Ok(value)
        } else {
            log::warn!("invoke: device reported {error}");
            Err(error)
        }
    }

    /// Blocking call for the bulk classes: pushes the `PushPullBody`
    /// packet, then moves `payload` (for `RamLoad`/`Send`/`Push`) or
    /// receives into `out` (for `Receive`/`Pull`) before pulling the
    /// trailing `Result` (spec §4.7, P6).
    pub fn push_bytes(
        &mut self,
        class: Class,
        length: u32,
        index: u8,
        function: u8,
        ret: WireType,
        extra_args: &ArgList,
        payload: &[u8],
    ) -> Result<u64, LfError> {
        let device = self.selected_device()?;
        let ptr_width = device.ptr_width;
        log::trace!("push_bytes: class={class:?} index={index} function={function} length={length}");
        let pkt = packet::build_push_pull::<{packet::DEFAULT_CAPACITY}>(class, length, index, function, ret, extra_args, ptr_width)?;
        device.endpoint.push(pkt.as_slice()).map_err(|_| LfError::Endpoint)?;
        device.endpoint.push(payload).map_err(|_| LfError::Endpoint)?;

        let mut reply = [0u8; packet::RESULT_LEN];
        device.endpoint.pull(&mut reply).map_err(|_| LfError::Endpoint)?;
        let (value, error) = packet::decode_result(&reply)?;
        let error = LfError::from_wire(error);
        if error.is_ok() {
            Ok(value)
        } else {
            Err(error)
        }
    }

    /// Blocking call for `Receive`/`Pull`: pushes the request, pulls
    /// exactly `out.len()` bulk bytes, then pulls the trailing `Result`
    /// (spec §4.7, P6).
    pub fn pull_bytes(
        &mut self,
        class: Class,
        index: u8,
        function: u8,
        ret: WireType,
        extra_args: &ArgList,
        out: &mut [u8],
    ) -> Result<u64, LfError> {
        let device = self.selected_device()?;
        let ptr_width = device.ptr_width;
        log::trace!("pull_bytes: class={class:?} index={index} function={function} length={}", out.len());
        let pkt = packet::build_push_pull::<{packet::DEFAULT_CAPACITY}>(class, out.len() as u32, index, function, ret, extra_args, ptr_width)?;
        device.endpoint.push(pkt.as_slice()).map_err(|_| LfError::Endpoint)?;
        device.endpoint.pull(out).map_err(|_| LfError::Endpoint)?;

        let mut reply = [0u8; packet::RESULT_LEN];
        device.endpoint.pull(&mut reply).map_err(|_| LfError::Endpoint)?;
        let (value, error) = packet::decode_result(&reply)?;
        let error = LfError::from_wire(error);
        if error.is_ok() {
            Ok(value)
        } else {
            Err(error)
        }
    }
}
