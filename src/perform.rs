//! The device-side perform engine: parses an inbound packet, dispatches it
//! by class, drives the trampoline or a bulk byte transfer, and always owes
//! the channel a reply (spec §3 C7, §4.7).
//!
//! Bulk classes interleave raw bytes with the final `Result` reply; spec
//! §4.7 and P6 fix the ordering: the bytes always move before the `Result`
//! is sent, whichever direction they travel.

use std::iter;

use crate::args::MAX_ARGC;
use crate::error::{self, LfError};
use crate::packet::{self, Class, ParsedBody, ParsedPushPull};
use crate::registry::Registry;
use crate::trampoline::Trampoline;
use crate::transport::Endpoint;
use crate::types::{PointerWidth, WireType};

/// Device attributes returned by a `Configuration` query (spec §3 "Device
/// attributes", §4.7 class `Configuration`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub pointer_width: PointerWidth,
    pub max_argc: u8,
    pub module_count: u8,
}

/// A flat byte arena standing in for the device's addressable RAM, used by
/// ram-load/send/push/pull/receive handlers to resolve the pointers carried
/// in their `PushPullBody` (spec §4.7 "bulk classes").
///
/// A real device target resolves these pointers directly against its
/// address space; this reference engine (and this crate's tests) needs a
/// host-side stand-in, so `Arena` plays that role behind the same
/// `(offset, length)` contract.
#[derive(Debug, Default)]
pub struct Arena {
    bytes: Vec<u8>,
}

impl Arena {
    pub fn new(size: usize) -> Self {
        Arena { bytes: vec![0u8; size] }
    }

    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), LfError> {
        let start = offset as usize;
        let end = start.checked_add(data.len()).ok_or(LfError::Overflow)?;
        let dst = self.bytes.get_mut(start..end).ok_or(LfError::Overflow)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    pub fn read(&self, offset: u32, len: usize) -> Result<&[u8], LfError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(LfError::Overflow)?;
        self.bytes.get(start..end).ok_or(LfError::Overflow)
    }
}

/// Drives one device's `perform` loop: pull a packet, dispatch it, push the
/// reply (spec §4.7).
pub struct PerformEngine<T: Trampoline> {
    registry: Registry,
    trampoline: T,
    arena: Arena,
    ptr_width: PointerWidth,
}

impl<T: Trampoline> PerformEngine<T> {
    pub fn new(registry: Registry, trampoline: T, arena_size: usize, ptr_width: PointerWidth) -> Self {
        PerformEngine {
            registry,
            trampoline,
            arena: Arena::new(arena_size),
            ptr_width,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Pulls one packet header-and-body from `endpoint`, dispatches it, and
    /// pushes whatever bytes and `Result` the class requires, in order
    /// (spec §4.7, P6).
    pub fn perform<E: Endpoint>(&mut self, endpoint: &mut E) -> Result<(), LfError> {
        let header = self.pull_header(endpoint)?;
        let length = u16::from_le_bytes([header[4], header[5]]) as usize;
        let mut buf = vec![0u8; length];
        buf[..packet::HEADER_LEN].copy_from_slice(&header);
        if length > packet::HEADER_LEN {
            endpoint
                .pull(&mut buf[packet::HEADER_LEN..])
                .map_err(|_| LfError::Endpoint)?;
        }

        let parsed = match packet::parse(&buf) {
            Ok(p) => p,
            Err(e) => {
                self.reply_error(endpoint, e)?;
                return Err(e);
            }
        };

        match self.dispatch(parsed.class, parsed.body, endpoint) {
            Ok(()) => Ok(()),
            Err(e) => {
                error::set_last_error(e);
                self.reply_error(endpoint, e)
            }
        }
    }

    fn pull_header<E: Endpoint>(&self, endpoint: &mut E) -> Result<[u8; packet::HEADER_LEN], LfError> {
        let mut header = [0u8; packet::HEADER_LEN];
        endpoint.pull(&mut header).map_err(|_| LfError::Endpoint)?;
        Ok(header)
    }

    fn reply_error<E: Endpoint>(&self, endpoint: &mut E, err: LfError) -> Result<(), LfError> {
        let reply = packet::encode_result(crate::trampoline::SENTINEL, err.to_wire());
        endpoint.push(&reply).map_err(|_| LfError::Endpoint)
    }

    fn dispatch<E: Endpoint>(&mut self, class: Class, body: ParsedBody<'_>, endpoint: &mut E) -> Result<(), LfError> {
        match (class, body) {
            (Class::Configuration, ParsedBody::HeaderOnly) => self.handle_configuration(endpoint),
            (Class::Event, ParsedBody::HeaderOnly) => self.handle_event(endpoint),
            (Class::Standard, ParsedBody::Invocation(inv)) | (Class::User, ParsedBody::Invocation(inv)) => {
                let function = self.registry.lookup_function(inv.index, inv.function)?;
                let ret = inv.ret_type()?;
                let value = self
                    .trampoline
                    .call(function.entry, ret, inv.args(self.ptr_width), self.ptr_width);
                let error = error::last_error();
                self.reply_result(endpoint, value, error)
            }
            (Class::RamLoad, ParsedBody::PushPull(pp)) => self.handle_ram_load(endpoint, pp),
            (Class::Send, ParsedBody::PushPull(pp)) => self.handle_send(endpoint, pp),
            (Class::Receive, ParsedBody::PushPull(pp)) => self.handle_receive(endpoint, pp),
            (Class::Push, ParsedBody::PushPull(pp)) => self.handle_push(endpoint, pp),
            (Class::Pull, ParsedBody::PushPull(pp)) => self.handle_pull(endpoint, pp),
            _ => Err(LfError::Subclass),
        }
    }

    fn reply_result<E: Endpoint>(&self, endpoint: &mut E, value: u64, error: LfError) -> Result<(), LfError> {
        let reply = packet::encode_result(value, error.to_wire());
        endpoint.push(&reply).map_err(|_| LfError::Endpoint)
    }

    /// Reports this device's attributes (spec §4.7 class `Configuration`).
    fn handle_configuration<E: Endpoint>(&self, endpoint: &mut E) -> Result<(), LfError> {
        let config = Configuration {
            pointer_width: self.ptr_width,
            max_argc: MAX_ARGC as u8,
            module_count: (0..u8::MAX).take_while(|&i| self.registry.lookup(i).is_ok()).count() as u8,
        };
        let mut payload = [0u8; 3];
        payload[0] = match config.pointer_width {
            PointerWidth::Bits16 => 0,
            PointerWidth::Bits32 => 1,
        };
        payload[1] = config.max_argc;
        payload[2] = config.module_count;
        endpoint.push(&payload).map_err(|_| LfError::Endpoint)?;
        let reply = packet::encode_result(0, LfError::Ok.to_wire());
        endpoint.push(&reply).map_err(|_| LfError::Endpoint)
    }

    /// Events are reserved (spec §4.7): acknowledge with success and
    /// otherwise ignore the packet.
    fn handle_event<E: Endpoint>(&self, endpoint: &mut E) -> Result<(), LfError> {
        self.reply_result(endpoint, 0, LfError::Ok)
    }

    /// Receives `length` raw bytes from the channel into the arena at the
    /// offset carried as the sub-invocation's implicit pointer argument,
    /// then replies (spec §4.7 "RamLoad").
    fn handle_ram_load<E: Endpoint>(&mut self, endpoint: &mut E, pp: ParsedPushPull<'_>) -> Result<(), LfError> {
        let offset = self.first_arg_as_ptr(&pp)?;
        let mut data = vec![0u8; pp.length as usize];
        endpoint.pull(&mut data).map_err(|_| LfError::Endpoint)?;
        self.arena.write(offset, &data)?;
        self.reply_result(endpoint, 0, LfError::Ok)
    }

    /// Same wire shape as `RamLoad`; kept distinct per spec §3's class
    /// enumeration (a real device may route it to a different sink, e.g. a
    /// streaming UART rather than RAM).
    fn handle_send<E: Endpoint>(&mut self, endpoint: &mut E, pp: ParsedPushPull<'_>) -> Result<(), LfError> {
        self.handle_ram_load(endpoint, pp)
    }

    /// Sends `length` bytes from the arena, then the `Result` (spec §4.7
    /// "Receive", P6: bytes precede the reply even on this read path).
    fn handle_receive<E: Endpoint>(&mut self, endpoint: &mut E, pp: ParsedPushPull<'_>) -> Result<(), LfError> {
        let offset = self.first_arg_as_ptr(&pp)?;
        let data = self.arena.read(offset, pp.length as usize)?.to_vec();
        endpoint.push(&data).map_err(|_| LfError::Endpoint)?;
        self.reply_result(endpoint, 0, LfError::Ok)
    }

    /// Invokes the sub-function with an implicit leading `(ptr, length)`
    /// argument pair synthesized from the arena write, chained with the
    /// wire-decoded extra arguments (spec §4.7 "Push").
    fn handle_push<E: Endpoint>(&mut self, endpoint: &mut E, pp: ParsedPushPull<'_>) -> Result<(), LfError> {
        let offset = 0u32; // fixed staging offset, mirrors handle_pull
        let mut data = vec![0u8; pp.length as usize];
        endpoint.pull(&mut data).map_err(|_| LfError::Endpoint)?;
        self.arena.write(offset, &data)?;

        let function = self.registry.lookup_function(pp.sub.index, pp.sub.function)?;
        let ret = pp.sub.ret_type()?;
        let implicit = iter::once(Ok((WireType::Ptr, offset as u64)))
            .chain(iter::once(Ok((WireType::Uint, pp.length as u64))));
        let args = implicit.chain(pp.sub.args(self.ptr_width));
        let value = self.trampoline.call(function.entry, ret, args, self.ptr_width);
        let error = error::last_error();
        self.reply_result(endpoint, value, error)
    }

    /// Invokes the sub-function, then sends whatever it wrote into the
    /// arena back over the channel before the `Result` (spec §4.7 "Pull",
    /// P6).
    fn handle_pull<E: Endpoint>(&mut self, endpoint: &mut E, pp: ParsedPushPull<'_>) -> Result<(), LfError> {
        let offset = 0u32; // fixed staging offset, mirrors handle_push
        let function = self.registry.lookup_function(pp.sub.index, pp.sub.function)?;
        let ret = pp.sub.ret_type()?;
        let implicit = iter::once(Ok((WireType::Ptr, offset as u64)))
            .chain(iter::once(Ok((WireType::Uint, pp.length as u64))));
        let args = implicit.chain(pp.sub.args(self.ptr_width));
        let value = self.trampoline.call(function.entry, ret, args, self.ptr_width);
        let error = error::last_error();

        let data = self.arena.read(offset, pp.length as usize)?.to_vec();
        endpoint.push(&data).map_err(|_| LfError::Endpoint)?;
        self.reply_result(endpoint, value, error)
    }

    /// `RamLoad`/`Send` carry the destination offset as the sub-invocation's
    /// sole extra argument (no native call is made for these classes, so
    /// the "argument list" only ever holds the address).
    fn first_arg_as_ptr(&self, pp: &ParsedPushPull<'_>) -> Result<u32, LfError> {
        let mut args = pp.sub.args(self.ptr_width);
        match args.next() {
            Some(Ok((_, value))) => Ok(value as u32),
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgList;
    use crate::packet::{build_configuration, build_invocation, build_push_pull, decode_result};
    use crate::registry::{Function, Module, ParamTypes};
    use crate::trampoline::{EntryPoint, NativeTrampoline};
    use crate::transport::loopback::LoopbackEndpoint;

    extern "C" fn add3(a: u64, b: u64, c: u64) -> u64 {
        a.wrapping_add(b).wrapping_add(c)
    }

    extern "C" fn identity_ptr(ptr: u64, _len: u64) -> u64 {
        ptr
    }

    fn registry_with_led() -> Registry {
        let mut registry = Registry::new();
        let functions: &'static [Function] = Box::leak(
            vec![Function {
                entry: EntryPoint::new(add3 as usize),
                parameters: ParamTypes::new(&[WireType::U8, WireType::U8, WireType::U8]),
                return_type: WireType::U8,
            }]
            .into_boxed_slice(),
        );
        let led = Module::new("led", functions).unwrap();
        registry.register(led).unwrap();
        registry
    }

    /// Feeds `request` to a fresh loopback as the "device inbound" queue,
    /// runs one `perform` pass, and returns whatever bytes the device
    /// pushed back.
    fn run_device_side(engine: &mut PerformEngine<NativeTrampoline>, request: &[u8]) -> Vec<u8> {
        let mut endpoint = LoopbackEndpoint::new();
        endpoint.inbound.extend(request.iter().copied());
        engine.perform(&mut endpoint).unwrap();
        endpoint.outbound.into_iter().collect()
    }

    #[test]
    fn standard_invocation_replies_with_summed_result() {
        let mut engine = PerformEngine::new(registry_with_led(), NativeTrampoline, 64, PointerWidth::Bits32);
        let mut args = ArgList::new();
        args.append(10, WireType::U8).unwrap();
        args.append(20, WireType::U8).unwrap();
        args.append(30, WireType::U8).unwrap();
        let pkt = build_invocation::<64>(Class::Standard, 0, 0, WireType::U8, &args, PointerWidth::Bits32).unwrap();

        let reply = run_device_side(&mut engine, pkt.as_slice());
        let (value, error) = decode_result(&reply).unwrap();
        assert_eq!(value, 60);
        assert_eq!(error, LfError::Ok.to_wire());
    }

    #[test]
    fn unbound_module_index_replies_module_error() {
        let mut engine = PerformEngine::new(registry_with_led(), NativeTrampoline, 64, PointerWidth::Bits32);
        let args = ArgList::new();
        let pkt = build_invocation::<64>(Class::Standard, 9, 0, WireType::Void, &args, PointerWidth::Bits32).unwrap();

        let reply = run_device_side(&mut engine, pkt.as_slice());
        let (_, error) = decode_result(&reply).unwrap();
        assert_eq!(error, LfError::Null.to_wire());
    }

    #[test]
    fn event_is_acknowledged_with_success_matches_spec_4_7() {
        let mut engine = PerformEngine::new(registry_with_led(), NativeTrampoline, 64, PointerWidth::Bits32);
        let mut pkt = [0u8; packet::HEADER_LEN];
        pkt[0..2].copy_from_slice(&packet::MAGIC.to_le_bytes());
        pkt[4..6].copy_from_slice(&(packet::HEADER_LEN as u16).to_le_bytes());
        pkt[6] = Class::Event.code();
        let checksum = crate::crc::checksum(&pkt);
        pkt[2..4].copy_from_slice(&checksum.to_le_bytes());

        let reply = run_device_side(&mut engine, &pkt);
        let (_, error) = decode_result(&reply).unwrap();
        assert_eq!(error, LfError::Ok.to_wire());
    }

    #[test]
    fn configuration_reports_module_count() {
        let mut engine = PerformEngine::new(registry_with_led(), NativeTrampoline, 64, PointerWidth::Bits32);
        let pkt = build_configuration::<64>().unwrap();

        let reply = run_device_side(&mut engine, pkt.as_slice());
        assert_eq!(reply[0], 1); // Bits32
        assert_eq!(reply[2], 1); // one module registered
        let (_, error) = decode_result(&reply[3..]).unwrap();
        assert_eq!(error, LfError::Ok.to_wire());
    }

    #[test]
    fn ram_load_writes_bytes_before_replying_matches_p6() {
        let mut registry = Registry::new();
        registry.register(Module::new("x", &[]).unwrap()).unwrap();
        let mut engine = PerformEngine::new(registry, NativeTrampoline, 64, PointerWidth::Bits32);

        let mut extra = ArgList::new();
        extra.append(8, WireType::Ptr).unwrap(); // destination offset
        let payload = [0xAAu8, 0xBB, 0xCC, 0xDD];
        let pkt = build_push_pull::<64>(Class::RamLoad, payload.len() as u32, 0, 0, WireType::Void, &extra, PointerWidth::Bits32).unwrap();

        let mut endpoint = LoopbackEndpoint::new();
        endpoint.inbound.extend(pkt.as_slice().iter().copied());
        endpoint.inbound.extend(payload.iter().copied());
        engine.perform(&mut endpoint).unwrap();

        assert_eq!(engine.arena.read(8, 4).unwrap(), &payload);
        let reply: Vec<u8> = endpoint.outbound.into_iter().collect();
        let (_, error) = decode_result(&reply).unwrap();
        assert_eq!(error, LfError::Ok.to_wire());
    }

    #[test]
    fn pull_sends_bytes_before_result_matches_p6() {
        let functions: &'static [Function] = Box::leak(
            vec![Function {
                entry: EntryPoint::new(identity_ptr as usize),
                parameters: ParamTypes::new(&[WireType::Ptr, WireType::Uint]),
                return_type: WireType::Ptr,
            }]
            .into_boxed_slice(),
        );
        let mut registry = Registry::new();
        registry.register(Module::new("x", functions).unwrap()).unwrap();
        let mut engine = PerformEngine::new(registry, NativeTrampoline, 64, PointerWidth::Bits32);
        engine.arena.write(0, &[1, 2, 3, 4]).unwrap();

        let extra = ArgList::new();
        let pkt = build_push_pull::<64>(Class::Pull, 4, 0, 0, WireType::Ptr, &extra, PointerWidth::Bits32).unwrap();

        let mut endpoint = LoopbackEndpoint::new();
        endpoint.inbound.extend(pkt.as_slice().iter().copied());
        engine.perform(&mut endpoint).unwrap();

        let out: Vec<u8> = endpoint.outbound.into_iter().collect();
        assert_eq!(&out[..4], &[1, 2, 3, 4]); // bytes first
        let (value, error) = decode_result(&out[4..]).unwrap();
        assert_eq!(value, 0); // offset 0
        assert_eq!(error, LfError::Ok.to_wire());
    }
}
