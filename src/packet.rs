//! The wire packet format: header, classes, and class-specific bodies
//! (spec §3 "Packet", §4.3).
//!
//! A [`Packet`] is a fixed-size buffer built once and transmitted whole.
//! Building computes the header, then the CRC-16 checksum last, over the
//! whole buffer with the checksum field zeroed, matching spec §4.3's
//! stated build order.

use crate::args::ArgList;
use crate::crc;
use crate::error::LfError;
use crate::types::{self, PointerWidth, WireType};

/// Packet magic, chosen per spec §3 ("the constant 0xFE1A or equivalent").
pub const MAGIC: u16 = 0xFE1A;

/// `magic(2) + checksum(2) + length(2) + class(1) + pad(1)`.
pub const HEADER_LEN: usize = 8;

/// Typical packet buffer capacity (spec §3: "implementation-defined
/// capacity, typical 64 bytes").
pub const DEFAULT_CAPACITY: usize = 64;

/// Size of the fixed-size `Result` reply: `value:u64, error:u32`.
pub const RESULT_LEN: usize = 12;

/// Packet class byte (spec §3 "Packet classes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "device-log", derive(defmt::Format))]
#[repr(u8)]
pub enum Class {
    Configuration = 0,
    Standard = 1,
    User = 2,
    RamLoad = 3,
    Send = 4,
    Push = 5,
    Receive = 6,
    Pull = 7,
    Event = 8,
}

impl Class {
    /// Decodes a class byte. Any value outside the enumerated set is
    /// `ErrSubclass` (spec §4.3(d)).
    ///
    /// Spec §9 notes the source's `fmr_perform` `default` branch asserts
    /// `true` (always fires) where it plainly meant `false`; this decoder
    /// implements the evidently-intended behavior instead of replicating
    /// the bug.
    pub fn from_code(code: u8) -> Result<Self, LfError> {
        Ok(match code {
            0 => Class::Configuration,
            1 => Class::Standard,
            2 => Class::User,
            3 => Class::RamLoad,
            4 => Class::Send,
            5 => Class::Push,
            6 => Class::Receive,
            7 => Class::Pull,
            8 => Class::Event,
            _ => return Err(LfError::Subclass),
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Classes whose body is a [`PushPullBody`] rather than an
    /// [`InvocationBody`] or a bare header.
    pub fn is_bulk(self) -> bool {
        matches!(
            self,
            Class::RamLoad | Class::Send | Class::Push | Class::Receive | Class::Pull
        )
    }

    /// Push/pull classes additionally invoke a function around the bulk
    /// transfer (spec §4.7); ram-load/send/receive move bytes to or from
    /// an address without a native call.
    pub fn invokes_function(self) -> bool {
        matches!(self, Class::Push | Class::Pull)
    }
}

/// A fixed-capacity packet buffer, built once and transmitted whole.
///
/// `N` is the implementation's chosen packet capacity (spec §3); pick one
/// large enough for the bodies you build (`DEFAULT_CAPACITY` for typical
/// use).
pub struct Packet<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Packet<N> {
    fn empty() -> Self {
        Packet { buf: [0u8; N], len: 0 }
    }

    fn write_header(&mut self, class: Class, body_len: usize) -> Result<(), LfError> {
        let total = HEADER_LEN + body_len;
        if total > N {
            return Err(LfError::Overflow);
        }
        self.buf[0..2].copy_from_slice(&MAGIC.to_le_bytes());
        self.buf[2..4].copy_from_slice(&0u16.to_le_bytes());
        self.buf[4..6].copy_from_slice(&(total as u16).to_le_bytes());
        self.buf[6] = class.code();
        self.buf[7] = 0;
        self.len = total;
        Ok(())
    }

    /// Computes and writes the CRC-16 over the whole packet with the
    /// checksum field zeroed. Must be the last step of construction.
    fn finish_checksum(&mut self) {
        let sum = crc::checksum(&self.buf[..self.len]);
        self.buf[2..4].copy_from_slice(&sum.to_le_bytes());
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

/// Writes an `InvocationBody` (spec §3) into `dst`, returning the number
/// of bytes written. `dst` must be at least
/// `4 + 8 + sum(sizeof(arg.tag))` bytes.
fn encode_invocation_body(
    dst: &mut [u8],
    index: u8,
    function: u8,
    ret: WireType,
    args: &ArgList,
    ptr_width: PointerWidth,
) -> Result<usize, LfError> {
    const FIXED_LEN: usize = 4 + 8; // index, function, ret, argc, types
    if dst.len() < FIXED_LEN {
        return Err(LfError::Overflow);
    }
    dst[0] = index;
    dst[1] = function;
    dst[2] = ret.tag();
    dst[3] = args.len() as u8;

    let mut types_word: u64 = 0;
    for (i, arg) in args.iter().enumerate() {
        types_word |= (arg.tag.tag() as u64) << (i * 4);
    }
    dst[4..12].copy_from_slice(&types_word.to_le_bytes());

    let mut pos = FIXED_LEN;
    for arg in args.iter() {
        let width = arg.tag.sizeof(ptr_width);
        if pos + width > dst.len() {
            return Err(LfError::Overflow);
        }
        types::pack(arg.value, arg.tag, ptr_width, &mut dst[pos..pos + width])?;
        pos += width;
    }
    Ok(pos)
}

/// Builds a standard or user invocation packet (spec §4.3).
///
/// `class` must be [`Class::Standard`] or [`Class::User`]; the "user
/// invocation" bit itself lives in `index` (spec GLOSSARY "User
/// invocation"), not in the class byte here beyond selecting which
/// registry table is searched.
pub fn build_invocation<const N: usize>(
    class: Class,
    index: u8,
    function: u8,
    ret: WireType,
    args: &ArgList,
    ptr_width: PointerWidth,
) -> Result<Packet<N>, LfError> {
    if !matches!(class, Class::Standard | Class::User) {
        return Err(LfError::Subclass);
    }
    let mut pkt = Packet::<N>::empty();
    if HEADER_LEN > N {
        return Err(LfError::Overflow);
    }
    let body_len = encode_invocation_body(&mut pkt.buf[HEADER_LEN..], index, function, ret, args, ptr_width)?;
    pkt.write_header(class, body_len)?;
    pkt.finish_checksum();
    Ok(pkt)
}

/// Builds a bulk-class packet (ram-load, send, push, pull, receive).
///
/// `length` is the number of raw bytes that follow (or precede, for
/// `receive`) on the channel. `index`/`function`/`ret`/`extra_args` select
/// the sub-invocation carried in the [`PushPullBody`] (spec §3); for
/// `RamLoad`/`Send`/`Receive`, which never perform a native call, pass
/// `index = 0, function = 0, ret = WireType::Void` and no extra arguments.
/// `extra_args` excludes the implicit leading `(device-pointer, length)`
/// pair a push/pull invocation synthesizes at call time (spec §4.3).
pub fn build_push_pull<const N: usize>(
    class: Class,
    length: u32,
    index: u8,
    function: u8,
    ret: WireType,
    extra_args: &ArgList,
    ptr_width: PointerWidth,
) -> Result<Packet<N>, LfError> {
    if !class.is_bulk() {
        return Err(LfError::Subclass);
    }
    let mut pkt = Packet::<N>::empty();
    if HEADER_LEN + 4 > N {
        return Err(LfError::Overflow);
    }
    pkt.buf[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(&length.to_le_bytes());
    let sub_len = encode_invocation_body(
        &mut pkt.buf[HEADER_LEN + 4..],
        index,
        function,
        ret,
        extra_args,
        ptr_width,
    )?;
    pkt.write_header(class, 4 + sub_len)?;
    pkt.finish_checksum();
    Ok(pkt)
}

/// Builds a bare configuration-query packet (header only, spec §3).
pub fn build_configuration<const N: usize>() -> Result<Packet<N>, LfError> {
    let mut pkt = Packet::<N>::empty();
    pkt.write_header(Class::Configuration, 0)?;
    pkt.finish_checksum();
    Ok(pkt)
}

/// A decoded `InvocationBody`, or the sub-body embedded in a
/// [`ParsedPushPull`], borrowing its parameter bytes from the original
/// buffer.
#[derive(Debug, Clone, Copy)]
pub struct ParsedInvocation<'a> {
    pub index: u8,
    pub function: u8,
    pub ret: u8,
    pub argc: u8,
    pub types_word: u64,
    pub parameters: &'a [u8],
}

impl<'a> ParsedInvocation<'a> {
    fn decode(body: &'a [u8]) -> Result<Self, LfError> {
        if body.len() < 12 {
            return Err(LfError::Overflow);
        }
        let index = body[0];
        let function = body[1];
        let ret = body[2];
        let argc = body[3];
        let types_word = u64::from_le_bytes(body[4..12].try_into().unwrap());
        Ok(ParsedInvocation {
            index,
            function,
            ret,
            argc,
            types_word,
            parameters: &body[12..],
        })
    }

    /// Decoded return type tag.
    pub fn ret_type(&self) -> Result<WireType, LfError> {
        WireType::from_tag(self.ret)
    }

    /// Walks the packed arguments, yielding `(tag, raw 64-bit value)` in
    /// wire order (spec §3 invariant A2).
    pub fn args(&self, ptr_width: PointerWidth) -> PackedArgs<'a> {
        PackedArgs {
            types_word: self.types_word,
            remaining: self.argc,
            bytes: self.parameters,
            ptr_width,
        }
    }
}

/// Iterator over the packed `(tag, value)` pairs of an invocation's
/// parameter region (spec §4.6 "Unpack").
pub struct PackedArgs<'a> {
    types_word: u64,
    remaining: u8,
    bytes: &'a [u8],
    ptr_width: PointerWidth,
}

impl<'a> Iterator for PackedArgs<'a> {
    type Item = Result<(WireType, u64), LfError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let tag_nibble = (self.types_word & 0x0F) as u8;
        self.types_word >>= 4;
        self.remaining -= 1;

        let tag = match WireType::from_tag(tag_nibble) {
            Ok(t) => t,
            Err(e) => return Some(Err(e)),
        };
        let width = tag.sizeof(self.ptr_width);
        if self.bytes.len() < width {
            return Some(Err(LfError::Overflow));
        }
        let (head, tail) = self.bytes.split_at(width);
        self.bytes = tail;
        match types::unpack(head, tag, self.ptr_width) {
            Ok(v) => Some(Ok((tag, v))),
            Err(e) => Some(Err(e)),
        }
    }
}

/// A decoded bulk-class body: the byte count plus the embedded
/// sub-invocation (spec §3 "PushPullBody").
#[derive(Debug, Clone, Copy)]
pub struct ParsedPushPull<'a> {
    pub length: u32,
    pub sub: ParsedInvocation<'a>,
}

impl<'a> ParsedPushPull<'a> {
    fn decode(body: &'a [u8]) -> Result<Self, LfError> {
        if body.len() < 4 {
            return Err(LfError::Overflow);
        }
        let length = u32::from_le_bytes(body[0..4].try_into().unwrap());
        let sub = ParsedInvocation::decode(&body[4..])?;
        Ok(ParsedPushPull { length, sub })
    }
}

/// The body of a parsed packet, specific to its class.
#[derive(Debug, Clone, Copy)]
pub enum ParsedBody<'a> {
    HeaderOnly,
    Invocation(ParsedInvocation<'a>),
    PushPull(ParsedPushPull<'a>),
}

/// A fully-validated, parsed packet borrowing from the buffer it was
/// parsed from.
#[derive(Debug, Clone, Copy)]
pub struct ParsedPacket<'a> {
    pub length: u16,
    pub class: Class,
    pub body: ParsedBody<'a>,
}

/// Parses and validates a packet (spec §4.3).
///
/// Validation order, matching spec §4.3: magic, then length bounds, then
/// checksum, then class. `(a)`/`(c)` failures return
/// [`LfError::Checksum`], `(b)` returns [`LfError::Overflow`], `(d)`
/// returns [`LfError::Subclass`].
pub fn parse(bytes: &[u8]) -> Result<ParsedPacket<'_>, LfError> {
    if bytes.len() < HEADER_LEN {
        return Err(LfError::Overflow);
    }
    let magic = u16::from_le_bytes(bytes[0..2].try_into().unwrap());
    if magic != MAGIC {
        return Err(LfError::Checksum);
    }

    let length = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    if (length as usize) < HEADER_LEN || length as usize > bytes.len() {
        return Err(LfError::Overflow);
    }

    let transmitted_checksum = u16::from_le_bytes(bytes[2..4].try_into().unwrap());
    let region = &bytes[..length as usize];
    let mut owned = region.to_vec();
    owned[2..4].copy_from_slice(&0u16.to_le_bytes());
    if crc::checksum(&owned) != transmitted_checksum {
        return Err(LfError::Checksum);
    }

    let class = Class::from_code(bytes[6])?;
    let body_bytes = &bytes[HEADER_LEN..length as usize];
    let body = if class.is_bulk() {
        ParsedBody::PushPull(ParsedPushPull::decode(body_bytes)?)
    } else if matches!(class, Class::Standard | Class::User) {
        ParsedBody::Invocation(ParsedInvocation::decode(body_bytes)?)
    } else {
        ParsedBody::HeaderOnly
    };

    Ok(ParsedPacket { length, class, body })
}

/// Encodes the fixed-size `Result` reply: `value:u64, error:u32` (spec §3
/// "Result").
pub fn encode_result(value: u64, error: u32) -> [u8; RESULT_LEN] {
    let mut out = [0u8; RESULT_LEN];
    out[0..8].copy_from_slice(&value.to_le_bytes());
    out[8..12].copy_from_slice(&error.to_le_bytes());
    out
}

/// Decodes a fixed-size `Result` reply.
pub fn decode_result(bytes: &[u8]) -> Result<(u64, u32), LfError> {
    if bytes.len() < RESULT_LEN {
        return Err(LfError::Overflow);
    }
    let value = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let error = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    Ok((value, error))
}
