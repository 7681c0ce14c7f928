//! Wire type tags and the packed scalar representation (spec §3, §4.1).
//!
//! A [`WireType`] is a 4-bit tag. Invariant T1: the low 3 bits select a
//! width class, bit 3 marks signedness, and every other bit pattern is
//! invalid. Values narrower than 64 bits are carried in a `u64` holding
//! cell on the host and re-narrowed to their wire width when packed.

use crate::error::LfError;

/// Pointer/`uint` width, fixed per device at attach time (spec §3 "Device
/// record", tags 4 and 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    Bits16,
    Bits32,
}

impl PointerWidth {
    pub fn bytes(self) -> usize {
        match self {
            PointerWidth::Bits16 => 2,
            PointerWidth::Bits32 => 4,
        }
    }
}

/// The 10 scalar wire types enumerated in spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "device-log", derive(defmt::Format))]
pub enum WireType {
    U8,
    U16,
    Void,
    U32,
    Uint,
    Ptr,
    U64,
    I8,
    I16,
    I32,
    I64,
}

impl WireType {
    /// Decodes a 4-bit tag per the table in spec §3.
    pub fn from_tag(tag: u8) -> Result<Self, LfError> {
        match tag & 0x0F {
            0 => Ok(WireType::U8),
            1 => Ok(WireType::U16),
            2 => Ok(WireType::Void),
            3 => Ok(WireType::U32),
            4 => Ok(WireType::Uint),
            6 => Ok(WireType::Ptr),
            7 => Ok(WireType::U64),
            8 => Ok(WireType::I8),
            9 => Ok(WireType::I16),
            11 => Ok(WireType::I32),
            15 => Ok(WireType::I64),
            _ => Err(LfError::Type),
        }
    }

    /// Encodes back to the 4-bit tag used on the wire.
    pub fn tag(self) -> u8 {
        match self {
            WireType::U8 => 0,
            WireType::U16 => 1,
            WireType::Void => 2,
            WireType::U32 => 3,
            WireType::Uint => 4,
            WireType::Ptr => 6,
            WireType::U64 => 7,
            WireType::I8 => 8,
            WireType::I16 => 9,
            WireType::I32 => 11,
            WireType::I64 => 15,
        }
    }

    pub fn is_signed(self) -> bool {
        self.tag() & 0x08 != 0
    }

    /// Wire width in bytes. `uint`/`ptr` are sized by the device's pointer
    /// width (spec §3).
    pub fn sizeof(self, ptr_width: PointerWidth) -> usize {
        match self {
            WireType::U8 | WireType::I8 => 1,
            WireType::U16 | WireType::I16 => 2,
            WireType::Void => 0,
            WireType::U32 | WireType::I32 => 4,
            WireType::U64 | WireType::I64 => 8,
            WireType::Uint | WireType::Ptr => ptr_width.bytes(),
        }
    }

    /// `Void` is only legal as a return type (spec §3); it may never tag an
    /// argument value.
    pub fn is_legal_argument(self) -> bool {
        !matches!(self, WireType::Void)
    }
}

/// Packs `value`'s low `sizeof(tag)` bytes into `dst`, little-endian.
///
/// `dst` must be at least `tag.sizeof(ptr_width)` bytes long.
pub fn pack(value: u64, tag: WireType, ptr_width: PointerWidth, dst: &mut [u8]) -> Result<(), LfError> {
    let width = tag.sizeof(ptr_width);
    if dst.len() < width {
        return Err(LfError::Overflow);
    }
    let bytes = value.to_le_bytes();
    dst[..width].copy_from_slice(&bytes[..width]);
    Ok(())
}

/// Unpacks `tag`'s wire width from `src`, sign-extending to 64 bits when
/// `tag` is signed (spec §4.1, P5).
pub fn unpack(src: &[u8], tag: WireType, ptr_width: PointerWidth) -> Result<u64, LfError> {
    let width = tag.sizeof(ptr_width);
    if src.len() < width {
        return Err(LfError::Overflow);
    }
    if width == 0 {
        return Ok(0);
    }
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(&src[..width]);
    let raw = u64::from_le_bytes(buf);
    if tag.is_signed() {
        Ok(sign_extend(raw, width))
    } else {
        Ok(raw)
    }
}

/// Sign-extends the `width`-byte two's-complement value held in the low
/// bytes of `raw` out to a full `u64`.
fn sign_extend(raw: u64, width: usize) -> u64 {
    let bits = width * 8;
    if bits >= 64 {
        return raw;
    }
    let sign_bit = 1u64 << (bits - 1);
    if raw & sign_bit != 0 {
        raw | (!0u64 << bits)
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip_for_every_listed_tag() {
        for &t in &[0u8, 1, 2, 3, 4, 6, 7, 8, 9, 11, 15] {
            let wt = WireType::from_tag(t).unwrap();
            assert_eq!(wt.tag(), t);
        }
    }

    #[test]
    fn illegal_tags_are_rejected() {
        for t in [5u8, 10, 12, 13, 14] {
            assert_eq!(WireType::from_tag(t), Err(LfError::Type));
        }
    }

    #[test]
    fn signed_bit_matches_high_bit_of_tag() {
        for wt in [WireType::I8, WireType::I16, WireType::I32, WireType::I64] {
            assert!(wt.is_signed());
            assert_ne!(wt.tag() & 0x08, 0);
        }
        for wt in [WireType::U8, WireType::U16, WireType::U32, WireType::U64, WireType::Uint, WireType::Ptr, WireType::Void] {
            assert!(!wt.is_signed());
        }
    }

    #[test]
    fn sign_extension_i16_minus_one() {
        // P5: raw bits 0xFFFF for a signed i16 normalize to all-ones u64.
        let raw = 0xFFFFu16.to_le_bytes();
        let v = unpack(&raw, WireType::I16, PointerWidth::Bits32).unwrap();
        assert_eq!(v, 0xFFFF_FFFF_FFFF_FFFFu64);
    }

    #[test]
    fn unsigned_pack_unpack_round_trip() {
        let mut buf = [0u8; 8];
        for (tag, v) in [
            (WireType::U8, 0xAAu64),
            (WireType::U16, 0xBEEFu64),
            (WireType::U32, 0xDEAD_BEEFu64),
            (WireType::U64, 0x0102_0304_0506_0708u64),
        ] {
            pack(v, tag, PointerWidth::Bits32, &mut buf).unwrap();
            let out = unpack(&buf, tag, PointerWidth::Bits32).unwrap();
            assert_eq!(out, v);
        }
    }

    #[test]
    fn uint_and_ptr_sized_by_device_width() {
        assert_eq!(WireType::Uint.sizeof(PointerWidth::Bits16), 2);
        assert_eq!(WireType::Uint.sizeof(PointerWidth::Bits32), 4);
        assert_eq!(WireType::Ptr.sizeof(PointerWidth::Bits16), 2);
        assert_eq!(WireType::Ptr.sizeof(PointerWidth::Bits32), 4);
    }

    #[test]
    fn void_has_zero_width_and_unpacks_to_zero() {
        assert_eq!(WireType::Void.sizeof(PointerWidth::Bits32), 0);
        assert_eq!(unpack(&[], WireType::Void, PointerWidth::Bits32).unwrap(), 0);
    }

    proptest::proptest! {
        #[test]
        fn prop_unsigned_round_trip(v in proptest::prelude::any::<u32>()) {
            let mut buf = [0u8; 8];
            pack(v as u64, WireType::U32, PointerWidth::Bits32, &mut buf).unwrap();
            let out = unpack(&buf, WireType::U32, PointerWidth::Bits32).unwrap();
            proptest::prop_assert_eq!(out, v as u64);
        }

        #[test]
        fn prop_signed_i32_round_trip_preserves_sign(v in proptest::prelude::any::<i32>()) {
            let mut buf = [0u8; 8];
            pack(v as u32 as u64, WireType::I32, PointerWidth::Bits32, &mut buf).unwrap();
            let out = unpack(&buf, WireType::I32, PointerWidth::Bits32).unwrap();
            proptest::prop_assert_eq!(out as i64, v as i64);
        }
    }
}
