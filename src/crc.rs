//! CRC-16 used for the packet checksum field (spec §3, §4.3).
//!
//! Open question per spec §9: the source's `lf_crc` is referenced but never
//! defined in the retrieved sources, so no bit-for-bit reference exists to
//! match. This implementation fixes CRC-16/CCITT-FALSE (polynomial
//! `0x1021`, initial value `0xFFFF`, no input/output reflection, no final
//! XOR) as the concrete variant, matching the "CCITT-style, seeded 0xFFFF"
//! description in spec §4.3. Interoperating with an unmodified device
//! requires matching this choice.

use crc::{Algorithm, Crc};

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no xorout.
const CCITT_FALSE: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0xFFFF,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x29B1,
    residue: 0x0000,
};

static CRC16: Crc<u16> = Crc::<u16>::new(&CCITT_FALSE);

/// Computes the packet checksum over `bytes`, which must already have its
/// checksum field zeroed (spec §3, §4.3).
pub fn checksum(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_ccitt_false_check_vector() {
        // The standard CRC catalogue check value for CCITT-FALSE is the
        // CRC of the ASCII bytes "123456789".
        assert_eq!(checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn single_bit_flip_changes_checksum() {
        // P3: flipping any single bit outside the checksum field changes
        // the checksum (a necessary, if not sufficient, property of a
        // nontrivial CRC).
        let a = checksum(b"a well formed nrf-rpc style packet body");
        let mut mutated = b"a well formed nrf-rpc style packet body".to_vec();
        mutated[0] ^= 0x01;
        let b = checksum(&mutated);
        assert_ne!(a, b);
    }
}
