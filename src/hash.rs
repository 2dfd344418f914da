//! Key hashing for server selection.

use byteorder::{ByteOrder, LittleEndian};

const OFFSET_BASIS: u32 = 2_166_136_261;
const PRIME: u32 = 16_777_619;

/// Hash a key for placement on the continuum.
///
/// This is 32-bit FNV-1 (multiply, then XOR each byte) with the accumulator
/// complemented before emission. The reference algorithm emits a four-byte
/// digest; its trailing four bytes are consumed as a little-endian word.
/// Not interchangeable with FNV-1a or stock FNV-1.
pub fn hash_key(data: &[u8]) -> u32 {
    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash = hash.wrapping_mul(PRIME) ^ u32::from(byte);
    }
    let digest = (!hash).to_le_bytes();
    LittleEndian::read_u32(&digest)
}
