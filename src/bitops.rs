//! Bit-level primitives for 16-bit data words
//!
//! The MIDAS hardware writes words whose bit order depends on the
//! acquisition front-end; the decoder normalizes them with these pure
//! helpers. All functions are total over their input range.

/// Reverse the 16 bits of `x` (bit 0 ↔ bit 15, bit 1 ↔ bit 14, ...).
///
/// Involutive: `bit_reverse16(bit_reverse16(x)) == x` for all `x`.
#[inline]
pub fn bit_reverse16(x: u16) -> u16 {
    x.reverse_bits()
}

/// Swap the two bytes of a 16-bit value (endianness swap).
///
/// Distinct from [`bit_reverse16`]: this moves whole bytes, not bits.
#[inline]
pub fn byte_swap16(x: u16) -> u16 {
    x.swap_bytes()
}

/// Mask with bits `lo..=hi` set.
///
/// `bit_mask(8, 13) == 0x3f00`, `bit_mask(0, 15) == 0xffff`.
#[inline]
pub fn bit_mask(lo: u32, hi: u32) -> u16 {
    debug_assert!(lo <= hi && hi < 16);
    let width = hi - lo + 1;
    (((1u32 << width) - 1) << lo) as u16
}
