use crate::constants::CRC_SEED;

/// Running check over the first `count` words of `words`.
///
/// Starting from `0xFFFF`, every word first rotates the running value left by
/// one bit (bit 15 wraps to bit 0) and is then XORed in. The result depends on
/// word order. A `count` past the end of the slice covers the whole slice.
pub fn checksum(words: &[u16], count: usize) -> u16 {
    words
        .iter()
        .take(count)
        .fold(CRC_SEED, |crc, &word| crc.rotate_left(1) ^ word)
}
