//! Bit-level access to AIS payloads.
//!
//! Standard sentences carry the payload armored six bits per character;
//! SAAB `$PAIS` sentences carry hex nibbles.  Both are unpacked into a
//! `BitBuf`, and every message table reads its fields through it.

use super::AisError;

/// Degrees scale for the two coordinate resolutions: 1/1000 min and 1/10000 min.
const SCALE_NARROW: f64 = 60_000.0;
const SCALE_WIDE:   f64 = 600_000.0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitBuf {
    bits: Vec<bool>,
}

impl BitBuf {
    /// Dearmor a 6-bit payload and drop `fill_bits` padding bits from the tail.
    pub fn from_armored(payload: &str, fill_bits: usize) -> Result<BitBuf, AisError> {
        let mut bits = Vec::with_capacity(payload.len() * 6);
        for c in payload.chars() {
            let code = c as u32;
            let value = match code {
                48..=87 => code - 48,
                96..=119 => code - 56,
                _ => return Err(AisError::InvalidArmor(c)),
            };
            push_bits(&mut bits, value as u64, 6);
        }
        let keep = bits.len().saturating_sub(fill_bits);
        bits.truncate(keep);
        Ok(BitBuf { bits })
    }

    /// Unpack hex text, four bits per character.
    pub fn from_hex(hex: &str) -> Result<BitBuf, AisError> {
        let mut bits = Vec::with_capacity(hex.len() * 4);
        for c in hex.chars() {
            let nibble = c.to_digit(16).ok_or_else(|| AisError::InvalidHex(hex.to_string()))?;
            push_bits(&mut bits, nibble as u64, 4);
        }
        Ok(BitBuf { bits })
    }

    /// The low `width` bits of `value`, most significant first.
    pub fn from_uint(value: u64, width: usize) -> BitBuf {
        let mut bits = Vec::with_capacity(width);
        push_bits(&mut bits, value, width);
        BitBuf { bits }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    fn window(&self, start: usize, width: usize) -> Result<&[bool], AisError> {
        self.bits
            .get(start..start + width)
            .ok_or(AisError::Truncated { needed: start + width, available: self.bits.len() })
    }

    /// Unsigned big-endian field, `width <= 32`.
    pub fn uint(&self, start: usize, width: usize) -> Result<u32, AisError> {
        debug_assert!(width <= 32);
        Ok(self
            .window(start, width)?
            .iter()
            .fold(0u32, |acc, &b| (acc << 1) | b as u32))
    }

    /// Two's complement field, `width <= 32`.
    pub fn int(&self, start: usize, width: usize) -> Result<i32, AisError> {
        Ok(sign_extend(self.uint(start, width)?, width))
    }

    pub fn flag(&self, at: usize) -> Result<bool, AisError> {
        Ok(self.window(at, 1)?[0])
    }

    /// Unsigned field where all ones means "not available".
    pub fn field(&self, start: usize, width: usize) -> Result<Option<u32>, AisError> {
        let raw = self.uint(start, width)?;
        Ok((raw != all_ones(width)).then_some(raw))
    }

    /// Two's complement field where all ones means "not available".
    pub fn signed_field(&self, start: usize, width: usize) -> Result<Option<i32>, AisError> {
        let raw = self.uint(start, width)?;
        Ok((raw != all_ones(width)).then(|| sign_extend(raw, width)))
    }

    pub fn latitude(&self, start: usize, width: usize) -> Result<Option<f64>, AisError> {
        Ok(decode_latitude(self.int(start, width)?, width))
    }

    pub fn longitude(&self, start: usize, width: usize) -> Result<Option<f64>, AisError> {
        Ok(decode_longitude(self.int(start, width)?, width))
    }

    /// Six-bit text between `start` and `end`, `@`/space padding stripped.
    /// A payload ending early yields the whole characters that are present.
    pub fn text(&self, start: usize, end: usize) -> String {
        self.raw_text(start, end)
            .trim_matches(|c| c == '@' || c == ' ')
            .to_string()
    }

    /// Six-bit text with only trailing `@` padding removed.
    pub fn message_text(&self, start: usize, end: usize) -> String {
        self.raw_text(start, end).trim_end_matches('@').to_string()
    }

    fn raw_text(&self, start: usize, end: usize) -> String {
        let end = end.min(self.bits.len());
        if start >= end {
            return String::new();
        }
        self.bits[start..end]
            .chunks_exact(6)
            .map(|chunk| {
                let v = chunk.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8);
                sixbit_char(v)
            })
            .collect()
    }

    /// Copy of the bits between `start` and `end`, clipped to the payload.
    pub fn slice(&self, start: usize, end: usize) -> BitBuf {
        let end = end.min(self.bits.len());
        let start = start.min(end);
        BitBuf { bits: self.bits[start..end].to_vec() }
    }
}

fn push_bits(bits: &mut Vec<bool>, value: u64, width: usize) {
    for i in (0..width).rev() {
        bits.push((value >> i) & 1 == 1);
    }
}

fn all_ones(width: usize) -> u32 {
    if width >= 32 { u32::MAX } else { (1u32 << width) - 1 }
}

/// Interpret the low `width` bits of `raw` as two's complement.
pub fn sign_extend(raw: u32, width: usize) -> i32 {
    if width == 0 || width >= 32 {
        return raw as i32;
    }
    let shift = 32 - width as u32;
    ((raw << shift) as i32) >> shift
}

/// Six-bit value to ASCII: values below 32 map to `@`..`_`, the rest to
/// themselves (space..`?`).
fn sixbit_char(v: u8) -> char {
    let v = v & 0x3f;
    (if v < 32 { v + 64 } else { v }) as char
}

/// 24-bit (1/1000 min) or 27-bit (1/10000 min) latitude; 91° is "not available".
pub fn decode_latitude(raw: i32, width: usize) -> Option<f64> {
    let scale = match width {
        24 => SCALE_NARROW,
        27 => SCALE_WIDE,
        _ => return None,
    };
    coordinate(raw, scale, 91.0, 90.0)
}

/// 25-bit (1/1000 min) or 28-bit (1/10000 min) longitude; 181° is "not available".
pub fn decode_longitude(raw: i32, width: usize) -> Option<f64> {
    let scale = match width {
        25 => SCALE_NARROW,
        28 => SCALE_WIDE,
        _ => return None,
    };
    coordinate(raw, scale, 181.0, 180.0)
}

fn coordinate(raw: i32, scale: f64, sentinel: f64, limit: f64) -> Option<f64> {
    if raw as f64 == sentinel * scale {
        return None;
    }
    let degrees = raw as f64 / scale;
    if degrees.abs() > limit {
        return None;
    }
    Some((degrees * 1e6).round() / 1e6)
}


#[cfg(test)]
mod tests {
    use super::testing::BitWriter;
    use super::*;

    #[test]
    fn dearmor_maps_both_ranges() {
        let b = BitBuf::from_armored("0Ww", 0).unwrap();
        assert_eq!(b.len(), 18);
        assert_eq!(b.uint(0, 6).unwrap(), 0);
        assert_eq!(b.uint(6, 6).unwrap(), 39);
        assert_eq!(b.uint(12, 6).unwrap(), 63);
    }

    #[test]
    fn dearmor_drops_fill_bits() {
        let b = BitBuf::from_armored("w", 2).unwrap();
        assert_eq!(b.len(), 4);
        assert_eq!(b.uint(0, 4).unwrap(), 0b1111);
    }

    #[test]
    fn dearmor_rejects_foreign_characters() {
        assert_eq!(BitBuf::from_armored("1X1", 0), Err(AisError::InvalidArmor('X')));
        assert_eq!(BitBuf::from_armored("1 1", 0), Err(AisError::InvalidArmor(' ')));
        assert_eq!(BitBuf::from_armored("x", 0), Err(AisError::InvalidArmor('x')));
    }

    #[test]
    fn hex_unpacks_nibbles() {
        let b = BitBuf::from_hex("A5").unwrap();
        assert_eq!(b.uint(0, 8).unwrap(), 0xA5);
        assert!(BitBuf::from_hex("G0").is_err());
    }

    #[test]
    fn signed_fields() {
        let b = BitWriter::new().int(-5, 8).uint(0xff, 8).int(-3, 10).into_bitbuf();
        assert_eq!(b.int(0, 8).unwrap(), -5);
        assert_eq!(b.field(8, 8).unwrap(), None);
        assert_eq!(b.signed_field(16, 10).unwrap(), Some(-3));
        assert!(matches!(b.uint(20, 8), Err(AisError::Truncated { needed: 28, available: 26 })));
    }

    #[test]
    fn coordinates_and_sentinels() {
        assert_eq!(decode_latitude(91 * 600_000, 27), None);
        assert_eq!(decode_longitude(181 * 600_000, 28), None);
        assert_eq!(decode_latitude(91 * 60_000, 24), None);
        assert_eq!(decode_longitude(181 * 60_000, 25), None);
        assert_eq!(decode_latitude(30_300_000, 27), Some(50.5));
        assert_eq!(decode_longitude(-750_000, 28), Some(-1.25));
        assert_eq!(decode_latitude(-3_030_000, 24), Some(-50.5));
        assert_eq!(decode_latitude(10, 26), None);
    }

    #[test]
    fn text_strips_padding_and_tolerates_short_payloads() {
        let b = BitWriter::new().text("PORT OF SPAIN", 20).into_bitbuf();
        assert_eq!(b.text(0, 120), "PORT OF SPAIN");
        assert_eq!(b.text(0, 500), "PORT OF SPAIN");
        assert_eq!(b.text(0, 23), "POR");
        assert_eq!(b.text(200, 300), "");
    }

    #[test]
    fn armor_round_trips_through_dearmor() {
        let w = BitWriter::new().uint(1, 6).uint(0, 2).uint(123_456_789, 30).uint(3, 2);
        let (payload, fill) = w.armor();
        assert_eq!(fill, 2);
        let b = BitBuf::from_armored(&payload, fill).unwrap();
        assert_eq!(b.len(), 40);
        assert_eq!(b.uint(8, 30).unwrap(), 123_456_789);
    }
}
