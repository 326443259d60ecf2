//! Field codecs for the pointer wire protocol.
//!
//! Path segments are bit-packed: the fields are laid side by side, lowest
//! field in the lowest bits, then the packed word is re-cut into transmission
//! units of another layout. Device readbacks are big-endian byte fields.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};

/// Widest supported packed word.
pub const MAX_LAYOUT_BITS: u32 = 64;

/// Widest supported single field.
pub const MAX_FIELD_BITS: u32 = 32;

// ---------------------------------------------------------------------------
// Bit layouts
// ---------------------------------------------------------------------------

/// Ordered field widths of a packed word, least significant field first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "Vec<u32>", into = "Vec<u32>"))]
pub struct BitLayout {
    widths: Vec<u32>,
}

impl BitLayout {
    /// Validate `widths`: at least one field, each 1..=32 bits, at most 64
    /// bits in total.
    pub fn new(widths: &[u32]) -> Result<Self> {
        if widths.is_empty() {
            return Err(WireError::EmptyLayout);
        }
        for (index, &width) in widths.iter().enumerate() {
            if width == 0 || width > MAX_FIELD_BITS {
                return Err(WireError::InvalidWidth { index, width });
            }
        }
        let total: u32 = widths.iter().sum();
        if total > MAX_LAYOUT_BITS {
            return Err(WireError::LayoutTooWide { total });
        }
        Ok(Self { widths: widths.to_vec() })
    }

    /// Path segment encoding: laser 1 bit, delay 9, fix 11, mob 11.
    pub fn path_segment() -> Self {
        Self { widths: vec![1, 9, 11, 11] }
    }

    /// `count` whole bytes (clamped to 1..=8).
    pub fn bytes(count: usize) -> Self {
        Self { widths: vec![8; count.clamp(1, 8)] }
    }

    pub fn widths(&self) -> &[u32] {
        &self.widths
    }

    pub fn len(&self) -> usize {
        self.widths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }

    pub fn total_bits(&self) -> u32 {
        self.widths.iter().sum()
    }

    /// Largest value field `index` can hold.
    pub fn max_value(&self, index: usize) -> u64 {
        self.widths.get(index).map_or(0, |&w| mask(w))
    }

    /// Bytes needed to carry one field of this layout (the widest one).
    pub fn unit_bytes(&self) -> usize {
        let widest = self.widths.iter().copied().max().unwrap_or(0);
        widest.div_ceil(8) as usize
    }

    /// Pack one value per field into a single word.
    pub fn pack(&self, fields: &[u64]) -> Result<u64> {
        if fields.len() != self.widths.len() {
            return Err(WireError::FieldCount { expected: self.widths.len(), got: fields.len() });
        }
        let mut word = 0u64;
        let mut offset = 0;
        for (index, (&value, &width)) in fields.iter().zip(&self.widths).enumerate() {
            if value > mask(width) {
                return Err(WireError::FieldOverflow { index, value, width });
            }
            word |= value << offset;
            offset += width;
        }
        Ok(word)
    }

    /// Cut a word into one value per field. Bits above the layout are
    /// discarded.
    pub fn split(&self, word: u64) -> Vec<u64> {
        let mut offset = 0;
        self.widths
            .iter()
            .map(|&width| {
                let v = (word >> offset) & mask(width);
                offset += width;
                v
            })
            .collect()
    }
}

impl TryFrom<Vec<u32>> for BitLayout {
    type Error = WireError;

    fn try_from(widths: Vec<u32>) -> Result<Self> {
        Self::new(&widths)
    }
}

impl From<BitLayout> for Vec<u32> {
    fn from(layout: BitLayout) -> Self {
        layout.widths
    }
}

fn mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

// ---------------------------------------------------------------------------
// Byte fields
// ---------------------------------------------------------------------------

/// Read a big-endian unsigned 16-bit integer.
pub fn read_uint16(data: &[u8], offset: usize, name: &'static str) -> Result<u16> {
    check_len(data, offset, 2, name)?;
    Ok(u16::from_be_bytes([data[offset], data[offset + 1]]))
}

/// Append the low `n` bytes of `value`, little-endian.
pub fn write_uint_le(buf: &mut Vec<u8>, value: u64, n: usize) {
    buf.extend(value.to_le_bytes().iter().take(n));
}

/// Read `n` little-endian bytes at `offset`.
pub fn read_uint_le(data: &[u8], offset: usize, n: usize, name: &'static str) -> Result<u64> {
    check_len(data, offset, n, name)?;
    Ok(data[offset..offset + n]
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

// ---------------------------------------------------------------------------
// Internal
// ---------------------------------------------------------------------------

pub(crate) fn check_len(data: &[u8], offset: usize, need: usize, name: &'static str) -> Result<()> {
    if data.len() < offset + need {
        Err(WireError::payload_too_short(name, offset + need, data))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_validation() {
        assert!(matches!(BitLayout::new(&[]), Err(WireError::EmptyLayout)));
        assert!(matches!(
            BitLayout::new(&[8, 0, 8]),
            Err(WireError::InvalidWidth { index: 1, width: 0 })
        ));
        assert!(matches!(
            BitLayout::new(&[8, 33]),
            Err(WireError::InvalidWidth { index: 1, width: 33 })
        ));
        assert!(matches!(
            BitLayout::new(&[32, 32, 1]),
            Err(WireError::LayoutTooWide { total: 65 })
        ));
        let l = BitLayout::new(&[32, 32]).unwrap();
        assert_eq!(l.total_bits(), 64);
    }

    #[test]
    fn presets_are_valid() {
        let seg = BitLayout::path_segment();
        assert_eq!(BitLayout::new(seg.widths()).unwrap(), seg);
        assert_eq!(seg.total_bits(), 32);
        assert_eq!(BitLayout::bytes(4).widths(), &[8, 8, 8, 8]);
        assert_eq!(BitLayout::bytes(0).len(), 1);
        assert_eq!(BitLayout::bytes(12).total_bits(), 64);
    }

    #[test]
    fn pack_lowest_field_first() {
        let l = BitLayout::new(&[1, 9, 11, 11]).unwrap();
        // laser 1, delay 3, fix 5, mob 2
        let word = l.pack(&[1, 3, 5, 2]).unwrap();
        assert_eq!(word, 1 | (3 << 1) | (5 << 10) | (2 << 21));
        assert_eq!(l.split(word), vec![1, 3, 5, 2]);
    }

    #[test]
    fn repack_into_bytes() {
        let enc = BitLayout::new(&[1, 9, 11, 11]).unwrap();
        let tx = BitLayout::new(&[8, 8, 8, 8]).unwrap();
        let word = enc.pack(&[1, 511, 2037, 1019]).unwrap();
        let units = tx.split(word);
        assert!(units.iter().all(|&u| u <= 0xFF));
        let rejoined = tx.pack(&units).unwrap();
        assert_eq!(enc.split(rejoined), vec![1, 511, 2037, 1019]);
    }

    #[test]
    fn field_overflow() {
        let l = BitLayout::new(&[1, 9, 11, 11]).unwrap();
        let err = l.pack(&[0, 512, 0, 0]).unwrap_err();
        assert!(matches!(err, WireError::FieldOverflow { index: 1, value: 512, width: 9 }));
        assert_eq!(err.to_string(), "field 1 value 512 does not fit in 9 bits");
    }

    #[test]
    fn field_count() {
        let l = BitLayout::new(&[8, 8]).unwrap();
        assert!(matches!(l.pack(&[1]), Err(WireError::FieldCount { expected: 2, got: 1 })));
    }

    #[test]
    fn full_width_fields() {
        let l = BitLayout::new(&[32, 32]).unwrap();
        let word = l.pack(&[u64::from(u32::MAX), 7]).unwrap();
        assert_eq!(l.split(word), vec![u64::from(u32::MAX), 7]);
        assert_eq!(l.max_value(0), u64::from(u32::MAX));
        assert_eq!(l.max_value(9), 0);
    }

    #[test]
    fn unit_bytes() {
        assert_eq!(BitLayout::new(&[8, 8, 8, 8]).unwrap().unit_bytes(), 1);
        assert_eq!(BitLayout::new(&[16, 16]).unwrap().unit_bytes(), 2);
        assert_eq!(BitLayout::new(&[12, 12, 8]).unwrap().unit_bytes(), 2);
    }

    #[test]
    fn uint16_big_endian() {
        assert_eq!(read_uint16(&[0x03, 0xFB], 0, "Steppers").unwrap(), 1019);
        let err = read_uint16(&[0x03], 0, "Steppers").unwrap_err();
        assert_eq!(err.to_string(), "payload too short for Steppers: need 2 bytes, got 1 | 03");
    }

    #[test]
    fn uint_le_round_trip() {
        let mut buf = Vec::new();
        write_uint_le(&mut buf, 0x0ABC, 2);
        assert_eq!(buf, vec![0xBC, 0x0A]);
        assert_eq!(read_uint_le(&buf, 0, 2, "unit").unwrap(), 0x0ABC);
    }
}
