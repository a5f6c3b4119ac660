use std::fmt;

use serde::Serialize;

/// Type tag of a dataspace table-of-contents entry.
///
/// Every slot the program can address is one of these. Arrays and clusters
/// are composite: an array's element type is declared by the entry right
/// after it, a cluster's descriptor counts the entries that make it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SlotType {
    Void = 0,
    UByte = 1,
    SByte = 2,
    UWord = 3,
    SWord = 4,
    ULong = 5,
    SLong = 6,
    Array = 7,
    Cluster = 8,
    Mutex = 9,
    Float = 10,
}

impl SlotType {
    /// Decode a raw type tag from the image.
    pub fn from_tag(tag: u8) -> Option<Self> {
        let ty = match tag {
            0 => SlotType::Void,
            1 => SlotType::UByte,
            2 => SlotType::SByte,
            3 => SlotType::UWord,
            4 => SlotType::SWord,
            5 => SlotType::ULong,
            6 => SlotType::SLong,
            7 => SlotType::Array,
            8 => SlotType::Cluster,
            9 => SlotType::Mutex,
            10 => SlotType::Float,
            _ => return None,
        };
        Some(ty)
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Size in bytes of the slot's own storage.
    ///
    /// For arrays this is the 16-bit dope vector index, not the elements.
    /// Void and cluster have no storage of their own.
    pub fn size(self) -> usize {
        match self {
            SlotType::UByte | SlotType::SByte => 1,
            SlotType::UWord | SlotType::SWord | SlotType::Array => 2,
            SlotType::ULong | SlotType::SLong | SlotType::Mutex | SlotType::Float => 4,
            SlotType::Void | SlotType::Cluster => 0,
        }
    }

    /// Whether the slot can be read as a single integer.
    pub fn is_scalar(self) -> bool {
        !matches!(self, SlotType::Void | SlotType::Cluster)
    }

    /// Whether the slot holds a plain value (no indirection, no composite).
    pub fn is_flat(self) -> bool {
        !matches!(self, SlotType::Void | SlotType::Cluster | SlotType::Array)
    }

    /// Short name, as printed by the analyzer.
    pub fn name(self) -> &'static str {
        match self {
            SlotType::Void => "void",
            SlotType::UByte => "ubyte",
            SlotType::SByte => "sbyte",
            SlotType::UWord => "uword",
            SlotType::SWord => "sword",
            SlotType::ULong => "ulong",
            SlotType::SLong => "slong",
            SlotType::Array => "array",
            SlotType::Cluster => "clust",
            SlotType::Mutex => "mutex",
            SlotType::Float => "float",
        }
    }

    /// Decode a little-endian value of this type, widened to `i32`.
    ///
    /// Returns `None` for void and cluster, or if `bytes` is too short.
    pub fn decode(self, bytes: &[u8]) -> Option<i32> {
        let value = match self {
            SlotType::UByte => i32::from(*bytes.first()?),
            SlotType::SByte => i32::from(*bytes.first()? as i8),
            SlotType::UWord | SlotType::Array => i32::from(u16::from_le_bytes(take(bytes)?)),
            SlotType::SWord => i32::from(i16::from_le_bytes(take(bytes)?)),
            SlotType::ULong | SlotType::Mutex => u32::from_le_bytes(take(bytes)?) as i32,
            SlotType::SLong => i32::from_le_bytes(take(bytes)?),
            SlotType::Float => f32::from_le_bytes(take(bytes)?) as i32,
            SlotType::Void | SlotType::Cluster => return None,
        };
        Some(value)
    }

    /// Encode `value` truncated to this type's width, little-endian.
    ///
    /// Returns `false` for void and cluster, or if `out` is too short.
    pub fn encode(self, value: i32, out: &mut [u8]) -> bool {
        match self {
            SlotType::UByte | SlotType::SByte => put(out, &[value as u8]),
            SlotType::UWord | SlotType::SWord | SlotType::Array => {
                put(out, &(value as u16).to_le_bytes())
            }
            SlotType::ULong | SlotType::SLong | SlotType::Mutex => {
                put(out, &(value as u32).to_le_bytes())
            }
            SlotType::Float => put(out, &(value as f32).to_le_bytes()),
            SlotType::Void | SlotType::Cluster => false,
        }
    }

    /// Truncate `value` the way a store followed by a load would.
    pub fn truncate(self, value: i32) -> i32 {
        match self {
            SlotType::UByte => i32::from(value as u8),
            SlotType::SByte => i32::from(value as i8),
            SlotType::UWord | SlotType::Array => i32::from(value as u16),
            SlotType::SWord => i32::from(value as i16),
            SlotType::ULong | SlotType::SLong | SlotType::Mutex => value,
            SlotType::Float => (value as f32) as i32,
            SlotType::Void | SlotType::Cluster => 0,
        }
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn take<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.get(..N)?.try_into().ok()
}

fn put(out: &mut [u8], bytes: &[u8]) -> bool {
    match out.get_mut(..bytes.len()) {
        Some(dst) => {
            dst.copy_from_slice(bytes);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_roundtrip() {
        for tag in 0..=10u8 {
            let ty = SlotType::from_tag(tag).unwrap();
            assert_eq!(ty.tag(), tag);
        }
        assert_eq!(SlotType::from_tag(11), None);
        assert_eq!(SlotType::from_tag(0xFF), None);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(SlotType::UByte.size(), 1);
        assert_eq!(SlotType::SWord.size(), 2);
        assert_eq!(SlotType::Array.size(), 2);
        assert_eq!(SlotType::Mutex.size(), 4);
        assert_eq!(SlotType::Float.size(), 4);
        assert_eq!(SlotType::Cluster.size(), 0);
        assert_eq!(SlotType::Void.size(), 0);
    }

    #[test]
    fn test_signed_and_unsigned_decode() {
        assert_eq!(SlotType::UByte.decode(&[0xFF]), Some(255));
        assert_eq!(SlotType::SByte.decode(&[0xFF]), Some(-1));
        assert_eq!(SlotType::UWord.decode(&[0xFE, 0xFF]), Some(65534));
        assert_eq!(SlotType::SWord.decode(&[0xFE, 0xFF]), Some(-2));
        assert_eq!(SlotType::ULong.decode(&[0xFF; 4]), Some(-1));
        assert_eq!(SlotType::SLong.decode(&[0x01, 0x00, 0x00, 0x80]), Some(i32::MIN + 1));
        assert_eq!(SlotType::Cluster.decode(&[0; 4]), None);
        assert_eq!(SlotType::SLong.decode(&[0; 2]), None);
    }

    #[test]
    fn test_float_is_converted_to_integer() {
        let mut buf = [0u8; 4];
        assert!(SlotType::Float.encode(-7, &mut buf));
        assert_eq!(f32::from_le_bytes(buf), -7.0);
        assert_eq!(SlotType::Float.decode(&2.75f32.to_le_bytes()), Some(2));
    }

    #[test]
    fn test_encode_truncates() {
        let mut buf = [0u8; 2];
        assert!(SlotType::UWord.encode(0x12345, &mut buf));
        assert_eq!(buf, [0x45, 0x23]);
        assert_eq!(SlotType::UWord.truncate(0x12345), 0x2345);
        assert_eq!(SlotType::SByte.truncate(200), -56);
        assert!(!SlotType::Void.encode(1, &mut buf));
        assert!(!SlotType::SLong.encode(1, &mut buf));
    }
}
