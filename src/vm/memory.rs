use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::image::{ImageError, ProgramImage, TocEntry};
use super::types::SlotType;

/// Size of one dope vector record in bytes.
pub const DOPE_VECTOR_SIZE: usize = 10;

// =============================================================================
// Errors
// =============================================================================

/// Runtime memory access fault. The program can continue after one.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum MemoryError {
    #[error("{what} {index} out of range (limit {limit})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        limit: usize,
    },
    #[error("entry {entry} of type {slot_type} cannot be used as {access}")]
    InvalidSlotType {
        entry: usize,
        slot_type: SlotType,
        access: &'static str,
    },
}

impl MemoryError {
    fn out_of_range(what: &'static str, index: usize, limit: usize) -> Self {
        MemoryError::OutOfRange { what, index, limit }
    }

    fn invalid_type(entry: usize, slot_type: SlotType, access: &'static str) -> Self {
        MemoryError::InvalidSlotType {
            entry,
            slot_type,
            access,
        }
    }
}

// =============================================================================
// Dope vectors
// =============================================================================

/// Descriptor of one dynamic array.
///
/// Only `element_size` and `element_count` are used at runtime. The other
/// fields are kept so the table can be written back unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DopeVector {
    pub offset: u16,
    pub element_size: u16,
    pub element_count: u16,
    pub back_pointer: u16,
    pub link_index: u16,
}

impl DopeVector {
    fn parse(bytes: &[u8]) -> Option<Self> {
        let field = |i: usize| -> Option<u16> {
            let b = bytes.get(i * 2..i * 2 + 2)?;
            Some(u16::from_le_bytes([b[0], b[1]]))
        };
        Some(Self {
            offset: field(0)?,
            element_size: field(1)?,
            element_count: field(2)?,
            back_pointer: field(3)?,
            link_index: field(4)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        for field in [
            self.offset,
            self.element_size,
            self.element_count,
            self.back_pointer,
            self.link_index,
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
    }

    fn byte_len(&self) -> usize {
        self.element_size as usize * self.element_count as usize
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Serializable view of every readable slot and every array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub scalars: Vec<ScalarValue>,
    pub arrays: Vec<ArrayValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalarValue {
    pub entry: usize,
    pub slot_type: SlotType,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayValue {
    pub entry: usize,
    pub dope_vector: usize,
    pub element_type: Option<SlotType>,
    /// Decoded elements. Empty when the element type is not flat.
    pub elements: Vec<i32>,
}

// =============================================================================
// Memory
// =============================================================================

/// Mutable program memory built from one image.
///
/// Scalar slots live in a flat buffer of `static size` bytes addressed by the
/// TOC descriptors. Every array slot holds the index of a dope vector, and each
/// dope vector owns a separately resizable byte buffer. Dope vector 0 describes
/// the table itself and has no buffer.
#[derive(Debug, Clone)]
pub struct Memory {
    image: Arc<ProgramImage>,
    statics: Vec<u8>,
    dope_vectors: Vec<DopeVector>,
    arrays: Vec<Vec<u8>>,
    /// TOC entries that name storage (not element declarations).
    slots: Vec<usize>,
}

impl Memory {
    pub fn new(image: Arc<ProgramImage>) -> Result<Self, ImageError> {
        let (statics, slots) = build_statics(&image)?;
        let (dope_vectors, arrays) = build_dope_vectors(&image)?;
        debug!(
            static_bytes = statics.len(),
            slots = slots.len(),
            arrays = dope_vectors.len().saturating_sub(1),
            "memory initialized"
        );
        Ok(Self {
            image,
            statics,
            dope_vectors,
            arrays,
            slots,
        })
    }

    pub fn image(&self) -> &Arc<ProgramImage> {
        &self.image
    }

    pub fn entry(&self, entry: usize) -> Result<&TocEntry, MemoryError> {
        let toc = self.image.toc();
        toc.get(entry)
            .ok_or_else(|| MemoryError::out_of_range("dataspace entry", entry, toc.len()))
    }

    pub fn slot_type(&self, entry: usize) -> Result<SlotType, MemoryError> {
        Ok(self.entry(entry)?.slot_type)
    }

    /// TOC entries that own storage, in table order.
    pub fn slots(&self) -> &[usize] {
        &self.slots
    }

    pub fn dope_vectors(&self) -> &[DopeVector] {
        &self.dope_vectors
    }

    // -------------------------------------------------------------------------
    // Scalars
    // -------------------------------------------------------------------------

    /// Read a slot as an integer. Arrays yield their dope vector index.
    pub fn scalar(&self, entry: usize) -> Result<i32, MemoryError> {
        let toc = *self.entry(entry)?;
        if !toc.slot_type.is_scalar() {
            return Err(MemoryError::invalid_type(entry, toc.slot_type, "scalar"));
        }
        let bytes = self.static_bytes(entry, &toc)?;
        toc.slot_type
            .decode(bytes)
            .ok_or_else(|| MemoryError::invalid_type(entry, toc.slot_type, "scalar"))
    }

    /// Store a value, truncated to the slot's width.
    pub fn set_scalar(&mut self, entry: usize, value: i32) -> Result<(), MemoryError> {
        let toc = *self.entry(entry)?;
        if !toc.slot_type.is_flat() {
            return Err(MemoryError::invalid_type(entry, toc.slot_type, "scalar target"));
        }
        let limit = self.statics.len();
        let start = toc.descriptor as usize;
        let bytes = self
            .statics
            .get_mut(start..)
            .ok_or_else(|| MemoryError::out_of_range("static offset", start, limit))?;
        if toc.slot_type.encode(value, bytes) {
            Ok(())
        } else {
            Err(MemoryError::out_of_range("static offset", start, limit))
        }
    }

    fn static_bytes(&self, entry: usize, toc: &TocEntry) -> Result<&[u8], MemoryError> {
        let start = toc.descriptor as usize;
        let end = start + toc.slot_type.size();
        self.statics.get(start..end).ok_or_else(|| {
            debug!(entry, start, end, "slot outside static data");
            MemoryError::out_of_range("static offset", start, self.statics.len())
        })
    }

    // -------------------------------------------------------------------------
    // Arrays
    // -------------------------------------------------------------------------

    /// Dope vector index stored in an array slot.
    pub fn dope_vector_index(&self, entry: usize) -> Result<usize, MemoryError> {
        let toc = *self.entry(entry)?;
        if toc.slot_type != SlotType::Array {
            return Err(MemoryError::invalid_type(entry, toc.slot_type, "array"));
        }
        let bytes = self.static_bytes(entry, &toc)?;
        let index = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        if index == 0 || index >= self.dope_vectors.len() {
            return Err(MemoryError::out_of_range(
                "dope vector",
                index,
                self.dope_vectors.len(),
            ));
        }
        Ok(index)
    }

    /// Element type of an array slot: the TOC entry right after it.
    pub fn element_type(&self, entry: usize) -> Result<SlotType, MemoryError> {
        let toc = *self.entry(entry)?;
        if toc.slot_type != SlotType::Array {
            return Err(MemoryError::invalid_type(entry, toc.slot_type, "array"));
        }
        let element = self.slot_type(entry + 1)?;
        // Nested arrays and clusters are not addressable element-wise.
        if !element.is_flat() {
            return Err(MemoryError::invalid_type(entry + 1, element, "array element"));
        }
        Ok(element)
    }

    pub fn array_len(&self, entry: usize) -> Result<usize, MemoryError> {
        let dv = self.dope_vector_index(entry)?;
        Ok(self.dope_vectors[dv].element_count as usize)
    }

    /// Resize an array. New elements are zero, shrinking truncates.
    pub fn set_array_len(&mut self, entry: usize, len: usize) -> Result<(), MemoryError> {
        let dv = self.dope_vector_index(entry)?;
        let count = u16::try_from(len)
            .map_err(|_| MemoryError::out_of_range("array length", len, u16::MAX as usize))?;
        let vector = &mut self.dope_vectors[dv];
        if vector.element_count == count {
            return Ok(());
        }
        vector.element_count = count;
        let byte_len = vector.byte_len();
        self.arrays[dv].resize(byte_len, 0);
        Ok(())
    }

    pub fn array_element(&self, entry: usize, index: usize) -> Result<i32, MemoryError> {
        let element = self.element_type(entry)?;
        let dv = self.dope_vector_index(entry)?;
        let range = self.element_range(dv, index, element)?;
        element
            .decode(&self.arrays[dv][range])
            .ok_or_else(|| MemoryError::invalid_type(entry + 1, element, "array element"))
    }

    pub fn set_array_element(
        &mut self,
        entry: usize,
        index: usize,
        value: i32,
    ) -> Result<(), MemoryError> {
        let element = self.element_type(entry)?;
        let dv = self.dope_vector_index(entry)?;
        let range = self.element_range(dv, index, element)?;
        element.encode(value, &mut self.arrays[dv][range]);
        Ok(())
    }

    fn element_range(
        &self,
        dv: usize,
        index: usize,
        element: SlotType,
    ) -> Result<std::ops::Range<usize>, MemoryError> {
        let vector = &self.dope_vectors[dv];
        let count = vector.element_count as usize;
        if index >= count {
            return Err(MemoryError::out_of_range("array index", index, count));
        }
        let start = index * vector.element_size as usize;
        let end = start + element.size();
        if end > self.arrays[dv].len() {
            return Err(MemoryError::out_of_range(
                "array byte offset",
                end,
                self.arrays[dv].len(),
            ));
        }
        Ok(start..end)
    }

    /// Raw backing bytes of an array.
    pub fn array_data(&self, entry: usize) -> Result<&[u8], MemoryError> {
        let dv = self.dope_vector_index(entry)?;
        Ok(&self.arrays[dv])
    }

    pub fn array_data_mut(&mut self, entry: usize) -> Result<&mut [u8], MemoryError> {
        let dv = self.dope_vector_index(entry)?;
        Ok(&mut self.arrays[dv])
    }

    /// Copy all elements of `src` into `dst`, resizing `dst` to match.
    pub fn copy_array(&mut self, dst: usize, src: usize) -> Result<(), MemoryError> {
        let len = self.array_len(src)?;
        let values = (0..len)
            .map(|i| self.array_element(src, i))
            .collect::<Result<Vec<_>, _>>()?;
        self.set_array_len(dst, len)?;
        for (i, v) in values.into_iter().enumerate() {
            self.set_array_element(dst, i, v)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Export
    // -------------------------------------------------------------------------

    /// The dope vector table in its on-disk layout.
    pub fn dope_vector_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.dope_vectors.len() * DOPE_VECTOR_SIZE);
        for (i, vector) in self.dope_vectors.iter().enumerate() {
            let mut vector = *vector;
            if i == 0 {
                vector.element_size = DOPE_VECTOR_SIZE as u16;
                vector.element_count = self.dope_vectors.len() as u16;
            }
            vector.write(&mut out);
        }
        out
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        let mut scalars = Vec::new();
        let mut arrays = Vec::new();
        for &entry in &self.slots {
            let slot_type = self.image.toc()[entry].slot_type;
            if slot_type == SlotType::Array {
                let Ok(dope_vector) = self.dope_vector_index(entry) else {
                    continue;
                };
                let element_type = self.slot_type(entry + 1).ok();
                let elements = match self.array_len(entry) {
                    Ok(len) => (0..len)
                        .map_while(|i| self.array_element(entry, i).ok())
                        .collect(),
                    Err(_) => Vec::new(),
                };
                arrays.push(ArrayValue {
                    entry,
                    dope_vector,
                    element_type,
                    elements,
                });
            } else if let Ok(value) = self.scalar(entry) {
                scalars.push(ScalarValue {
                    entry,
                    slot_type,
                    value,
                });
            }
        }
        MemorySnapshot { scalars, arrays }
    }
}

// =============================================================================
// Construction
// =============================================================================

/// Fill the static buffer from the default data, walking the TOC.
fn build_statics(image: &ProgramImage) -> Result<(Vec<u8>, Vec<usize>), ImageError> {
    let header = image.header();
    let toc = image.toc();
    let defaults = image.default_data();
    let mut statics = vec![0u8; header.static_size as usize];
    let mut slots = Vec::new();
    let mut cursor = 0usize;

    let mut i = 0usize;
    while i < toc.len() {
        let entry = toc[i];
        if matches!(entry.slot_type, SlotType::Void | SlotType::Cluster) {
            i += 1;
            continue;
        }

        let size = entry.slot_type.size();
        let start = entry.descriptor as usize;
        let target = statics.get_mut(start..start + size).ok_or_else(|| {
            ImageError::corrupt(
                "static data",
                format!("entry {i} at offset {start} exceeds static size"),
            )
        })?;
        if entry.has_zero_default() {
            target.fill(0);
        } else {
            let source = defaults.get(cursor..cursor + size).ok_or_else(|| {
                ImageError::corrupt(
                    "static data",
                    format!("default value of entry {i} past end of default data"),
                )
            })?;
            target.copy_from_slice(source);
            cursor += size;
        }
        slots.push(i);

        if entry.slot_type == SlotType::Array {
            // Element declarations describe the array contents, not storage.
            while toc.get(i + 1).map(|e| e.slot_type) == Some(SlotType::Array) {
                i += 1;
            }
            match toc.get(i + 1) {
                Some(next) if next.slot_type == SlotType::Cluster => {
                    i += 1 + next.descriptor as usize;
                }
                _ => i += 1,
            }
        }
        i += 1;
    }

    Ok((statics, slots))
}

/// Read the dope vector table and copy every array's initial contents.
fn build_dope_vectors(
    image: &ProgramImage,
) -> Result<(Vec<DopeVector>, Vec<Vec<u8>>), ImageError> {
    let header = image.header();
    let defaults = image.default_data();

    if header.dynamic_default_size == 0 {
        let table = DopeVector {
            offset: header.dope_vector_offset,
            element_size: DOPE_VECTOR_SIZE as u16,
            element_count: 1,
            ..DopeVector::default()
        };
        return Ok((vec![table], vec![Vec::new()]));
    }

    // Expanded addresses map into the default data shifted by this amount.
    let shift = header.static_size as isize - header.dynamic_default_offset as isize;
    let slice = |address: u16, len: usize, what: &str| mapped(defaults, shift, address, len, what);

    let table_address = header.dope_vector_offset;
    let first = slice(table_address, DOPE_VECTOR_SIZE, "dope vector table")
        .map(DopeVector::parse)?
        .ok_or_else(|| ImageError::corrupt("dope vectors", "short dope vector record"))?;
    let count = first.element_count as usize;
    if count == 0 {
        return Err(ImageError::corrupt("dope vectors", "empty dope vector table"));
    }

    let table = slice(table_address, count * DOPE_VECTOR_SIZE, "dope vector table")?;
    let mut dope_vectors = Vec::with_capacity(count);
    let mut arrays = Vec::with_capacity(count);
    for (i, record) in table.chunks_exact(DOPE_VECTOR_SIZE).enumerate() {
        let vector = DopeVector::parse(record)
            .ok_or_else(|| ImageError::corrupt("dope vectors", "short dope vector record"))?;
        let data = if i == 0 || vector.element_count == 0 {
            Vec::new()
        } else {
            slice(vector.offset, vector.byte_len(), "array data")?.to_vec()
        };
        dope_vectors.push(vector);
        arrays.push(data);
    }

    Ok((dope_vectors, arrays))
}

fn mapped<'a>(
    defaults: &'a [u8],
    shift: isize,
    address: u16,
    len: usize,
    what: &str,
) -> Result<&'a [u8], ImageError> {
    let start = address as isize - shift;
    usize::try_from(start)
        .ok()
        .and_then(|start| defaults.get(start..start + len))
        .ok_or_else(|| {
            ImageError::corrupt(
                "dope vectors",
                format!("{what} at address {address} outside default data"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::asm::ImageBuilder;
    use crate::vm::image::{DataspaceHeader, FLAG_ZERO_DEFAULT};

    fn memory(builder: ImageBuilder) -> Memory {
        Memory::new(Arc::new(builder.build())).unwrap()
    }

    #[test]
    fn test_scalar_defaults() {
        let mut b = ImageBuilder::new();
        let a = b.scalar(SlotType::SByte, -3);
        let w = b.scalar(SlotType::UWord, 60000);
        let l = b.scalar(SlotType::SLong, -100_000);
        let z = b.zeroed(SlotType::ULong);
        let mem = memory(b);

        assert_eq!(mem.scalar(a as usize).unwrap(), -3);
        assert_eq!(mem.scalar(w as usize).unwrap(), 60000);
        assert_eq!(mem.scalar(l as usize).unwrap(), -100_000);
        assert_eq!(mem.scalar(z as usize).unwrap(), 0);
    }

    #[test]
    fn test_set_scalar_truncates() {
        let mut b = ImageBuilder::new();
        let u = b.scalar(SlotType::UByte, 0);
        let s = b.scalar(SlotType::SWord, 0);
        let mut mem = memory(b);

        mem.set_scalar(u as usize, 300).unwrap();
        assert_eq!(mem.scalar(u as usize).unwrap(), 44);
        mem.set_scalar(s as usize, 40000).unwrap();
        assert_eq!(mem.scalar(s as usize).unwrap(), 40000 - 65536);
    }

    #[test]
    fn test_invalid_entries() {
        let mut b = ImageBuilder::new();
        let c = b.cluster(&[SlotType::UByte]);
        let arr = b.array(SlotType::UByte, &[1]);
        let mut mem = memory(b);

        assert!(matches!(
            mem.scalar(c as usize),
            Err(MemoryError::InvalidSlotType { .. })
        ));
        assert!(matches!(
            mem.scalar(1000),
            Err(MemoryError::OutOfRange { what: "dataspace entry", .. })
        ));
        assert!(matches!(
            mem.set_scalar(arr as usize, 1),
            Err(MemoryError::InvalidSlotType { .. })
        ));
        // Reading an array slot yields its dope vector index.
        assert_eq!(mem.scalar(arr as usize).unwrap(), 1);
        assert!(matches!(
            mem.array_len(c as usize + 1),
            Err(MemoryError::InvalidSlotType { .. })
        ));
    }

    #[test]
    fn test_array_access() {
        let mut b = ImageBuilder::new();
        let bytes = b.array(SlotType::UByte, &[10, 20, 30]);
        let longs = b.array(SlotType::SLong, &[-1, 70000]);
        let mut mem = memory(b);

        assert_eq!(mem.array_len(bytes as usize).unwrap(), 3);
        assert_eq!(mem.array_element(bytes as usize, 2).unwrap(), 30);
        assert_eq!(mem.array_element(longs as usize, 0).unwrap(), -1);
        assert_eq!(mem.array_element(longs as usize, 1).unwrap(), 70000);

        mem.set_array_element(bytes as usize, 0, 511).unwrap();
        assert_eq!(mem.array_element(bytes as usize, 0).unwrap(), 255);
        assert_eq!(mem.array_data(bytes as usize).unwrap(), &[255, 20, 30]);

        assert!(matches!(
            mem.array_element(bytes as usize, 3),
            Err(MemoryError::OutOfRange { what: "array index", .. })
        ));
    }

    #[test]
    fn test_resize_preserves_prefix() {
        let mut b = ImageBuilder::new();
        let arr = b.array(SlotType::UWord, &[1, 2, 3, 4]);
        let mut mem = memory(b);

        mem.set_array_len(arr as usize, 2).unwrap();
        assert_eq!(mem.array_len(arr as usize).unwrap(), 2);
        assert_eq!(mem.array_element(arr as usize, 1).unwrap(), 2);

        mem.set_array_len(arr as usize, 5).unwrap();
        assert_eq!(mem.array_len(arr as usize).unwrap(), 5);
        assert_eq!(mem.array_element(arr as usize, 0).unwrap(), 1);
        assert_eq!(mem.array_element(arr as usize, 1).unwrap(), 2);
        assert_eq!(mem.array_element(arr as usize, 4).unwrap(), 0);
        assert_eq!(mem.array_data(arr as usize).unwrap().len(), 10);

        assert!(matches!(
            mem.set_array_len(arr as usize, 70000),
            Err(MemoryError::OutOfRange { what: "array length", .. })
        ));
    }

    #[test]
    fn test_empty_array_default() {
        let mut b = ImageBuilder::new();
        let arr = b.array(SlotType::UByte, &[]);
        let mut mem = memory(b);

        assert_eq!(mem.array_len(arr as usize).unwrap(), 0);
        assert!(mem.array_data(arr as usize).unwrap().is_empty());
        mem.set_array_len(arr as usize, 2).unwrap();
        assert_eq!(mem.array_data(arr as usize).unwrap(), &[0, 0]);
    }

    #[test]
    fn test_array_of_clusters_rejects_element_access() {
        let mut b = ImageBuilder::new();
        let arr = b.array_of_clusters(&[SlotType::UByte, SlotType::UWord], 2);
        let after = b.scalar(SlotType::SLong, 99);
        let mem = memory(b);

        assert_eq!(mem.array_len(arr as usize).unwrap(), 2);
        assert!(matches!(
            mem.array_element(arr as usize, 0),
            Err(MemoryError::InvalidSlotType { access: "array element", .. })
        ));
        // The walk skipped the cluster declaration and kept the default cursor in step.
        assert_eq!(mem.scalar(after as usize).unwrap(), 99);
        assert!(!mem.slots().contains(&(arr as usize + 2)));
    }

    #[test]
    fn test_walk_skips_nested_arrays() {
        let mut b = ImageBuilder::new();
        let outer = b.nested_array(SlotType::UByte);
        let after = b.scalar(SlotType::UWord, 1234);
        let mem = memory(b);

        assert_eq!(mem.array_len(outer as usize).unwrap(), 0);
        assert_eq!(mem.scalar(after as usize).unwrap(), 1234);
        assert_eq!(mem.slots(), &[outer as usize, after as usize]);
    }

    #[test]
    fn test_cluster_members_are_slots() {
        let mut b = ImageBuilder::new();
        let c = b.cluster(&[SlotType::UByte, SlotType::SLong]);
        b.set_default(c + 2, -5);
        let mem = memory(b);

        assert_eq!(mem.scalar(c as usize + 1).unwrap(), 0);
        assert_eq!(mem.scalar(c as usize + 2).unwrap(), -5);
        assert_eq!(mem.slots(), &[c as usize + 1, c as usize + 2]);
    }

    #[test]
    fn test_dope_vector_bytes() {
        let mut b = ImageBuilder::new();
        b.array(SlotType::UByte, &[1, 2]);
        b.array(SlotType::UWord, &[3]);
        let mem = memory(b);

        let bytes = mem.dope_vector_bytes();
        assert_eq!(bytes.len(), 3 * DOPE_VECTOR_SIZE);
        // Entry 0: element size 10, count 3.
        assert_eq!(&bytes[2..6], &[10, 0, 3, 0]);
        // Entry 2: element size 2, count 1.
        assert_eq!(&bytes[22..26], &[2, 0, 1, 0]);
    }

    #[test]
    fn test_snapshot() {
        let mut b = ImageBuilder::new();
        let x = b.scalar(SlotType::SWord, -7);
        let arr = b.array(SlotType::UByte, &[4, 5]);
        let mem = memory(b);

        let snapshot = mem.snapshot();
        assert_eq!(
            snapshot.scalars,
            vec![ScalarValue {
                entry: x as usize,
                slot_type: SlotType::SWord,
                value: -7
            }]
        );
        assert_eq!(snapshot.arrays.len(), 1);
        assert_eq!(snapshot.arrays[0].entry, arr as usize);
        assert_eq!(snapshot.arrays[0].elements, vec![4, 5]);
    }

    #[test]
    fn test_static_slot_out_of_bounds_is_corrupt() {
        let toc = vec![TocEntry::new(SlotType::SLong, FLAG_ZERO_DEFAULT, 2)];
        let header = DataspaceHeader {
            static_size: 4,
            ..DataspaceHeader::default()
        };
        let image = ProgramImage::from_parts(header, toc, Vec::new(), Vec::new(), Vec::new());
        let result = Memory::new(Arc::new(image));
        assert!(matches!(
            result,
            Err(ImageError::Corrupt { section: "static data", .. })
        ));
    }

    #[test]
    fn test_dope_vector_table_out_of_bounds_is_corrupt() {
        let header = DataspaceHeader {
            static_size: 0,
            dynamic_default_offset: 0,
            dynamic_default_size: 10,
            dope_vector_offset: 8,
            ..DataspaceHeader::default()
        };
        let image =
            ProgramImage::from_parts(header, Vec::new(), vec![0u8; 10], Vec::new(), Vec::new());
        let result = Memory::new(Arc::new(image));
        assert!(matches!(
            result,
            Err(ImageError::Corrupt { section: "dope vectors", .. })
        ));
    }
}
