//! RXE image loading and serialization.
//!
//! Binary format (all multi-byte fields little-endian):
//! - Format string: "MindstormsNXT\0\0" + version byte (16 bytes)
//! - Dataspace header: 9 x u16
//! - Code header: clump count, code word count (2 x u16)
//! - Table of contents: 4-byte records (type, flags, descriptor)
//! - Default data: opaque bytes
//! - Padding to an even offset
//! - Clump records: 4-byte headers, then each clump's dependent list
//! - Code: u16 words

use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::types::SlotType;

/// Format string at the start of every image. The last byte is the version.
pub const FORMAT_STRING: &[u8; 16] = b"MindstormsNXT\0\0\x05";

/// Bytes of the format string that must match. The version byte is ignored.
const FORMAT_PREFIX_LEN: usize = 15;

/// TOC flag: the slot's initial value is zero and has no default data.
pub const FLAG_ZERO_DEFAULT: u8 = 0x01;

/// Operand value meaning "no dataspace entry".
pub const NOT_A_DS_ID: u16 = 0xFFFF;

/// Error type for image loading.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The image is malformed; `section` names where parsing failed.
    #[error("corrupt image ({section}): {reason}")]
    Corrupt {
        section: &'static str,
        reason: String,
    },
    /// The image file could not be read.
    #[error("failed to read image: {0}")]
    Io(#[from] io::Error),
}

impl ImageError {
    pub(crate) fn corrupt(section: &'static str, reason: impl Into<String>) -> Self {
        ImageError::Corrupt {
            section,
            reason: reason.into(),
        }
    }

    fn eof(section: &'static str) -> Self {
        Self::corrupt(section, "unexpected end of file")
    }
}

/// Sizing information for the program's memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataspaceHeader {
    pub entry_count: u16,
    pub initial_size: u16,
    /// Bytes taken by scalar slots (arrays only contribute their dope vector index).
    pub static_size: u16,
    pub default_data_size: u16,
    /// Offset of the array defaults within the default data.
    pub dynamic_default_offset: u16,
    pub dynamic_default_size: u16,
    pub memory_manager_head: u16,
    pub memory_manager_tail: u16,
    /// Offset of the dope vector table in expanded memory.
    pub dope_vector_offset: u16,
}

/// A dataspace table-of-contents entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    pub slot_type: SlotType,
    pub flags: u8,
    /// Byte offset of a scalar, byte offset of an array's dope vector index,
    /// or the member count of a cluster.
    pub descriptor: u16,
}

impl TocEntry {
    pub fn new(slot_type: SlotType, flags: u8, descriptor: u16) -> Self {
        Self {
            slot_type,
            flags,
            descriptor,
        }
    }

    pub fn has_zero_default(&self) -> bool {
        self.flags & FLAG_ZERO_DEFAULT != 0
    }
}

/// A schedulable unit of code (task or subroutine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clump {
    pub fire_count: u8,
    /// Clumps started when this one finishes.
    pub dependents: Vec<u8>,
    /// First code word of the clump.
    pub code_start: u16,
}

/// A parsed RXE image. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    version: u8,
    header: DataspaceHeader,
    toc: Vec<TocEntry>,
    default_data: Vec<u8>,
    clumps: Vec<Clump>,
    code: Vec<u16>,
}

impl ProgramImage {
    /// Assemble an image from its parts. Header counts for the TOC and default
    /// data are taken from the vectors.
    pub fn from_parts(
        mut header: DataspaceHeader,
        toc: Vec<TocEntry>,
        default_data: Vec<u8>,
        clumps: Vec<Clump>,
        code: Vec<u16>,
    ) -> Self {
        header.entry_count = toc.len() as u16;
        header.default_data_size = default_data.len() as u16;
        Self {
            version: FORMAT_STRING[15],
            header,
            toc,
            default_data,
            clumps,
            code,
        }
    }

    /// Load an image from a file.
    pub fn load(path: &Path) -> Result<Self, ImageError> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    /// Parse an image from bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ImageError> {
        let mut r = Cursor::new(data);

        // Format string
        let mut format = [0u8; 16];
        r.read_exact(&mut format)
            .map_err(|_| ImageError::eof("header"))?;
        if format[..FORMAT_PREFIX_LEN] != FORMAT_STRING[..FORMAT_PREFIX_LEN] {
            return Err(ImageError::corrupt("header", "missing format string"));
        }
        let version = format[15];

        // Dataspace header
        let section = "dataspace header";
        let header = DataspaceHeader {
            entry_count: read_u16(&mut r, section)?,
            initial_size: read_u16(&mut r, section)?,
            static_size: read_u16(&mut r, section)?,
            default_data_size: read_u16(&mut r, section)?,
            dynamic_default_offset: read_u16(&mut r, section)?,
            dynamic_default_size: read_u16(&mut r, section)?,
            memory_manager_head: read_u16(&mut r, section)?,
            memory_manager_tail: read_u16(&mut r, section)?,
            dope_vector_offset: read_u16(&mut r, section)?,
        };

        // Code header
        let clump_count = read_u16(&mut r, "code header")? as usize;
        let code_word_count = read_u16(&mut r, "code header")? as usize;

        // Table of contents
        let section = "table of contents";
        let mut toc = Vec::with_capacity(header.entry_count as usize);
        for index in 0..header.entry_count {
            let tag = read_u8(&mut r, section)?;
            let flags = read_u8(&mut r, section)?;
            let descriptor = read_u16(&mut r, section)?;
            let slot_type = SlotType::from_tag(tag).ok_or_else(|| {
                ImageError::corrupt(section, format!("entry {index} has unknown type {tag}"))
            })?;
            toc.push(TocEntry::new(slot_type, flags, descriptor));
        }

        // Default data, interpreted later by the memory
        let mut default_data = vec![0u8; header.default_data_size as usize];
        r.read_exact(&mut default_data)
            .map_err(|_| ImageError::eof("default data"))?;

        // Clump records are 2-byte aligned
        if r.position() % 2 != 0 {
            read_u8(&mut r, "clump records")?;
        }

        let mut headers = Vec::with_capacity(clump_count);
        for _ in 0..clump_count {
            let fire_count = read_u8(&mut r, "clump records")?;
            let dependent_count = read_u8(&mut r, "clump records")?;
            let code_start = read_u16(&mut r, "clump records")?;
            headers.push((fire_count, dependent_count, code_start));
        }

        let mut clumps = Vec::with_capacity(clump_count);
        for (fire_count, dependent_count, code_start) in headers {
            let mut dependents = vec![0u8; dependent_count as usize];
            r.read_exact(&mut dependents)
                .map_err(|_| ImageError::eof("clump dependents"))?;
            clumps.push(Clump {
                fire_count,
                dependents,
                code_start,
            });
        }

        // Code
        let mut code = Vec::with_capacity(code_word_count);
        for _ in 0..code_word_count {
            code.push(read_u16(&mut r, "code")?);
        }

        debug!(
            entries = toc.len(),
            clumps = clumps.len(),
            code_words = code.len(),
            version,
            "image parsed"
        );

        Ok(Self {
            version,
            header,
            toc,
            default_data,
            clumps,
            code,
        })
    }

    /// Write the image in the RXE format.
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_bytes())
    }

    /// Serialize the image back into the RXE format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Vec::new();

        w.extend_from_slice(&FORMAT_STRING[..15]);
        w.push(self.version);

        let h = &self.header;
        for field in [
            self.toc.len() as u16,
            h.initial_size,
            h.static_size,
            self.default_data.len() as u16,
            h.dynamic_default_offset,
            h.dynamic_default_size,
            h.memory_manager_head,
            h.memory_manager_tail,
            h.dope_vector_offset,
        ] {
            write_u16(&mut w, field);
        }
        write_u16(&mut w, self.clumps.len() as u16);
        write_u16(&mut w, self.code.len() as u16);

        for entry in &self.toc {
            w.extend_from_slice(&[entry.slot_type.tag(), entry.flags]);
            write_u16(&mut w, entry.descriptor);
        }

        w.extend_from_slice(&self.default_data);
        if w.len() % 2 != 0 {
            w.push(0);
        }

        for clump in &self.clumps {
            w.extend_from_slice(&[clump.fire_count, clump.dependents.len() as u8]);
            write_u16(&mut w, clump.code_start);
        }
        for clump in &self.clumps {
            w.extend_from_slice(&clump.dependents);
        }

        for word in &self.code {
            write_u16(&mut w, *word);
        }
        w
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn header(&self) -> &DataspaceHeader {
        &self.header
    }

    pub fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    pub fn toc_entry(&self, index: usize) -> Option<&TocEntry> {
        self.toc.get(index)
    }

    pub fn default_data(&self) -> &[u8] {
        &self.default_data
    }

    pub fn clumps(&self) -> &[Clump] {
        &self.clumps
    }

    pub fn clump(&self, id: usize) -> Option<&Clump> {
        self.clumps.get(id)
    }

    pub fn code(&self) -> &[u16] {
        &self.code
    }
}

// Helper functions for reading/writing primitives

fn read_u8(r: &mut Cursor<&[u8]>, section: &'static str) -> Result<u8, ImageError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)
        .map_err(|_| ImageError::eof(section))?;
    Ok(buf[0])
}

fn read_u16(r: &mut Cursor<&[u8]>, section: &'static str) -> Result<u16, ImageError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)
        .map_err(|_| ImageError::eof(section))?;
    Ok(u16::from_le_bytes(buf))
}

fn write_u16(w: &mut Vec<u8>, v: u16) {
    w.extend_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::asm::{CodeBuilder, ImageBuilder};

    fn sample_image() -> ProgramImage {
        let mut b = ImageBuilder::new();
        let x = b.scalar(SlotType::SLong, 7);
        let arr = b.array(SlotType::UByte, &[1, 2, 3]);
        let mut code = CodeBuilder::new();
        code.set(x, 3).arrsize(x, arr).stop();
        b.clump(&code, &[]);
        b.build()
    }

    #[test]
    fn test_roundtrip_bytes() {
        let image = sample_image();
        let bytes = image.to_bytes();
        let restored = ProgramImage::parse(&bytes).unwrap();
        assert_eq!(restored, image);
        assert_eq!(restored.to_bytes(), bytes);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample_image().to_bytes();
        bytes[0] = b'X';
        let result = ProgramImage::parse(&bytes);
        assert!(matches!(result, Err(ImageError::Corrupt { section: "header", .. })));
    }

    #[test]
    fn test_version_byte_is_ignored() {
        let mut bytes = sample_image().to_bytes();
        bytes[15] = 0x06;
        let image = ProgramImage::parse(&bytes).unwrap();
        assert_eq!(image.version(), 0x06);
    }

    #[test]
    fn test_truncation_names_section() {
        let bytes = sample_image().to_bytes();

        let result = ProgramImage::parse(&bytes[..10]);
        assert!(matches!(result, Err(ImageError::Corrupt { section: "header", .. })));

        let result = ProgramImage::parse(&bytes[..20]);
        assert!(matches!(
            result,
            Err(ImageError::Corrupt { section: "dataspace header", .. })
        ));

        let result = ProgramImage::parse(&bytes[..36]);
        assert!(matches!(
            result,
            Err(ImageError::Corrupt { section: "code header", .. })
        ));

        let result = ProgramImage::parse(&bytes[..40]);
        assert!(matches!(
            result,
            Err(ImageError::Corrupt { section: "table of contents", .. })
        ));

        let result = ProgramImage::parse(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(ImageError::Corrupt { section: "code", .. })));
    }

    #[test]
    fn test_unknown_type_tag() {
        let mut bytes = sample_image().to_bytes();
        // First TOC record starts right after the 38 header bytes.
        bytes[38] = 42;
        let result = ProgramImage::parse(&bytes);
        assert!(matches!(
            result,
            Err(ImageError::Corrupt { section: "table of contents", .. })
        ));
    }

    #[test]
    fn test_odd_default_data_is_padded() {
        let mut b = ImageBuilder::new();
        let x = b.scalar(SlotType::UByte, 9);
        let mut code = CodeBuilder::new();
        code.stop();
        b.clump(&code, &[]);
        let image = b.build();
        assert_eq!(image.default_data().len() % 2, 1);

        let bytes = image.to_bytes();
        let restored = ProgramImage::parse(&bytes).unwrap();
        assert_eq!(restored.code(), image.code());
        assert_eq!(restored.toc()[x as usize].slot_type, SlotType::UByte);
    }

    #[test]
    fn test_clump_dependents() {
        let mut b = ImageBuilder::new();
        let mut main = CodeBuilder::new();
        main.finclump();
        let mut other = CodeBuilder::new();
        other.stop();
        b.clump(&main, &[1]);
        b.clump_with_fire_count(&other, &[], 1);
        let image = ProgramImage::parse(&b.build().to_bytes()).unwrap();

        assert_eq!(image.clumps().len(), 2);
        assert_eq!(image.clumps()[0].dependents, vec![1]);
        assert_eq!(image.clumps()[1].fire_count, 1);
        assert_eq!(image.clumps()[1].code_start as usize, main.len());
    }

    #[test]
    fn test_dependents_truncated() {
        let mut b = ImageBuilder::new();
        let code = CodeBuilder::new();
        b.clump(&code, &[1, 2, 3]);
        let bytes = b.build().to_bytes();
        // No code words, so the dependents are the final three bytes.
        let result = ProgramImage::parse(&bytes[..bytes.len() - 2]);
        assert!(matches!(
            result,
            Err(ImageError::Corrupt { section: "clump dependents", .. })
        ));
    }
}
