//! Programmatic construction of RXE images.
//!
//! `ImageBuilder` lays out a dataspace (scalars, clusters, arrays with their
//! dope vectors and initial contents) and collects clumps; `CodeBuilder` emits
//! the long and short instruction encodings. The layout matches what the
//! loader and memory expect, so built images can be serialized, reparsed and
//! run.

use super::image::{
    Clump, DataspaceHeader, FLAG_ZERO_DEFAULT, NOT_A_DS_ID, ProgramImage, TocEntry,
};
use super::memory::DOPE_VECTOR_SIZE;
use super::ops::{CompareMode, Opcode};
use super::types::SlotType;

// =============================================================================
// ImageBuilder
// =============================================================================

#[derive(Debug, Clone)]
enum Decl {
    /// A slot with its own static storage.
    Scalar {
        slot_type: SlotType,
        zero: bool,
        value: i32,
    },
    /// An array slot. Its element declaration follows as a separate entry.
    Array {
        element_type: SlotType,
        element_size: u16,
        values: Vec<i32>,
        count: u16,
    },
    /// An entry without storage: cluster headers and element declarations.
    Declaration { slot_type: SlotType, descriptor: u16 },
}

/// Builds a [`ProgramImage`] from declarations.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    decls: Vec<Decl>,
    clumps: Vec<Clump>,
    code: Vec<u16>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, decl: Decl) -> u16 {
        self.decls.push(decl);
        (self.decls.len() - 1) as u16
    }

    /// Declare a scalar with an initial value. Returns its entry.
    pub fn scalar(&mut self, slot_type: SlotType, value: i32) -> u16 {
        self.push(Decl::Scalar {
            slot_type,
            zero: false,
            value,
        })
    }

    /// Declare a scalar using the zero-default flag.
    pub fn zeroed(&mut self, slot_type: SlotType) -> u16 {
        self.push(Decl::Scalar {
            slot_type,
            zero: true,
            value: 0,
        })
    }

    /// Declare an array of a flat element type with initial contents.
    pub fn array(&mut self, element_type: SlotType, values: &[i32]) -> u16 {
        let entry = self.push(Decl::Array {
            element_type,
            element_size: element_type.size() as u16,
            values: values.to_vec(),
            count: values.len() as u16,
        });
        self.push(Decl::Declaration {
            slot_type: element_type,
            descriptor: 0,
        });
        entry
    }

    /// Declare an empty array whose elements are arrays of `inner`.
    pub fn nested_array(&mut self, inner: SlotType) -> u16 {
        let entry = self.push(Decl::Array {
            element_type: SlotType::Array,
            element_size: SlotType::Array.size() as u16,
            values: Vec::new(),
            count: 0,
        });
        self.push(Decl::Declaration {
            slot_type: SlotType::Array,
            descriptor: 0,
        });
        self.push(Decl::Declaration {
            slot_type: inner,
            descriptor: 0,
        });
        entry
    }

    /// Declare an array of `count` zeroed clusters with the given member types.
    pub fn array_of_clusters(&mut self, members: &[SlotType], count: u16) -> u16 {
        let element_size: usize = members.iter().map(|t| t.size()).sum();
        let entry = self.push(Decl::Array {
            element_type: SlotType::Cluster,
            element_size: element_size as u16,
            values: Vec::new(),
            count,
        });
        self.push(Decl::Declaration {
            slot_type: SlotType::Cluster,
            descriptor: members.len() as u16,
        });
        for &member in members {
            self.push(Decl::Declaration {
                slot_type: member,
                descriptor: 0,
            });
        }
        entry
    }

    /// Declare a cluster whose members start right after the returned entry.
    ///
    /// Scalar members start at 0. Array members are empty byte arrays and
    /// take an extra entry for their element declaration.
    pub fn cluster(&mut self, members: &[SlotType]) -> u16 {
        let entry = self.push(Decl::Declaration {
            slot_type: SlotType::Cluster,
            descriptor: members.len() as u16,
        });
        for &member in members {
            if member == SlotType::Array {
                self.array(SlotType::UByte, &[]);
            } else {
                self.scalar(member, 0);
            }
        }
        entry
    }

    /// Change the initial value of a scalar entry.
    pub fn set_default(&mut self, entry: u16, new_value: i32) {
        if let Some(Decl::Scalar { zero, value, .. }) = self.decls.get_mut(entry as usize) {
            *zero = false;
            *value = new_value;
        }
    }

    /// Change the initial contents of an array entry.
    pub fn set_array_default<T: Copy + Into<i32>>(&mut self, entry: u16, new_values: &[T]) {
        if let Some(Decl::Array { values, count, .. }) = self.decls.get_mut(entry as usize) {
            *values = new_values.iter().map(|&v| v.into()).collect();
            *count = new_values.len() as u16;
        }
    }

    /// Add a clump running `code`. Returns the clump id.
    pub fn clump(&mut self, code: &CodeBuilder, dependents: &[u8]) -> u8 {
        self.clump_with_fire_count(code, dependents, 0)
    }

    pub fn clump_with_fire_count(
        &mut self,
        code: &CodeBuilder,
        dependents: &[u8],
        fire_count: u8,
    ) -> u8 {
        self.clumps.push(Clump {
            fire_count,
            dependents: dependents.to_vec(),
            code_start: self.code.len() as u16,
        });
        self.code.extend_from_slice(code.words());
        (self.clumps.len() - 1) as u8
    }

    pub fn build(&self) -> ProgramImage {
        let mut toc = Vec::with_capacity(self.decls.len());
        let mut statics = Vec::new();
        let mut static_size = 0u16;
        let mut arrays = Vec::new();

        for decl in &self.decls {
            match decl {
                Decl::Scalar {
                    slot_type,
                    zero,
                    value,
                } => {
                    let flags = if *zero { FLAG_ZERO_DEFAULT } else { 0 };
                    toc.push(TocEntry::new(*slot_type, flags, static_size));
                    if !zero {
                        statics.extend_from_slice(&encode(*slot_type, *value));
                    }
                    static_size += slot_type.size() as u16;
                }
                Decl::Array { .. } => {
                    arrays.push(decl);
                    let index = arrays.len() as i32;
                    toc.push(TocEntry::new(SlotType::Array, 0, static_size));
                    statics.extend_from_slice(&encode(SlotType::Array, index));
                    static_size += SlotType::Array.size() as u16;
                }
                Decl::Declaration {
                    slot_type,
                    descriptor,
                } => toc.push(TocEntry::new(*slot_type, 0, *descriptor)),
            }
        }

        // The dope vector table sits at the start of the dynamic region, the
        // array contents after it.
        let table_len = (arrays.len() + 1) * DOPE_VECTOR_SIZE;
        let mut table = Vec::with_capacity(table_len);
        let mut contents = Vec::new();
        let mut address = static_size as usize + table_len;
        let last = arrays.len();

        write_dope_vector(
            &mut table,
            [
                static_size,
                DOPE_VECTOR_SIZE as u16,
                (arrays.len() + 1) as u16,
                0,
                if last == 0 { NOT_A_DS_ID } else { 1 },
            ],
        );
        for (i, decl) in arrays.iter().enumerate() {
            let Decl::Array {
                element_type,
                element_size,
                values,
                count,
            } = decl
            else {
                continue;
            };
            let start = contents.len();
            if element_type.is_flat() {
                for v in values {
                    contents.extend_from_slice(&encode(*element_type, *v));
                }
            }
            contents.resize(start + *element_size as usize * *count as usize, 0);
            let link = if i + 1 == last { NOT_A_DS_ID } else { (i + 2) as u16 };
            write_dope_vector(
                &mut table,
                [address as u16, *element_size, *count, 0, link],
            );
            address += contents.len() - start;
        }

        let dynamic_default_offset = statics.len() as u16;
        let dynamic_default_size = (table.len() + contents.len()) as u16;
        let mut default_data = statics;
        default_data.extend_from_slice(&table);
        default_data.extend_from_slice(&contents);

        let header = DataspaceHeader {
            entry_count: 0,
            initial_size: static_size + dynamic_default_size,
            static_size,
            default_data_size: 0,
            dynamic_default_offset,
            dynamic_default_size,
            memory_manager_head: if last == 0 { NOT_A_DS_ID } else { 1 },
            memory_manager_tail: if last == 0 { NOT_A_DS_ID } else { last as u16 },
            dope_vector_offset: static_size,
        };

        ProgramImage::from_parts(
            header,
            toc,
            default_data,
            self.clumps.clone(),
            self.code.clone(),
        )
    }
}

fn encode(slot_type: SlotType, value: i32) -> Vec<u8> {
    let mut buf = vec![0u8; slot_type.size()];
    slot_type.encode(value, &mut buf);
    buf
}

fn write_dope_vector(out: &mut Vec<u8>, fields: [u16; 5]) {
    for field in fields {
        out.extend_from_slice(&field.to_le_bytes());
    }
}

// =============================================================================
// CodeBuilder
// =============================================================================

/// Emits instruction words.
///
/// Branch offsets are relative to the first word of the branch instruction;
/// use [`CodeBuilder::len`] before and after emitting to compute them.
#[derive(Debug, Clone, Default)]
pub struct CodeBuilder {
    words: Vec<u16>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Current length in words (the position of the next instruction).
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Emit a long-form instruction.
    pub fn op(&mut self, opcode: Opcode, flags: u8, operands: &[u16]) -> &mut Self {
        let size = ((operands.len() + 1) * 2) as u16;
        self.words
            .push((size << 12) | (u16::from(flags & 0xF) << 8) | u16::from(opcode.byte()));
        self.words.extend_from_slice(operands);
        self
    }

    /// Emit a long-form instruction whose size is in its first operand.
    pub fn op_sized(&mut self, opcode: Opcode, operands: &[u16]) -> &mut Self {
        let size = ((operands.len() + 2) * 2) as u16;
        self.words.push(0xE000 | u16::from(opcode.byte()));
        self.words.push(size);
        self.words.extend_from_slice(operands);
        self
    }

    /// Emit a short-form instruction. `next` is required for MOV and SUBCALL.
    pub fn short(&mut self, opcode: Opcode, diff: i8, next: Option<u16>) -> &mut Self {
        let code = u16::from(opcode.short_code().unwrap_or(7));
        self.words.push(0x0800 | (code << 8) | u16::from(diff as u8));
        if let Some(next) = next {
            self.words.push(next);
        }
        self
    }

    /// Append raw words.
    pub fn raw(&mut self, words: &[u16]) -> &mut Self {
        self.words.extend_from_slice(words);
        self
    }

    // ---------------------------------------------------------------------
    // Math and logic
    // ---------------------------------------------------------------------

    pub fn add(&mut self, dst: u16, a: u16, b: u16) -> &mut Self {
        self.op(Opcode::Add, 0, &[dst, a, b])
    }

    pub fn sub(&mut self, dst: u16, a: u16, b: u16) -> &mut Self {
        self.op(Opcode::Sub, 0, &[dst, a, b])
    }

    pub fn mul(&mut self, dst: u16, a: u16, b: u16) -> &mut Self {
        self.op(Opcode::Mul, 0, &[dst, a, b])
    }

    pub fn div(&mut self, dst: u16, a: u16, b: u16) -> &mut Self {
        self.op(Opcode::Div, 0, &[dst, a, b])
    }

    pub fn modulo(&mut self, dst: u16, a: u16, b: u16) -> &mut Self {
        self.op(Opcode::Mod, 0, &[dst, a, b])
    }

    pub fn and(&mut self, dst: u16, a: u16, b: u16) -> &mut Self {
        self.op(Opcode::And, 0, &[dst, a, b])
    }

    pub fn or(&mut self, dst: u16, a: u16, b: u16) -> &mut Self {
        self.op(Opcode::Or, 0, &[dst, a, b])
    }

    pub fn xor(&mut self, dst: u16, a: u16, b: u16) -> &mut Self {
        self.op(Opcode::Xor, 0, &[dst, a, b])
    }

    pub fn neg(&mut self, dst: u16, src: u16) -> &mut Self {
        self.op(Opcode::Neg, 0, &[dst, src])
    }

    pub fn not(&mut self, dst: u16, src: u16) -> &mut Self {
        self.op(Opcode::Not, 0, &[dst, src])
    }

    pub fn abs(&mut self, dst: u16, src: u16) -> &mut Self {
        self.op(Opcode::Abs, 0, &[dst, src])
    }

    pub fn sqrt(&mut self, dst: u16, src: u16) -> &mut Self {
        self.op(Opcode::Sqrt, 0, &[dst, src])
    }

    pub fn cmp(&mut self, mode: CompareMode, dst: u16, a: u16, b: u16) -> &mut Self {
        self.op(Opcode::Cmp, mode.flags(), &[dst, a, b])
    }

    pub fn tst(&mut self, mode: CompareMode, dst: u16, a: u16) -> &mut Self {
        self.op(Opcode::Tst, mode.flags(), &[dst, a])
    }

    // ---------------------------------------------------------------------
    // Data
    // ---------------------------------------------------------------------

    pub fn set(&mut self, dst: u16, immediate: u16) -> &mut Self {
        self.op(Opcode::Set, 0, &[dst, immediate])
    }

    pub fn mov(&mut self, dst: u16, src: u16) -> &mut Self {
        self.op(Opcode::Mov, 0, &[dst, src])
    }

    /// Short-form MOV. The entries must be within a signed byte of each other.
    pub fn mov_short(&mut self, dst: u16, src: u16) -> &mut Self {
        let diff = dst.wrapping_sub(src) as i16 as i8;
        self.short(Opcode::Mov, diff, Some(src))
    }

    pub fn index(&mut self, dst: u16, array: u16, index: u16) -> &mut Self {
        self.op(Opcode::Index, 0, &[dst, array, index])
    }

    pub fn replace(&mut self, dst: u16, src: u16, index: u16, new: u16) -> &mut Self {
        self.op(Opcode::Replace, 0, &[dst, src, index, new])
    }

    pub fn arrsize(&mut self, dst: u16, array: u16) -> &mut Self {
        self.op(Opcode::ArrSize, 0, &[dst, array])
    }

    pub fn arrbuild(&mut self, dst: u16, sources: &[u16]) -> &mut Self {
        let mut operands = Vec::with_capacity(sources.len() + 1);
        operands.push(dst);
        operands.extend_from_slice(sources);
        self.op_sized(Opcode::ArrBuild, &operands)
    }

    pub fn arrsubset(&mut self, dst: u16, src: u16, index: u16, length: u16) -> &mut Self {
        self.op(Opcode::ArrSubset, 0, &[dst, src, index, length])
    }

    pub fn arrinit(&mut self, dst: u16, value: u16, count: u16) -> &mut Self {
        self.op(Opcode::ArrInit, 0, &[dst, value, count])
    }

    // ---------------------------------------------------------------------
    // Control flow
    // ---------------------------------------------------------------------

    pub fn jmp(&mut self, offset: i16) -> &mut Self {
        self.op(Opcode::Jmp, 0, &[offset as u16])
    }

    pub fn brcmp(&mut self, mode: CompareMode, offset: i16, a: u16, b: u16) -> &mut Self {
        self.op(Opcode::BrCmp, mode.flags(), &[offset as u16, a, b])
    }

    pub fn brtst(&mut self, mode: CompareMode, offset: i16, a: u16) -> &mut Self {
        self.op(Opcode::BrTst, mode.flags(), &[offset as u16, a])
    }

    pub fn stop(&mut self) -> &mut Self {
        self.op(Opcode::Stop, 0, &[NOT_A_DS_ID])
    }

    pub fn finclump(&mut self) -> &mut Self {
        self.op(Opcode::FinClump, 0, &[NOT_A_DS_ID, NOT_A_DS_ID])
    }

    pub fn finclumpimmed(&mut self, clump: u16) -> &mut Self {
        self.op(Opcode::FinClumpImmed, 0, &[clump])
    }

    pub fn acquire(&mut self, mutex: u16) -> &mut Self {
        self.op(Opcode::Acquire, 0, &[mutex])
    }

    pub fn release(&mut self, mutex: u16) -> &mut Self {
        self.op(Opcode::Release, 0, &[mutex])
    }

    pub fn subcall(&mut self, clump: u16, caller: u16) -> &mut Self {
        self.op(Opcode::SubCall, 0, &[clump, caller])
    }

    pub fn subret(&mut self, caller: u16) -> &mut Self {
        self.op(Opcode::SubRet, 0, &[caller])
    }

    // ---------------------------------------------------------------------
    // System
    // ---------------------------------------------------------------------

    pub fn syscall(&mut self, id: u16, cluster: u16) -> &mut Self {
        self.op(Opcode::Syscall, 0, &[id, cluster])
    }

    pub fn setin(&mut self, src: u16, port: u16, property: u16) -> &mut Self {
        self.op(Opcode::SetIn, 0, &[src, port, property])
    }

    pub fn setout(&mut self, port: u16, properties: &[(u16, u16)]) -> &mut Self {
        let mut operands = Vec::with_capacity(properties.len() * 2 + 1);
        operands.push(port);
        for &(property, src) in properties {
            operands.push(property);
            operands.push(src);
        }
        self.op_sized(Opcode::SetOut, &operands)
    }

    pub fn getin(&mut self, dst: u16, port: u16, property: u16) -> &mut Self {
        self.op(Opcode::GetIn, 0, &[dst, port, property])
    }

    pub fn getout(&mut self, dst: u16, port: u16, property: u16) -> &mut Self {
        self.op(Opcode::GetOut, 0, &[dst, port, property])
    }

    pub fn wait(&mut self, duration: u16) -> &mut Self {
        self.op(Opcode::Wait, 0, &[NOT_A_DS_ID, duration])
    }

    pub fn gettick(&mut self, dst: u16) -> &mut Self {
        self.op(Opcode::GetTick, 0, &[dst])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::decode::decode;

    #[test]
    fn test_long_encoding() {
        let mut code = CodeBuilder::new();
        code.add(2, 0, 1);
        assert_eq!(code.words(), &[0x8000, 2, 0, 1]);

        let mut code = CodeBuilder::new();
        code.cmp(CompareMode::NotEqual, 1, 2, 3);
        assert_eq!(code.words()[0], 0x8511);
    }

    #[test]
    fn test_sized_encoding_decodes() {
        let mut code = CodeBuilder::new();
        code.arrbuild(9, &[1, 2, 3]).stop();
        let inst = decode(code.words(), 0).unwrap();
        assert_eq!(inst.opcode, Opcode::ArrBuild);
        assert_eq!(inst.length, 6);
        assert_eq!(inst.operands(), &[12, 9, 1, 2, 3]);

        let next = decode(code.words(), inst.length).unwrap();
        assert_eq!(next.opcode, Opcode::Stop);
    }

    #[test]
    fn test_short_mov_encoding() {
        let mut code = CodeBuilder::new();
        code.mov_short(3, 5);
        assert_eq!(code.words(), &[0x08FE, 5]);
        let inst = decode(code.words(), 0).unwrap();
        assert_eq!(inst.operands(), &[3, 5]);
    }

    #[test]
    fn test_builder_layout() {
        let mut b = ImageBuilder::new();
        let x = b.scalar(SlotType::UWord, 7);
        let z = b.zeroed(SlotType::SLong);
        let arr = b.array(SlotType::UByte, &[1, 2, 3]);
        let image = b.build();

        let toc = image.toc();
        assert_eq!(toc.len(), 4);
        assert_eq!(toc[x as usize].descriptor, 0);
        assert_eq!(toc[z as usize].descriptor, 2);
        assert!(toc[z as usize].has_zero_default());
        assert_eq!(toc[arr as usize].descriptor, 6);
        assert_eq!(toc[arr as usize + 1].slot_type, SlotType::UByte);

        let header = image.header();
        assert_eq!(header.static_size, 8);
        assert_eq!(header.dynamic_default_offset, 4);
        assert_eq!(header.dope_vector_offset, 8);
        // Two dope vectors and three bytes of array data.
        assert_eq!(header.dynamic_default_size, 23);
        assert_eq!(image.default_data().len(), 27);
    }

    #[test]
    fn test_clump_code_starts() {
        let mut b = ImageBuilder::new();
        let mut first = CodeBuilder::new();
        first.set(0, 1).finclump();
        let mut second = CodeBuilder::new();
        second.stop();
        assert_eq!(b.clump(&first, &[1]), 0);
        assert_eq!(b.clump(&second, &[]), 1);
        let image = b.build();

        assert_eq!(image.clumps()[0].code_start, 0);
        assert_eq!(image.clumps()[1].code_start, 6);
        assert_eq!(image.code().len(), 8);
    }
}
