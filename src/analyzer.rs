//! Static report on a program image: header, dataspace, clumps and a
//! disassembly of the code.

use std::fmt::{self, Write as _};

use serde::Serialize;

use crate::vm::{
    Clump, CompareMode, DataspaceHeader, DopeVector, Memory, NOT_A_DS_ID, Opcode, ProgramImage,
    SlotType, decode,
};

// ============================================================================
// Disassembler
// ============================================================================

/// One operand word, classified by how the opcode uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    /// A dataspace entry.
    Entry(u16),
    /// The "no entry" sentinel.
    NotADsId,
    /// A literal: immediate value, syscall id, port property, clump id, size.
    Immediate(u16),
    /// Branch offset relative to the instruction's first word.
    Offset(i16),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Entry(entry) => write!(f, "r{entry}"),
            Operand::NotADsId => write!(f, "NOT_A_DS_ID"),
            Operand::Immediate(value) => write!(f, "#{value}"),
            Operand::Offset(offset) => write!(f, "{offset:+}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisassembledInstruction {
    pub pc: usize,
    /// Code words of the instruction, opcode word first.
    pub words: Vec<u16>,
    /// Mnemonic, or `None` when the words do not decode.
    pub opcode: Option<&'static str>,
    pub short: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
    pub operands: Vec<Operand>,
    /// Absolute target of a branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl fmt::Display for DisassembledInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}: ", self.pc)?;
        let Some(opcode) = self.opcode else {
            return write!(
                f,
                ".word {:#06x} ; {}",
                self.words.first().copied().unwrap_or(0),
                self.error.as_deref().unwrap_or("invalid")
            );
        };
        write!(f, "{opcode}")?;
        if let Some(mode) = self.mode {
            write!(f, " {mode}")?;
        }
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{operand}")?;
        }
        if let Some(target) = self.target {
            write!(f, " ; -> {target:04}")?;
        }
        if self.short {
            write!(f, " ; short")?;
        }
        Ok(())
    }
}

/// Decode the whole code space. Undecodable words become one-word entries
/// carrying the decode error.
pub fn disassemble(image: &ProgramImage) -> Vec<DisassembledInstruction> {
    let code = image.code();
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        match decode(code, pc) {
            Ok(inst) => {
                let operands = classify(inst.opcode, inst.operands());
                let target = match inst.opcode {
                    Opcode::Jmp | Opcode::BrCmp | Opcode::BrTst => {
                        Some(pc as i64 + i64::from(inst.operand(0) as i16))
                    }
                    _ => None,
                };
                let mode = if inst.opcode.uses_compare_mode() {
                    Some(CompareMode::from_flags(inst.flags).map_or("?", CompareMode::symbol))
                } else {
                    None
                };
                out.push(DisassembledInstruction {
                    pc,
                    words: code[pc..pc + inst.length].to_vec(),
                    opcode: Some(inst.opcode.name()),
                    short: inst.is_short(),
                    mode,
                    operands,
                    target,
                    error: None,
                });
                pc += inst.length;
            }
            Err(e) => {
                out.push(DisassembledInstruction {
                    pc,
                    words: vec![code[pc]],
                    opcode: None,
                    short: false,
                    mode: None,
                    operands: Vec::new(),
                    target: None,
                    error: Some(e.to_string()),
                });
                pc += 1;
            }
        }
    }
    out
}

fn classify(opcode: Opcode, words: &[u16]) -> Vec<Operand> {
    words
        .iter()
        .enumerate()
        .map(|(i, &word)| {
            if is_immediate(opcode, i) {
                if matches!(opcode, Opcode::Jmp | Opcode::BrCmp | Opcode::BrTst) {
                    Operand::Offset(word as i16)
                } else {
                    Operand::Immediate(word)
                }
            } else if word == NOT_A_DS_ID {
                Operand::NotADsId
            } else {
                Operand::Entry(word)
            }
        })
        .collect()
}

/// Whether operand `i` of `opcode` is a literal rather than an entry.
fn is_immediate(opcode: Opcode, i: usize) -> bool {
    match opcode {
        Opcode::Set => i == 1,
        Opcode::Jmp | Opcode::BrCmp | Opcode::BrTst => i == 0,
        Opcode::Syscall | Opcode::SubCall | Opcode::FinClumpImmed | Opcode::ArrBuild => i == 0,
        Opcode::FinClump => true,
        Opcode::SetIn | Opcode::GetIn | Opcode::GetOut => i == 2,
        // size, port, then (property, source) pairs
        Opcode::SetOut => i == 0 || (i >= 2 && i % 2 == 0),
        _ => false,
    }
}

// ============================================================================
// Image report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryReport {
    pub index: usize,
    pub slot_type: SlotType,
    pub flags: u8,
    pub descriptor: u16,
    /// Initial value of a scalar slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i32>,
    /// Initial elements of an array slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<i32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClumpReport {
    pub id: usize,
    #[serde(flatten)]
    pub clump: Clump,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
    pub version: u8,
    pub header: DataspaceHeader,
    pub entries: Vec<EntryReport>,
    pub dope_vectors: Vec<DopeVector>,
    pub clumps: Vec<ClumpReport>,
    pub code_words: usize,
    pub instructions: Vec<DisassembledInstruction>,
}

impl ImageReport {
    /// `memory` should be freshly built from `image` so values are the initial ones.
    pub fn build(image: &ProgramImage, memory: &Memory) -> Self {
        let entries = image
            .toc()
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let value = if entry.slot_type.is_flat() {
                    memory.scalar(index).ok()
                } else {
                    None
                };
                let elements = if entry.slot_type == SlotType::Array {
                    memory.array_len(index).ok().map(|len| {
                        (0..len)
                            .filter_map(|i| memory.array_element(index, i).ok())
                            .collect()
                    })
                } else {
                    None
                };
                EntryReport {
                    index,
                    slot_type: entry.slot_type,
                    flags: entry.flags,
                    descriptor: entry.descriptor,
                    value,
                    elements,
                }
            })
            .collect();

        let clumps = image
            .clumps()
            .iter()
            .enumerate()
            .map(|(id, clump)| ClumpReport {
                id,
                clump: clump.clone(),
            })
            .collect();

        Self {
            version: image.version(),
            header: *image.header(),
            entries,
            dope_vectors: memory.dope_vectors().to_vec(),
            clumps,
            code_words: image.code().len(),
            instructions: disassemble(image),
        }
    }

    pub fn render_human(&self) -> String {
        let mut out = String::new();
        let h = &self.header;

        let _ = writeln!(out, "== Header ==");
        let _ = writeln!(out, "  version: {}", self.version);
        let _ = writeln!(out, "  entries: {}", h.entry_count);
        let _ = writeln!(out, "  initial size: {}", h.initial_size);
        let _ = writeln!(out, "  static size: {}", h.static_size);
        let _ = writeln!(out, "  default data size: {}", h.default_data_size);
        let _ = writeln!(
            out,
            "  dynamic defaults: offset {} size {}",
            h.dynamic_default_offset, h.dynamic_default_size
        );
        let _ = writeln!(
            out,
            "  memory manager: head {} tail {}",
            h.memory_manager_head, h.memory_manager_tail
        );
        let _ = writeln!(out, "  dope vector offset: {}", h.dope_vector_offset);
        let _ = writeln!(out, "  code words: {}", self.code_words);
        out.push('\n');

        let _ = writeln!(out, "== Dataspace ==");
        for entry in &self.entries {
            let _ = write!(
                out,
                "  [{:04}] {:<7} flags {:#04x} desc {:5}",
                entry.index,
                entry.slot_type.name(),
                entry.flags,
                entry.descriptor
            );
            if let Some(value) = entry.value {
                let _ = write!(out, " = {value}");
            }
            if let Some(elements) = &entry.elements {
                let _ = write!(out, " = {elements:?}");
            }
            out.push('\n');
        }
        out.push('\n');

        let _ = writeln!(out, "== Dope Vectors ==");
        for (i, dv) in self.dope_vectors.iter().enumerate() {
            let _ = writeln!(
                out,
                "  [{:04}] offset {} element size {} count {} back {} link {}",
                i, dv.offset, dv.element_size, dv.element_count, dv.back_pointer, dv.link_index
            );
        }
        out.push('\n');

        let _ = writeln!(out, "== Clumps ==");
        for report in &self.clumps {
            let _ = writeln!(
                out,
                "  clump {}: start {:04} fire count {} dependents {:?}",
                report.id,
                report.clump.code_start,
                report.clump.fire_count,
                report.clump.dependents
            );
        }
        out.push('\n');

        let _ = writeln!(out, "== Code ==");
        for inst in &self.instructions {
            let _ = writeln!(out, "{inst}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::vm::asm::{CodeBuilder, ImageBuilder};

    #[test]
    fn test_disassemble_classifies_operands() {
        let mut b = ImageBuilder::new();
        let x = b.zeroed(SlotType::SLong);
        let arr = b.array(SlotType::UByte, &[1, 2]);
        let mut code = CodeBuilder::new();
        code.set(x, 7)
            .index(x, arr, NOT_A_DS_ID)
            .brtst(CompareMode::Equal, -5, x)
            .syscall(0x0A, x)
            .mov_short(x, x)
            .stop();
        b.clump(&code, &[]);
        let listing = disassemble(&b.build());

        assert_eq!(listing.len(), 6);
        assert_eq!(listing[0].opcode, Some("SET"));
        assert_eq!(
            listing[0].operands,
            vec![Operand::Entry(x), Operand::Immediate(7)]
        );
        assert_eq!(listing[1].operands[2], Operand::NotADsId);
        assert_eq!(listing[2].pc, 7);
        assert_eq!(listing[2].mode, Some("=="));
        assert_eq!(listing[2].operands[0], Operand::Offset(-5));
        assert_eq!(listing[2].target, Some(2));
        assert_eq!(listing[3].operands[0], Operand::Immediate(0x0A));
        assert!(listing[4].short);
        assert_eq!(listing[2].to_string(), format!("0007: BRTST == -5, r{x} ; -> 0002"));
    }

    #[test]
    fn test_disassemble_recovers_from_bad_words() {
        let mut b = ImageBuilder::new();
        let mut code = CodeBuilder::new();
        code.raw(&[0x200A]).stop();
        b.clump(&code, &[]);
        let listing = disassemble(&b.build());

        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].opcode, None);
        assert!(listing[0].error.is_some());
        assert!(listing[0].to_string().starts_with("0000: .word 0x200a"));
        assert_eq!(listing[1].opcode, Some("STOP"));
    }

    #[test]
    fn test_report_includes_initial_values() {
        let mut b = ImageBuilder::new();
        let x = b.scalar(SlotType::SWord, -3);
        let arr = b.array(SlotType::UWord, &[10, 20]);
        let mut code = CodeBuilder::new();
        code.stop();
        b.clump(&code, &[]);
        let image = Arc::new(b.build());
        let memory = Memory::new(Arc::clone(&image)).unwrap();
        let report = ImageReport::build(&image, &memory);

        assert_eq!(report.entries[x as usize].value, Some(-3));
        assert_eq!(report.entries[arr as usize].elements, Some(vec![10, 20]));
        assert_eq!(report.clumps.len(), 1);
        assert_eq!(report.code_words, 2);

        let text = report.render_human();
        assert!(text.contains("== Dataspace =="));
        assert!(text.contains("= -3"));
        assert!(text.contains("0000: STOP NOT_A_DS_ID"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["instructions"][0]["opcode"], "STOP");
        assert_eq!(json["entries"][x as usize]["slot_type"], "sword");
    }
}
