//! Instruction decoding.
//!
//! Two encodings share the code stream:
//! - Short form (bit 11 set): `(w >> 8) & 7` selects MOV, ACQUIRE, RELEASE or
//!   SUBCALL and the low byte is a signed difference applied to the following
//!   word.
//! - Long form: opcode in the low byte, flags in bits 8..12, instruction size
//!   in bytes in the top nibble. A size nibble of `0xE` means the real size is
//!   in the next word, which is also the first operand.

use super::ops::Opcode;
use super::vm::VmError;

const SHORT_FORM_BIT: u16 = 1 << 11;
const ESCAPED_SIZE: u16 = 0xE;

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub opcode: Opcode,
    pub flags: u8,
    /// Length in code words, including the opcode word.
    pub length: usize,
    operands: Operands<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operands<'a> {
    Code(&'a [u16]),
    Short([u16; 2], usize),
}

impl<'a> Instruction<'a> {
    pub fn operands(&self) -> &[u16] {
        match &self.operands {
            Operands::Code(words) => words,
            Operands::Short(words, len) => &words[..*len],
        }
    }

    /// Operand `i`. Decoding rejects instructions with fewer than
    /// `opcode.min_operands()` operands, so handlers index below that freely.
    pub fn operand(&self, i: usize) -> u16 {
        self.operands()[i]
    }

    pub fn is_short(&self) -> bool {
        matches!(self.operands, Operands::Short(..))
    }
}

/// Decode the instruction starting at `pc`.
pub fn decode(code: &[u16], pc: usize) -> Result<Instruction<'_>, VmError> {
    let word = *code
        .get(pc)
        .ok_or_else(|| malformed(pc, "program counter past end of code"))?;

    if word & SHORT_FORM_BIT != 0 {
        decode_short(code, pc, word)
    } else {
        decode_long(code, pc, word)
    }
}

fn decode_short(code: &[u16], pc: usize, word: u16) -> Result<Instruction<'_>, VmError> {
    let short = ((word >> 8) & 0x7) as u8;
    let opcode = Opcode::from_short(short).ok_or(VmError::InvalidOpcode {
        pc,
        opcode: short,
        short: true,
    })?;
    let diff = (word & 0xFF) as u8 as i8;

    let (operands, length) = match opcode {
        Opcode::Acquire | Opcode::Release => (Operands::Short([diff as u16, 0], 1), 1),
        _ => {
            let next = *code
                .get(pc + 1)
                .ok_or_else(|| malformed(pc, "short instruction past end of code"))?;
            let first = next.wrapping_add(diff as u16);
            (Operands::Short([first, next], 2), 2)
        }
    };

    Ok(Instruction {
        opcode,
        flags: 0,
        length,
        operands,
    })
}

fn decode_long(code: &[u16], pc: usize, word: u16) -> Result<Instruction<'_>, VmError> {
    let byte = (word & 0xFF) as u8;
    let flags = ((word >> 8) & 0xF) as u8;
    let mut size = word >> 12;
    if size == ESCAPED_SIZE {
        size = *code
            .get(pc + 1)
            .ok_or_else(|| malformed(pc, "size word past end of code"))?;
    }

    let length = (size / 2) as usize;
    if length == 0 {
        return Err(malformed(pc, "zero instruction length"));
    }
    if pc + length > code.len() {
        return Err(malformed(pc, "instruction runs past end of code"));
    }

    let opcode = Opcode::from_byte(byte).ok_or(VmError::InvalidOpcode {
        pc,
        opcode: byte,
        short: false,
    })?;
    if length - 1 < opcode.min_operands() {
        return Err(malformed(pc, "too few operands"));
    }

    Ok(Instruction {
        opcode,
        flags,
        length,
        operands: Operands::Code(&code[pc + 1..pc + length]),
    })
}

fn malformed(pc: usize, reason: &'static str) -> VmError {
    VmError::MalformedInstruction { pc, reason }
}
