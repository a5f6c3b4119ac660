/// Opcodes of the RXE instruction set.
///
/// Long-form instructions carry the opcode in the low byte of their first
/// word. The short form encodes only MOV, ACQUIRE, RELEASE and SUBCALL and is
/// decoded to the same variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // ========================================
    // Math
    // ========================================
    Add = 0x00,
    Sub = 0x01,
    Neg = 0x02,
    Mul = 0x03,
    Div = 0x04,
    Mod = 0x05,
    Sqrt = 0x36,
    Abs = 0x37,

    // ========================================
    // Logic
    // ========================================
    And = 0x06,
    Or = 0x07,
    Xor = 0x08,
    Not = 0x09,

    // ========================================
    // Comparison
    // ========================================
    Cmp = 0x11,
    Tst = 0x12,

    // ========================================
    // Data manipulation
    // ========================================
    Index = 0x15,
    Replace = 0x16,
    ArrSize = 0x17,
    ArrBuild = 0x18,
    ArrSubset = 0x19,
    ArrInit = 0x1A,
    Mov = 0x1B,
    Set = 0x1C,
    Flatten = 0x1D,
    Unflatten = 0x1E,
    NumToString = 0x1F,
    StringToNum = 0x20,
    StrCat = 0x21,
    StrSubset = 0x22,
    StrToByteArr = 0x23,
    ByteArrToStr = 0x24,

    // ========================================
    // Control flow
    // ========================================
    Jmp = 0x25,
    BrCmp = 0x26,
    BrTst = 0x27,
    Syscall = 0x28,
    Stop = 0x29,
    FinClump = 0x2A,
    FinClumpImmed = 0x2B,
    Acquire = 0x2C,
    Release = 0x2D,
    SubCall = 0x2E,
    SubRet = 0x2F,

    // ========================================
    // System I/O
    // ========================================
    SetIn = 0x30,
    SetOut = 0x31,
    GetIn = 0x32,
    GetOut = 0x33,
    Wait = 0x34,
    GetTick = 0x35,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use Opcode::*;
        let op = match byte {
            0x00 => Add,
            0x01 => Sub,
            0x02 => Neg,
            0x03 => Mul,
            0x04 => Div,
            0x05 => Mod,
            0x06 => And,
            0x07 => Or,
            0x08 => Xor,
            0x09 => Not,
            0x11 => Cmp,
            0x12 => Tst,
            0x15 => Index,
            0x16 => Replace,
            0x17 => ArrSize,
            0x18 => ArrBuild,
            0x19 => ArrSubset,
            0x1A => ArrInit,
            0x1B => Mov,
            0x1C => Set,
            0x1D => Flatten,
            0x1E => Unflatten,
            0x1F => NumToString,
            0x20 => StringToNum,
            0x21 => StrCat,
            0x22 => StrSubset,
            0x23 => StrToByteArr,
            0x24 => ByteArrToStr,
            0x25 => Jmp,
            0x26 => BrCmp,
            0x27 => BrTst,
            0x28 => Syscall,
            0x29 => Stop,
            0x2A => FinClump,
            0x2B => FinClumpImmed,
            0x2C => Acquire,
            0x2D => Release,
            0x2E => SubCall,
            0x2F => SubRet,
            0x30 => SetIn,
            0x31 => SetOut,
            0x32 => GetIn,
            0x33 => GetOut,
            0x34 => Wait,
            0x35 => GetTick,
            0x36 => Sqrt,
            0x37 => Abs,
            _ => return None,
        };
        Some(op)
    }

    /// Opcode of a short-form instruction (bits 8..11 of the first word).
    pub fn from_short(code: u8) -> Option<Self> {
        match code {
            0 => Some(Opcode::Mov),
            1 => Some(Opcode::Acquire),
            2 => Some(Opcode::Release),
            3 => Some(Opcode::SubCall),
            _ => None,
        }
    }

    /// Short-form code for opcodes that have one.
    pub fn short_code(self) -> Option<u8> {
        match self {
            Opcode::Mov => Some(0),
            Opcode::Acquire => Some(1),
            Opcode::Release => Some(2),
            Opcode::SubCall => Some(3),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Mnemonic as printed by the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Neg => "NEG",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Sqrt => "SQRT",
            Opcode::Abs => "ABS",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Xor => "XOR",
            Opcode::Not => "NOT",
            Opcode::Cmp => "CMP",
            Opcode::Tst => "TST",
            Opcode::Index => "INDEX",
            Opcode::Replace => "REPLACE",
            Opcode::ArrSize => "ARRSIZE",
            Opcode::ArrBuild => "ARRBUILD",
            Opcode::ArrSubset => "ARRSUBSET",
            Opcode::ArrInit => "ARRINIT",
            Opcode::Mov => "MOV",
            Opcode::Set => "SET",
            Opcode::Flatten => "FLATTEN",
            Opcode::Unflatten => "UNFLATTEN",
            Opcode::NumToString => "NUMTOSTRING",
            Opcode::StringToNum => "STRINGTONUM",
            Opcode::StrCat => "STRCAT",
            Opcode::StrSubset => "STRSUBSET",
            Opcode::StrToByteArr => "STRTOBYTEARR",
            Opcode::ByteArrToStr => "BYTEARRTOSTR",
            Opcode::Jmp => "JMP",
            Opcode::BrCmp => "BRCMP",
            Opcode::BrTst => "BRTST",
            Opcode::Syscall => "SYSCALL",
            Opcode::Stop => "STOP",
            Opcode::FinClump => "FINCLUMP",
            Opcode::FinClumpImmed => "FINCLUMPIMMED",
            Opcode::Acquire => "ACQUIRE",
            Opcode::Release => "RELEASE",
            Opcode::SubCall => "SUBCALL",
            Opcode::SubRet => "SUBRET",
            Opcode::SetIn => "SETIN",
            Opcode::SetOut => "SETOUT",
            Opcode::GetIn => "GETIN",
            Opcode::GetOut => "GETOUT",
            Opcode::Wait => "WAIT",
            Opcode::GetTick => "GETTICK",
        }
    }

    /// Fewest operand words a long-form instruction must carry for its
    /// handler. Opcodes that execute as no-ops read nothing.
    pub fn min_operands(self) -> usize {
        match self {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Cmp
            | Opcode::Index
            | Opcode::ArrInit
            | Opcode::BrCmp
            | Opcode::SetIn
            | Opcode::GetIn
            | Opcode::GetOut => 3,
            Opcode::Replace | Opcode::ArrSubset => 4,
            Opcode::Neg
            | Opcode::Not
            | Opcode::Abs
            | Opcode::Sqrt
            | Opcode::Tst
            | Opcode::ArrSize
            | Opcode::ArrBuild
            | Opcode::Mov
            | Opcode::Set
            | Opcode::BrTst
            | Opcode::Syscall
            | Opcode::SubCall
            | Opcode::SetOut
            | Opcode::Wait => 2,
            Opcode::Jmp | Opcode::SubRet | Opcode::GetTick => 1,
            Opcode::Flatten
            | Opcode::Unflatten
            | Opcode::NumToString
            | Opcode::StringToNum
            | Opcode::StrCat
            | Opcode::StrSubset
            | Opcode::StrToByteArr
            | Opcode::ByteArrToStr
            | Opcode::Stop
            | Opcode::FinClump
            | Opcode::FinClumpImmed
            | Opcode::Acquire
            | Opcode::Release => 0,
        }
    }

    /// Whether the first operand is a variable-length size word.
    pub fn has_size_operand(self) -> bool {
        matches!(self, Opcode::ArrBuild | Opcode::SetOut)
    }

    /// Whether the instruction takes a comparison mode in its flag bits.
    pub fn uses_compare_mode(self) -> bool {
        matches!(self, Opcode::Cmp | Opcode::Tst | Opcode::BrCmp | Opcode::BrTst)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Comparison mode encoded in the flag bits of CMP, TST, BRCMP and BRTST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMode {
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
}

impl CompareMode {
    pub fn from_flags(flags: u8) -> Option<Self> {
        let mode = match flags {
            0 => CompareMode::Less,
            1 => CompareMode::Greater,
            2 => CompareMode::LessEqual,
            3 => CompareMode::GreaterEqual,
            4 => CompareMode::Equal,
            5 => CompareMode::NotEqual,
            _ => return None,
        };
        Some(mode)
    }

    pub fn flags(self) -> u8 {
        match self {
            CompareMode::Less => 0,
            CompareMode::Greater => 1,
            CompareMode::LessEqual => 2,
            CompareMode::GreaterEqual => 3,
            CompareMode::Equal => 4,
            CompareMode::NotEqual => 5,
        }
    }

    pub fn apply(self, a: i32, b: i32) -> bool {
        match self {
            CompareMode::Less => a < b,
            CompareMode::Greater => a > b,
            CompareMode::LessEqual => a <= b,
            CompareMode::GreaterEqual => a >= b,
            CompareMode::Equal => a == b,
            CompareMode::NotEqual => a != b,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareMode::Less => "<",
            CompareMode::Greater => ">",
            CompareMode::LessEqual => "<=",
            CompareMode::GreaterEqual => ">=",
            CompareMode::Equal => "==",
            CompareMode::NotEqual => "!=",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_bytes_roundtrip() {
        let mut known = 0;
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op.byte(), byte);
                known += 1;
            }
        }
        assert_eq!(known, 47);
        assert_eq!(Opcode::from_byte(0x0A), None);
        assert_eq!(Opcode::from_byte(0x38), None);
    }

    #[test]
    fn test_short_codes() {
        for code in 0..4 {
            let op = Opcode::from_short(code).unwrap();
            assert_eq!(op.short_code(), Some(code));
        }
        assert_eq!(Opcode::from_short(4), None);
        assert_eq!(Opcode::Add.short_code(), None);
    }

    #[test]
    fn test_compare_modes() {
        assert!(CompareMode::Less.apply(1, 2));
        assert!(!CompareMode::Greater.apply(1, 2));
        assert!(CompareMode::LessEqual.apply(2, 2));
        assert!(CompareMode::GreaterEqual.apply(3, 2));
        assert!(CompareMode::Equal.apply(-1, -1));
        assert!(CompareMode::NotEqual.apply(0, 1));
        assert_eq!(CompareMode::from_flags(6), None);
        for flags in 0..6 {
            assert_eq!(CompareMode::from_flags(flags).unwrap().flags(), flags);
        }
    }
}
