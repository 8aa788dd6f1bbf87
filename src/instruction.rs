//! The instruction model shared by the interpreter and the assembler.

use std::fmt;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::memory::Word;

/// A general-purpose register. `VF` doubles as the flags register.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(TryFromPrimitive, IntoPrimitive)]
pub enum Register {
    V0 = 0x0,
    V1 = 0x1,
    V2 = 0x2,
    V3 = 0x3,
    V4 = 0x4,
    V5 = 0x5,
    V6 = 0x6,
    V7 = 0x7,
    V8 = 0x8,
    V9 = 0x9,
    VA = 0xA,
    VB = 0xB,
    VC = 0xC,
    VD = 0xD,
    VE = 0xE,
    VF = 0xF,
}

impl Register {
    pub const ALL: [Register; 16] = [
        Register::V0,
        Register::V1,
        Register::V2,
        Register::V3,
        Register::V4,
        Register::V5,
        Register::V6,
        Register::V7,
        Register::V8,
        Register::V9,
        Register::VA,
        Register::VB,
        Register::VC,
        Register::VD,
        Register::VE,
        Register::VF,
    ];

    /// The register named by the lowest nibble of `bits`.
    pub fn from_nibble(bits: Word) -> Self {
        Self::ALL[(bits & 0xF) as usize]
    }

    pub fn index(self) -> usize {
        u8::from(self) as usize
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{:X}", u8::from(*self))
    }
}

impl FromStr for Register {
    type Err = ();

    /// Parses `Vx` (case-insensitive), where `x` is one hex digit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            [b'v' | b'V', digit] if digit.is_ascii_hexdigit() => {
                let index = (*digit as char).to_digit(16).ok_or(())?;
                Register::try_from(index as u8).map_err(|_| ())
            }
            _ => Err(()),
        }
    }
}

/// A 12-bit memory address.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(Word);

impl Address {
    pub const MAX: Word = 0xFFF;

    /// Returns `None` if `word` does not fit in 12 bits.
    pub fn from_word(word: Word) -> Option<Self> {
        if word <= Self::MAX {
            Some(Address(word))
        } else {
            None
        }
    }

    pub fn word(self) -> Word {
        self.0
    }
}

/// How an instruction interprets its immediate field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Immediate {
    /// 12-bit address (`nnn`)
    Address,
    /// 8-bit byte (`kk`)
    Byte,
    /// 4-bit nibble (`n`)
    Nibble,
}

impl Immediate {
    /// Narrows `value` to this field's width. Bytes also accept negative
    /// values down to -128 in two's complement.
    pub fn fit(self, value: Word) -> Option<Word> {
        match self {
            Immediate::Address if value <= Address::MAX => Some(value),
            Immediate::Byte if value <= 0xFF || value >= 0xFF80 => Some(value & 0xFF),
            Immediate::Nibble if value <= 0xF => Some(value),
            _ => None,
        }
    }
}

/// A decoded instruction. Variants are named after their assembler syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// `SCD n` (`00Cn`): scroll down `n` pixels. Super-Chip only.
    Scd(u8),
    /// `CLS` (`00E0`): clear the display.
    Cls,
    /// `RET` (`00EE`): return from subroutine.
    Ret,
    /// `SCR` (`00FB`): scroll right 4 pixels. Super-Chip only.
    Scr,
    /// `SCL` (`00FC`): scroll left 4 pixels. Super-Chip only.
    Scl,
    /// `EXIT` (`00FD`): stop the interpreter. Super-Chip only.
    Exit,
    /// `LOW` (`00FE`): 64x32 mode. Super-Chip only.
    Low,
    /// `HIGH` (`00FF`): 128x64 mode. Super-Chip only.
    High,
    /// `JP addr` (`1nnn`)
    Jp(Address),
    /// `CALL addr` (`2nnn`)
    Call(Address),
    /// `SE Vx, byte` (`3xkk`)
    SeByte(Register, u8),
    /// `SNE Vx, byte` (`4xkk`)
    SneByte(Register, u8),
    /// `SE Vx, Vy` (`5xy0`)
    SeReg(Register, Register),
    /// `LD Vx, byte` (`6xkk`)
    LdByte(Register, u8),
    /// `ADD Vx, byte` (`7xkk`): sets `VF` on carry.
    AddByte(Register, u8),
    /// `LD Vx, Vy` (`8xy0`)
    LdReg(Register, Register),
    /// `OR Vx, Vy` (`8xy1`)
    Or(Register, Register),
    /// `AND Vx, Vy` (`8xy2`)
    And(Register, Register),
    /// `XOR Vx, Vy` (`8xy3`)
    Xor(Register, Register),
    /// `ADD Vx, Vy` (`8xy4`): sets `VF` on carry.
    AddReg(Register, Register),
    /// `SUB Vx, Vy` (`8xy5`): `VF = 1` when there was no borrow.
    Sub(Register, Register),
    /// `SHR Vx[, Vy]` (`8xy6`): `VF` gets the bit shifted out.
    Shr(Register, Register),
    /// `SUBN Vx, Vy` (`8xy7`): `Vx = Vy - Vx`, `VF = 1` when there was no borrow.
    Subn(Register, Register),
    /// `SHL Vx[, Vy]` (`8xyE`): `VF` gets the bit shifted out.
    Shl(Register, Register),
    /// `SNE Vx, Vy` (`9xy0`)
    SneReg(Register, Register),
    /// `LD I, addr` (`Annn`)
    LdI(Address),
    /// `JP V0, addr` (`Bnnn`)
    JpV0(Address),
    /// `RND Vx, byte` (`Cxkk`)
    Rnd(Register, u8),
    /// `DRW Vx, Vy, n` (`Dxyn`): `n == 0` draws a 16x16 sprite.
    Drw(Register, Register, u8),
    /// `SKP Vx` (`Ex9E`)
    Skp(Register),
    /// `SKNP Vx` (`ExA1`)
    Sknp(Register),
    /// `LD Vx, DT` (`Fx07`)
    LdRegDt(Register),
    /// `LD Vx, K` (`Fx0A`): wait for a key press and release.
    LdKey(Register),
    /// `LD DT, Vx` (`Fx15`)
    LdDtReg(Register),
    /// `LD ST, Vx` (`Fx18`)
    LdSt(Register),
    /// `ADD I, Vx` (`Fx1E`)
    AddI(Register),
    /// `LD F, Vx` (`Fx29`): point `I` at the 4x5 glyph for `Vx`.
    LdF(Register),
    /// `LD HF, Vx` (`Fx30`): point `I` at the 8x10 glyph for `Vx`. Super-Chip only.
    LdHf(Register),
    /// `LD B, Vx` (`Fx33`): store BCD of `Vx` at `I..I+3`.
    LdB(Register),
    /// `LD [I], Vx` (`Fx55`)
    LdDerefIReg(Register),
    /// `LD Vx, [I]` (`Fx65`)
    LdRegDerefI(Register),
    /// `LD R, Vx` (`Fx75`): save `V0..=Vx` to the flag slots. Super-Chip only.
    LdRReg(Register),
    /// `LD Vx, R` (`Fx85`): restore `V0..=Vx` from the flag slots. Super-Chip only.
    LdRegR(Register),
    /// Anything else; keeps the raw opcode for diagnostics.
    Invalid(Word),
}

impl Instruction {
    /// Decodes an opcode. Never fails: unknown patterns become
    /// [`Instruction::Invalid`].
    pub fn decode(opcode: Word) -> Self {
        use Instruction::*;

        let x = Register::from_nibble(opcode >> 8);
        let y = Register::from_nibble(opcode >> 4);
        let addr = Address(opcode & 0xFFF);
        let byte = (opcode & 0xFF) as u8;
        let nibble = (opcode & 0xF) as u8;

        match opcode >> 12 {
            0x0 => match opcode & 0xFFF {
                0x0C0..=0x0CF => Scd(nibble),
                0x0E0 => Cls,
                0x0EE => Ret,
                0x0FB => Scr,
                0x0FC => Scl,
                0x0FD => Exit,
                0x0FE => Low,
                0x0FF => High,
                _ => Invalid(opcode),
            },
            0x1 => Jp(addr),
            0x2 => Call(addr),
            0x3 => SeByte(x, byte),
            0x4 => SneByte(x, byte),
            0x5 if nibble == 0 => SeReg(x, y),
            0x6 => LdByte(x, byte),
            0x7 => AddByte(x, byte),
            0x8 => match nibble {
                0x0 => LdReg(x, y),
                0x1 => Or(x, y),
                0x2 => And(x, y),
                0x3 => Xor(x, y),
                0x4 => AddReg(x, y),
                0x5 => Sub(x, y),
                0x6 => Shr(x, y),
                0x7 => Subn(x, y),
                0xE => Shl(x, y),
                _ => Invalid(opcode),
            },
            0x9 if nibble == 0 => SneReg(x, y),
            0xA => LdI(addr),
            0xB => JpV0(addr),
            0xC => Rnd(x, byte),
            0xD => Drw(x, y, nibble),
            0xE => match byte {
                0x9E => Skp(x),
                0xA1 => Sknp(x),
                _ => Invalid(opcode),
            },
            0xF => match byte {
                0x07 => LdRegDt(x),
                0x0A => LdKey(x),
                0x15 => LdDtReg(x),
                0x18 => LdSt(x),
                0x1E => AddI(x),
                0x29 => LdF(x),
                0x30 => LdHf(x),
                0x33 => LdB(x),
                0x55 => LdDerefIReg(x),
                0x65 => LdRegDerefI(x),
                0x75 => LdRReg(x),
                0x85 => LdRegR(x),
                _ => Invalid(opcode),
            },
            _ => Invalid(opcode),
        }
    }

    /// Encodes the instruction back into its opcode.
    pub fn opcode(&self) -> Word {
        use Instruction::*;

        fn nnn(family: Word, addr: Address) -> Word {
            family << 12 | addr.word()
        }
        fn xkk(family: Word, x: Register, kk: u8) -> Word {
            family << 12 | (u8::from(x) as Word) << 8 | kk as Word
        }
        fn xyn(family: Word, x: Register, y: Register, n: u8) -> Word {
            family << 12 | (u8::from(x) as Word) << 8 | (u8::from(y) as Word) << 4 | (n & 0xF) as Word
        }

        match *self {
            Scd(n) => 0x00C0 | (n & 0xF) as Word,
            Cls => 0x00E0,
            Ret => 0x00EE,
            Scr => 0x00FB,
            Scl => 0x00FC,
            Exit => 0x00FD,
            Low => 0x00FE,
            High => 0x00FF,
            Jp(addr) => nnn(0x1, addr),
            Call(addr) => nnn(0x2, addr),
            SeByte(x, kk) => xkk(0x3, x, kk),
            SneByte(x, kk) => xkk(0x4, x, kk),
            SeReg(x, y) => xyn(0x5, x, y, 0x0),
            LdByte(x, kk) => xkk(0x6, x, kk),
            AddByte(x, kk) => xkk(0x7, x, kk),
            LdReg(x, y) => xyn(0x8, x, y, 0x0),
            Or(x, y) => xyn(0x8, x, y, 0x1),
            And(x, y) => xyn(0x8, x, y, 0x2),
            Xor(x, y) => xyn(0x8, x, y, 0x3),
            AddReg(x, y) => xyn(0x8, x, y, 0x4),
            Sub(x, y) => xyn(0x8, x, y, 0x5),
            Shr(x, y) => xyn(0x8, x, y, 0x6),
            Subn(x, y) => xyn(0x8, x, y, 0x7),
            Shl(x, y) => xyn(0x8, x, y, 0xE),
            SneReg(x, y) => xyn(0x9, x, y, 0x0),
            LdI(addr) => nnn(0xA, addr),
            JpV0(addr) => nnn(0xB, addr),
            Rnd(x, kk) => xkk(0xC, x, kk),
            Drw(x, y, n) => xyn(0xD, x, y, n),
            Skp(x) => xkk(0xE, x, 0x9E),
            Sknp(x) => xkk(0xE, x, 0xA1),
            LdRegDt(x) => xkk(0xF, x, 0x07),
            LdKey(x) => xkk(0xF, x, 0x0A),
            LdDtReg(x) => xkk(0xF, x, 0x15),
            LdSt(x) => xkk(0xF, x, 0x18),
            AddI(x) => xkk(0xF, x, 0x1E),
            LdF(x) => xkk(0xF, x, 0x29),
            LdHf(x) => xkk(0xF, x, 0x30),
            LdB(x) => xkk(0xF, x, 0x33),
            LdDerefIReg(x) => xkk(0xF, x, 0x55),
            LdRegDerefI(x) => xkk(0xF, x, 0x65),
            LdRReg(x) => xkk(0xF, x, 0x75),
            LdRegR(x) => xkk(0xF, x, 0x85),
            Invalid(opcode) => opcode,
        }
    }

    /// The kind of immediate this instruction carries, if any.
    pub fn immediate(&self) -> Option<Immediate> {
        use Instruction::*;

        match self {
            Jp(_) | Call(_) | LdI(_) | JpV0(_) => Some(Immediate::Address),
            SeByte(..) | SneByte(..) | LdByte(..) | AddByte(..) | Rnd(..) => Some(Immediate::Byte),
            Scd(_) | Drw(..) => Some(Immediate::Nibble),
            _ => None,
        }
    }

    /// Replaces the immediate field. Returns `None` if the instruction has no
    /// immediate or `value` does not fit it.
    pub fn with_immediate(self, value: Word) -> Option<Self> {
        use Instruction::*;

        let value = self.immediate()?.fit(value)?;
        let addr = Address(value);
        let kk = value as u8;

        Some(match self {
            Jp(_) => Jp(addr),
            Call(_) => Call(addr),
            LdI(_) => LdI(addr),
            JpV0(_) => JpV0(addr),
            SeByte(x, _) => SeByte(x, kk),
            SneByte(x, _) => SneByte(x, kk),
            LdByte(x, _) => LdByte(x, kk),
            AddByte(x, _) => AddByte(x, kk),
            Rnd(x, _) => Rnd(x, kk),
            Scd(_) => Scd(kk),
            Drw(x, y, _) => Drw(x, y, kk),
            other => other,
        })
    }
}

impl From<Word> for Instruction {
    fn from(opcode: Word) -> Self {
        Self::decode(opcode)
    }
}

impl From<Instruction> for Word {
    fn from(instruction: Instruction) -> Self {
        instruction.opcode()
    }
}

impl fmt::Display for Instruction {
    /// Renders the instruction in assembler syntax. Invalid opcodes render
    /// as a `DW` directive so the output still assembles.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;

        match *self {
            Scd(n) => write!(f, "SCD {}", n),
            Cls => f.write_str("CLS"),
            Ret => f.write_str("RET"),
            Scr => f.write_str("SCR"),
            Scl => f.write_str("SCL"),
            Exit => f.write_str("EXIT"),
            Low => f.write_str("LOW"),
            High => f.write_str("HIGH"),
            Jp(addr) => write!(f, "JP #{:03X}", addr.word()),
            Call(addr) => write!(f, "CALL #{:03X}", addr.word()),
            SeByte(x, kk) => write!(f, "SE {}, #{:02X}", x, kk),
            SneByte(x, kk) => write!(f, "SNE {}, #{:02X}", x, kk),
            SeReg(x, y) => write!(f, "SE {}, {}", x, y),
            LdByte(x, kk) => write!(f, "LD {}, #{:02X}", x, kk),
            AddByte(x, kk) => write!(f, "ADD {}, #{:02X}", x, kk),
            LdReg(x, y) => write!(f, "LD {}, {}", x, y),
            Or(x, y) => write!(f, "OR {}, {}", x, y),
            And(x, y) => write!(f, "AND {}, {}", x, y),
            Xor(x, y) => write!(f, "XOR {}, {}", x, y),
            AddReg(x, y) => write!(f, "ADD {}, {}", x, y),
            Sub(x, y) => write!(f, "SUB {}, {}", x, y),
            Shr(x, y) => write!(f, "SHR {}, {}", x, y),
            Subn(x, y) => write!(f, "SUBN {}, {}", x, y),
            Shl(x, y) => write!(f, "SHL {}, {}", x, y),
            SneReg(x, y) => write!(f, "SNE {}, {}", x, y),
            LdI(addr) => write!(f, "LD I, #{:03X}", addr.word()),
            JpV0(addr) => write!(f, "JP V0, #{:03X}", addr.word()),
            Rnd(x, kk) => write!(f, "RND {}, #{:02X}", x, kk),
            Drw(x, y, n) => write!(f, "DRW {}, {}, {}", x, y, n),
            Skp(x) => write!(f, "SKP {}", x),
            Sknp(x) => write!(f, "SKNP {}", x),
            LdRegDt(x) => write!(f, "LD {}, DT", x),
            LdKey(x) => write!(f, "LD {}, K", x),
            LdDtReg(x) => write!(f, "LD DT, {}", x),
            LdSt(x) => write!(f, "LD ST, {}", x),
            AddI(x) => write!(f, "ADD I, {}", x),
            LdF(x) => write!(f, "LD F, {}", x),
            LdHf(x) => write!(f, "LD HF, {}", x),
            LdB(x) => write!(f, "LD B, {}", x),
            LdDerefIReg(x) => write!(f, "LD [I], {}", x),
            LdRegDerefI(x) => write!(f, "LD {}, [I]", x),
            LdRReg(x) => write!(f, "LD R, {}", x),
            LdRegR(x) => write!(f, "LD {}, R", x),
            Invalid(opcode) => write!(f, "DW #{:04X}", opcode),
        }
    }
}
