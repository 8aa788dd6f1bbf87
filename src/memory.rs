use color_eyre::eyre::{bail, Result};

use crate::{MEM_SIZE, PROG_SIZE, PROG_START};

pub type Byte = u8; // 1 byte
pub type Word = u16; // 2 bytes

/// Where the 4x5 hexadecimal glyphs live.
pub const GLYPH_ADDR: Word = 0x000;
/// Height of a low-resolution glyph, in bytes.
pub const GLYPH_HEIGHT: Word = 5;
/// Where the 8x10 hexadecimal glyphs live.
pub const HIGH_GLYPH_ADDR: Word = 0x050;
/// Height of a high-resolution glyph, in bytes.
pub const HIGH_GLYPH_HEIGHT: Word = 10;

#[rustfmt::skip]
const GLYPHS: [Byte; 16 * GLYPH_HEIGHT as usize] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];

#[rustfmt::skip]
const HIGH_GLYPHS: [Byte; 16 * HIGH_GLYPH_HEIGHT as usize] = [
    0x3C, 0x7E, 0xE7, 0xC3, 0xC3, 0xC3, 0xC3, 0xE7, 0x7E, 0x3C, // 0
    0x18, 0x38, 0x58, 0x18, 0x18, 0x18, 0x18, 0x18, 0x18, 0x3C, // 1
    0x3E, 0x7F, 0xC3, 0x06, 0x0C, 0x18, 0x30, 0x60, 0xFF, 0xFF, // 2
    0x3C, 0x7E, 0xC3, 0x03, 0x0E, 0x0E, 0x03, 0xC3, 0x7E, 0x3C, // 3
    0x06, 0x0E, 0x1E, 0x36, 0x66, 0xC6, 0xFF, 0xFF, 0x06, 0x06, // 4
    0xFF, 0xFF, 0xC0, 0xC0, 0xFC, 0xFE, 0x03, 0xC3, 0x7E, 0x3C, // 5
    0x3E, 0x7C, 0xC0, 0xC0, 0xFC, 0xFE, 0xC3, 0xC3, 0x7E, 0x3C, // 6
    0xFF, 0xFF, 0x03, 0x06, 0x0C, 0x18, 0x30, 0x60, 0x60, 0x60, // 7
    0x3C, 0x7E, 0xC3, 0xC3, 0x7E, 0x7E, 0xC3, 0xC3, 0x7E, 0x3C, // 8
    0x3C, 0x7E, 0xC3, 0xC3, 0x7F, 0x3F, 0x03, 0x03, 0x3E, 0x7C, // 9
    0x3C, 0x7E, 0xC3, 0xC3, 0xFF, 0xFF, 0xC3, 0xC3, 0xC3, 0xC3, // A
    0xFC, 0xFE, 0xC3, 0xC3, 0xFE, 0xFE, 0xC3, 0xC3, 0xFE, 0xFC, // B
    0x3C, 0x7E, 0xC3, 0xC0, 0xC0, 0xC0, 0xC0, 0xC3, 0x7E, 0x3C, // C
    0xFC, 0xFE, 0xC3, 0xC3, 0xC3, 0xC3, 0xC3, 0xC3, 0xFE, 0xFC, // D
    0xFF, 0xFF, 0xC0, 0xC0, 0xFC, 0xFC, 0xC0, 0xC0, 0xFF, 0xFF, // E
    0xFF, 0xFF, 0xC0, 0xC0, 0xFC, 0xFC, 0xC0, 0xC0, 0xC0, 0xC0, // F
];

/// Emulates the 4K of memory seen by the interpreter.
///
/// Addresses are 12 bits wide; anything above `0xFFF` wraps around.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Memory {
    /// The actual data of the memory
    pub data: [Byte; MEM_SIZE],
}

impl Default for Memory {
    /// Initializes zeroed memory
    fn default() -> Self {
        Memory {
            data: [0; MEM_SIZE],
        }
    }
}

impl Memory {
    /// Initializes memory with both glyph sets preloaded.
    pub fn with_glyphs() -> Self {
        let mut mem = Self::default();
        mem.write_array(GLYPH_ADDR, &GLYPHS);
        mem.write_array(HIGH_GLYPH_ADDR, &HIGH_GLYPHS);
        mem
    }

    #[inline]
    fn index(position: Word) -> usize {
        position as usize & (MEM_SIZE - 1)
    }

    /// Reads a byte from the memory
    pub fn read_byte(&self, position: Word) -> Byte {
        self.data[Self::index(position)]
    }

    /// Writes a byte to the memory
    pub fn write_byte(&mut self, position: Word, value: Byte) {
        self.data[Self::index(position)] = value;
    }

    /// Reads a word from the memory (big endian)
    pub fn read_word(&self, position: Word) -> Word {
        (self.read_byte(position) as Word) << 8 | self.read_byte(position.wrapping_add(1)) as Word
    }

    /// Writes a word to the memory (big endian)
    pub fn write_word(&mut self, position: Word, value: Word) {
        self.write_byte(position, (value >> 8) as Byte);
        self.write_byte(position.wrapping_add(1), (value & 0xFF) as Byte);
    }

    /// Writes an array of bytes to the memory
    pub fn write_array(&mut self, position: Word, data: &[Byte]) {
        for (offset, byte) in data.iter().enumerate() {
            self.write_byte(position.wrapping_add(offset as Word), *byte);
        }
    }

    /// Copies a program to [`PROG_START`].
    ///
    /// # Errors
    ///
    /// Fails without touching memory if the program is longer than
    /// [`PROG_SIZE`].
    pub fn load_program(&mut self, program: &[Byte]) -> Result<()> {
        if program.len() > PROG_SIZE {
            bail!(
                "program is {} bytes long, but at most {} bytes fit in memory",
                program.len(),
                PROG_SIZE
            );
        }
        self.data[PROG_START..PROG_START + program.len()].copy_from_slice(program);
        Ok(())
    }
}

/// Writes a block of opcodes directly into the memory
#[macro_export]
macro_rules! write_opcodes {
    ( $mem:ident : $pos:expr => $( $opcode:expr ),+ $(,)? ) => {{
        let mut position: $crate::memory::Word = $pos;
        $(
            $mem.write_word(position, $opcode);
            position = position.wrapping_add(2);
        )+
        let _ = position;
    }};
}
