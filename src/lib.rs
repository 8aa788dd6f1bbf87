//! A Chip-8 / Super-Chip virtual machine and a companion assembler.

/// The size of the Chip-8's memory, in bytes.
pub const MEM_SIZE: usize = 0x1000;
/// The address where programs are loaded and where execution starts.
pub const PROG_START: usize = 0x200;
/// The maximum size of a program, in bytes.
pub const PROG_SIZE: usize = MEM_SIZE - PROG_START;

pub mod assembler;
pub mod display;
pub mod instruction;
pub mod memory;
pub mod processor;

pub use assembler::{Assembler, Program};
pub use instruction::{Instruction, Register};
pub use processor::{Chip8, Keypad, Options};
