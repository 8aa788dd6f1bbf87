use std::io::Read;
use std::sync::Arc;

use color_eyre::eyre::{bail, Result, WrapErr};
use log::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::display::Display;
use crate::instruction::{Instruction, Register};
use crate::memory::{Byte, Memory, Word, GLYPH_ADDR, GLYPH_HEIGHT, HIGH_GLYPH_ADDR, HIGH_GLYPH_HEIGHT};
use crate::{PROG_SIZE, PROG_START};

pub mod keypad;
pub mod timer;

pub use keypad::Keypad;
pub use timer::TimerRegisters;
use timer::Timer;

/// Sound timer value kept up while a key is held during `LD Vx, K`
const KEY_TONE: u8 = 2;

/// Options which can be given to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// The frequency of the timer, in Hz
    pub timer_freq: u32,
    /// Whether a draw waits for the next timer tick before the display is
    /// reported as needing a refresh. Has no effect without the timer.
    pub delay_draws: bool,
    /// Whether to run the timer thread at all. Without it the delay and
    /// sound timers never count down.
    pub enable_timer: bool,
    /// `LD [I], Vx` and `LD Vx, [I]` leave `I` untouched
    pub load_quirks: bool,
    /// `SHR`/`SHL` shift `Vx` in place and ignore `Vy`
    pub shift_quirks: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timer_freq: 60,
            delay_draws: true,
            enable_timer: true,
            load_quirks: false,
            shift_quirks: false,
        }
    }
}

impl Options {
    /// Deterministic options for headless use: no timer thread, no draw pacing.
    pub fn testing() -> Self {
        Self {
            delay_draws: false,
            enable_timer: false,
            ..Self::default()
        }
    }
}

/// Progress of a `LD Vx, K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KeyWait {
    register: Register,
    /// Key seen going down; the wait ends when it comes back up
    pressed: Option<u8>,
}

/// Emulates a Chip-8 / Super-Chip interpreter
pub struct Chip8 {
    options: Options,
    /// The 4K of memory, glyphs preloaded
    pub memory: Memory,
    pub display: Display,
    /// The general-purpose registers `V0`-`VF`
    pub regs: [Byte; 16],
    /// The address register `I`
    pub i: Word,
    /// Program counter
    pub pc: Word,
    /// Persistent flag slots used by `LD R, Vx` and `LD Vx, R`
    pub rpl: [Byte; 16],
    call_stack: Vec<Word>,
    timers: Arc<TimerRegisters>,
    keypad: Keypad,
    halted: bool,
    needs_refresh: bool,
    /// A paced draw happened and is waiting for a tick to be reported
    refresh_pending: bool,
    awaiting_key: Option<KeyWait>,
    invalid_opcode: Option<Word>,
    rng: StdRng,
    timer: Option<Timer>,
}

impl Chip8 {
    /// Initializes a new interpreter, starting the timer thread if enabled.
    pub fn new(options: Options) -> Result<Self> {
        let timers = Arc::new(TimerRegisters::default());
        let timer = if options.enable_timer {
            Some(Timer::start(Arc::clone(&timers), options.timer_freq)?)
        } else {
            None
        };

        Ok(Self {
            options,
            memory: Memory::with_glyphs(),
            display: Display::default(),
            regs: [0; 16],
            i: 0,
            pc: PROG_START as Word,
            rpl: [0; 16],
            call_stack: Vec::new(),
            timers,
            keypad: Keypad::default(),
            halted: false,
            needs_refresh: false,
            refresh_pending: false,
            awaiting_key: None,
            invalid_opcode: None,
            rng: StdRng::from_entropy(),
            timer,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Loads a program in binary format at [`PROG_START`].
    pub fn load_bytes(&mut self, bytes: &[Byte]) -> Result<()> {
        self.memory.load_program(bytes)
    }

    /// Loads a program in binary format from a reader.
    pub fn load_file<R: Read>(&mut self, file: &mut R) -> Result<()> {
        let mut bytes = Vec::with_capacity(PROG_SIZE);
        file.take(PROG_SIZE as u64 + 1)
            .read_to_end(&mut bytes)
            .wrap_err("failed to read program")?;
        self.load_bytes(&bytes)
    }

    /// A handle to the key bitmask, for the input side to write to.
    pub fn keypad(&self) -> Keypad {
        self.keypad.clone()
    }

    pub fn timers(&self) -> &Arc<TimerRegisters> {
        &self.timers
    }

    pub fn delay_timer(&self) -> u8 {
        self.timers.delay()
    }

    pub fn sound_timer(&self) -> u8 {
        self.timers.sound()
    }

    pub fn call_stack(&self) -> &[Word] {
        &self.call_stack
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Whether execution is suspended on a `LD Vx, K`.
    pub fn is_awaiting_key(&self) -> bool {
        self.awaiting_key.is_some()
    }

    /// The opcode that halted the interpreter, if decoding failed.
    pub fn invalid_opcode(&self) -> Option<Word> {
        self.invalid_opcode
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    /// Returns and clears the needs-refresh flag.
    pub fn take_refresh(&mut self) -> bool {
        std::mem::take(&mut self.needs_refresh)
    }

    /// The instruction at the program counter.
    pub fn current_instruction(&self) -> Instruction {
        Instruction::decode(self.memory.read_word(self.pc))
    }

    /// Runs one execution step.
    ///
    /// Does nothing once halted. While waiting on a key, only polls the
    /// keypad.
    pub fn step(&mut self) -> Result<()> {
        if self.halted {
            return Ok(());
        }
        if self.awaiting_key.is_some() {
            self.poll_key();
            return Ok(());
        }
        let opcode = self.memory.read_word(self.pc);
        self.execute_opcode(opcode)
    }

    /// Executes `opcode` as if it were stored at the program counter.
    pub fn execute_opcode(&mut self, opcode: Word) -> Result<()> {
        self.execute_instruction(Instruction::decode(opcode))
    }

    /// Steps until the program exits or fails.
    ///
    /// Spins forever on a key wait if nobody is pressing keys.
    pub fn execute_until_exit(&mut self) -> Result<()> {
        while !self.halted {
            self.step()?;
        }
        info!("Program exited at 0x{:03X}", self.pc);
        Ok(())
    }

    /// Executes a single instruction
    pub fn execute_instruction(&mut self, instruction: Instruction) -> Result<()> {
        use Instruction::*;

        self.poll_refresh();

        match instruction {
            Scd(n) => {
                if self.draws_paced() && !self.display.is_hires() && !self.timers.take_latch() {
                    trace!("SCD at 0x{:03X} waits for a timer tick", self.pc);
                    return Ok(());
                }
                self.display.scroll_down(n as usize);
                self.needs_refresh = true;
                self.next();
            }
            Cls => {
                self.display.clear();
                self.needs_refresh = true;
                self.next();
            }
            Ret => match self.call_stack.pop() {
                Some(addr) => self.pc = addr,
                None => {
                    self.halted = true;
                    bail!("RET with an empty call stack at 0x{:03X}", self.pc);
                }
            },
            Scr => {
                self.display.scroll_right(4);
                self.needs_refresh = true;
                self.next();
            }
            Scl => {
                self.display.scroll_left(4);
                self.needs_refresh = true;
                self.next();
            }
            Exit => {
                self.halted = true;
                info!("EXIT at 0x{:03X}", self.pc);
            }
            Low | High => {
                self.display.set_hires(instruction == High);
                self.needs_refresh = true;
                self.next();
            }
            Jp(addr) => self.pc = addr.word(),
            Call(addr) => {
                self.call_stack.push(self.pc.wrapping_add(2));
                self.pc = addr.word();
            }
            SeByte(x, kk) => self.skip_if(self.reg(x) == kk),
            SneByte(x, kk) => self.skip_if(self.reg(x) != kk),
            SeReg(x, y) => self.skip_if(self.reg(x) == self.reg(y)),
            LdByte(x, kk) => {
                self.set_reg(x, kk);
                self.next();
            }
            AddByte(x, kk) => {
                let (result, carry) = self.reg(x).overflowing_add(kk);
                self.set_reg(x, result);
                self.set_flag(carry);
                self.next();
            }
            LdReg(x, y) => {
                self.set_reg(x, self.reg(y));
                self.next();
            }
            Or(x, y) => {
                self.set_reg(x, self.reg(x) | self.reg(y));
                self.next();
            }
            And(x, y) => {
                self.set_reg(x, self.reg(x) & self.reg(y));
                self.next();
            }
            Xor(x, y) => {
                self.set_reg(x, self.reg(x) ^ self.reg(y));
                self.next();
            }
            AddReg(x, y) => {
                let (result, carry) = self.reg(x).overflowing_add(self.reg(y));
                self.set_reg(x, result);
                self.set_flag(carry);
                self.next();
            }
            Sub(x, y) => {
                let (a, b) = (self.reg(x), self.reg(y));
                self.set_reg(x, a.wrapping_sub(b));
                self.set_flag(a >= b);
                self.next();
            }
            Shr(x, y) => {
                let value = self.shift_source(x, y);
                self.set_reg(x, value >> 1);
                self.set_flag(value & 0x01 != 0);
                self.next();
            }
            Subn(x, y) => {
                let (a, b) = (self.reg(x), self.reg(y));
                self.set_reg(x, b.wrapping_sub(a));
                self.set_flag(b >= a);
                self.next();
            }
            Shl(x, y) => {
                let value = self.shift_source(x, y);
                self.set_reg(x, value << 1);
                self.set_flag(value & 0x80 != 0);
                self.next();
            }
            SneReg(x, y) => self.skip_if(self.reg(x) != self.reg(y)),
            LdI(addr) => {
                self.i = addr.word();
                self.next();
            }
            JpV0(addr) => self.pc = addr.word().wrapping_add(self.reg(Register::V0) as Word),
            Rnd(x, kk) => {
                let value = self.rng.gen::<u8>() & kk;
                self.set_reg(x, value);
                self.next();
            }
            Drw(x, y, n) => {
                if self.draws_paced() && self.refresh_pending {
                    // Previous draw has not been shown yet; retry next step
                    trace!("DRW at 0x{:03X} waits for a timer tick", self.pc);
                    return Ok(());
                }
                self.draw(x, y, n);
                self.next();
            }
            Skp(x) => self.skip_if(self.keypad.is_pressed(self.reg(x))),
            Sknp(x) => self.skip_if(!self.keypad.is_pressed(self.reg(x))),
            LdRegDt(x) => {
                self.set_reg(x, self.timers.delay());
                self.next();
            }
            LdKey(x) => {
                self.awaiting_key = Some(KeyWait {
                    register: x,
                    pressed: None,
                });
                debug!("Waiting for key into {}", x);
            }
            LdDtReg(x) => {
                self.timers.set_delay(self.reg(x));
                self.next();
            }
            LdSt(x) => {
                self.timers.set_sound(self.reg(x));
                self.next();
            }
            AddI(x) => {
                self.i = self.i.wrapping_add(self.reg(x) as Word);
                self.next();
            }
            LdF(x) => {
                self.i = GLYPH_ADDR + (self.reg(x) & 0xF) as Word * GLYPH_HEIGHT;
                self.next();
            }
            LdHf(x) => {
                self.i = HIGH_GLYPH_ADDR + (self.reg(x) & 0xF) as Word * HIGH_GLYPH_HEIGHT;
                self.next();
            }
            LdB(x) => {
                let value = self.reg(x);
                self.memory.write_byte(self.i, value / 100);
                self.memory.write_byte(self.i.wrapping_add(1), value / 10 % 10);
                self.memory.write_byte(self.i.wrapping_add(2), value % 10);
                self.next();
            }
            LdDerefIReg(x) => {
                for r in 0..=x.index() {
                    self.memory.write_byte(self.i.wrapping_add(r as Word), self.regs[r]);
                }
                self.advance_i(x);
                self.next();
            }
            LdRegDerefI(x) => {
                for r in 0..=x.index() {
                    self.regs[r] = self.memory.read_byte(self.i.wrapping_add(r as Word));
                }
                self.advance_i(x);
                self.next();
            }
            LdRReg(x) => {
                let n = x.index() + 1;
                self.rpl[..n].copy_from_slice(&self.regs[..n]);
                self.next();
            }
            LdRegR(x) => {
                let n = x.index() + 1;
                self.regs[..n].copy_from_slice(&self.rpl[..n]);
                self.next();
            }
            Invalid(opcode) => {
                self.halted = true;
                self.invalid_opcode = Some(opcode);
                bail!("Invalid opcode: 0x{:04X} at 0x{:03X}", opcode, self.pc);
            }
        }

        debug!("{}", instruction);

        Ok(())
    }

    #[inline]
    fn reg(&self, register: Register) -> Byte {
        self.regs[register.index()]
    }

    #[inline]
    fn set_reg(&mut self, register: Register, value: Byte) {
        self.regs[register.index()] = value;
    }

    /// Writes `VF`; always called after the destination register is written.
    #[inline]
    fn set_flag(&mut self, flag: bool) {
        self.regs[Register::VF.index()] = flag as Byte;
    }

    #[inline]
    fn next(&mut self) {
        self.pc = self.pc.wrapping_add(2);
    }

    #[inline]
    fn skip_if(&mut self, condition: bool) {
        self.pc = self.pc.wrapping_add(if condition { 4 } else { 2 });
    }

    fn shift_source(&self, x: Register, y: Register) -> Byte {
        if self.options.shift_quirks {
            self.reg(x)
        } else {
            self.reg(y)
        }
    }

    fn advance_i(&mut self, x: Register) {
        if !self.options.load_quirks {
            self.i = self.i.wrapping_add(x.index() as Word + 1);
        }
    }

    fn draws_paced(&self) -> bool {
        self.options.delay_draws && self.timer.is_some()
    }

    /// Reports a paced draw once the timer has ticked since it happened.
    fn poll_refresh(&mut self) {
        if self.refresh_pending && self.timers.take_latch() {
            self.refresh_pending = false;
            self.needs_refresh = true;
        }
    }

    fn draw(&mut self, x: Register, y: Register, n: u8) {
        let (x, y) = (self.reg(x) as usize, self.reg(y) as usize);

        let collision = if n == 0 {
            let rows: Vec<u16> = (0..16)
                .map(|row| self.memory.read_word(self.i.wrapping_add(2 * row)))
                .collect();
            self.display.draw_sprite(x, y, &rows, 16)
        } else {
            let rows: Vec<u16> = (0..n as Word)
                .map(|row| self.memory.read_byte(self.i.wrapping_add(row)) as u16)
                .collect();
            self.display.draw_sprite(x, y, &rows, 8)
        };
        self.set_flag(collision);

        if self.draws_paced() {
            // Only a tick after this draw may report it
            self.timers.take_latch();
            self.refresh_pending = true;
        } else {
            self.needs_refresh = true;
        }
    }

    /// Advances a pending key wait: first a key has to go down, then the
    /// same key has to come back up. The buzzer sounds while any key is down.
    fn poll_key(&mut self) {
        let wait = match self.awaiting_key {
            Some(wait) => wait,
            None => return,
        };

        // Nothing can draw while waiting, so a paced draw is shown right away
        if self.refresh_pending {
            self.refresh_pending = false;
            self.needs_refresh = true;
        }

        if self.keypad.state() != 0 {
            self.timers.hold_sound(KEY_TONE);
        }

        match wait.pressed {
            None => {
                if let Some(key) = self.keypad.lowest_pressed() {
                    self.awaiting_key = Some(KeyWait {
                        pressed: Some(key),
                        ..wait
                    });
                }
            }
            Some(key) if !self.keypad.is_pressed(key) => {
                self.set_reg(wait.register, key);
                self.awaiting_key = None;
                self.next();
                debug!("LD {}, K: got key {:X}", wait.register, key);
            }
            Some(_) => {}
        }
    }
}

impl Drop for Chip8 {
    fn drop(&mut self) {
        // Join the timer thread before anything it shares goes away
        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write_opcodes;
    use color_eyre::eyre::Result;

    fn chip() -> Result<Chip8> {
        Chip8::new(Options::testing())
    }

    #[test]
    fn test_initial_state() -> Result<()> {
        let chip = chip()?;

        assert_eq!(chip.pc, 0x200);
        assert_eq!(chip.regs, [0; 16]);
        assert_eq!(chip.memory, Memory::with_glyphs());
        assert!(chip.call_stack().is_empty());
        assert!(!chip.is_halted());

        Ok(())
    }

    #[test]
    fn test_arithmetic() -> Result<()> {
        let mut chip = chip()?;

        chip.execute_opcode(0x6066)?; // LD V0, #66
        chip.execute_opcode(0x700A)?; // ADD V0, #0A
        assert_eq!(chip.regs[0x0], 0x70);
        assert_eq!(chip.regs[0xF], 0);
        chip.execute_opcode(0x70FF)?; // ADD V0, #FF
        assert_eq!(chip.regs[0x0], 0x6F);
        assert_eq!(chip.regs[0xF], 1);
        chip.execute_opcode(0x6110)?; // LD V1, #10
        chip.execute_opcode(0x8011)?; // OR V0, V1
        assert_eq!(chip.regs[0x0], 0x7F);
        chip.execute_opcode(0x62F0)?; // LD V2, #F0
        chip.execute_opcode(0x8022)?; // AND V0, V2
        assert_eq!(chip.regs[0x0], 0x70);
        chip.execute_opcode(0x8023)?; // XOR V0, V2
        assert_eq!(chip.regs[0x0], 0x80);
        chip.execute_opcode(0x8024)?; // ADD V0, V2
        assert_eq!(chip.regs[0x0], 0x70);
        assert_eq!(chip.regs[0xF], 1);
        chip.execute_opcode(0x6170)?; // LD V1, #70
        chip.execute_opcode(0x8014)?; // ADD V0, V1
        assert_eq!(chip.regs[0x0], 0xE0);
        assert_eq!(chip.regs[0xF], 0);
        chip.execute_opcode(0x8015)?; // SUB V0, V1
        assert_eq!(chip.regs[0x0], 0x70);
        assert_eq!(chip.regs[0xF], 1);
        chip.execute_opcode(0x8025)?; // SUB V0, V2
        assert_eq!(chip.regs[0x0], 0x80);
        assert_eq!(chip.regs[0xF], 0);
        chip.execute_opcode(0x6307)?; // LD V3, #07
        chip.execute_opcode(0x8307)?; // SUBN V3, V0
        assert_eq!(chip.regs[0x3], 0x79);
        assert_eq!(chip.regs[0xF], 1);
        chip.execute_opcode(0x8037)?; // SUBN V0, V3
        assert_eq!(chip.regs[0x0], 0xF9);
        assert_eq!(chip.regs[0xF], 0);

        Ok(())
    }

    #[test]
    fn test_subtract_equal_operands_has_no_borrow() -> Result<()> {
        let mut chip = chip()?;

        chip.execute_opcode(0x6042)?; // LD V0, #42
        chip.execute_opcode(0x6142)?; // LD V1, #42
        chip.execute_opcode(0x8015)?; // SUB V0, V1
        assert_eq!(chip.regs[0x0], 0);
        assert_eq!(chip.regs[0xF], 1);

        Ok(())
    }

    #[test]
    fn test_flag_register_as_destination() -> Result<()> {
        let mut chip = chip()?;

        chip.execute_opcode(0x6F80)?; // LD VF, #80
        chip.execute_opcode(0x7FDD)?; // ADD VF, #DD
        assert_eq!(chip.regs[0xF], 1);

        chip.execute_opcode(0x6F10)?; // LD VF, #10
        chip.execute_opcode(0x6020)?; // LD V0, #20
        chip.execute_opcode(0x8F05)?; // SUB VF, V0
        assert_eq!(chip.regs[0xF], 0);

        Ok(())
    }

    #[test]
    fn test_shifts() -> Result<()> {
        let mut chip = chip()?;

        chip.execute_opcode(0x6307)?; // LD V3, #07
        chip.execute_opcode(0x6081)?; // LD V0, #81
        chip.execute_opcode(0x8306)?; // SHR V3, V0
        assert_eq!(chip.regs[0x3], 0x40);
        assert_eq!(chip.regs[0xF], 1);
        assert_eq!(chip.regs[0x0], 0x81);
        chip.execute_opcode(0x830E)?; // SHL V3, V0
        assert_eq!(chip.regs[0x3], 0x02);
        assert_eq!(chip.regs[0xF], 1);

        chip.execute_opcode(0x6040)?; // LD V0, #40
        chip.execute_opcode(0x830E)?; // SHL V3, V0
        assert_eq!(chip.regs[0x3], 0x80);
        assert_eq!(chip.regs[0xF], 0);
        chip.execute_opcode(0x8306)?; // SHR V3, V0
        assert_eq!(chip.regs[0x3], 0x20);
        assert_eq!(chip.regs[0xF], 0);

        Ok(())
    }

    #[test]
    fn test_quirks() -> Result<()> {
        let mut chip = Chip8::new(Options {
            load_quirks: true,
            shift_quirks: true,
            ..Options::testing()
        })?;

        assert!(chip.options().shift_quirks);
        chip.execute_opcode(0x6007)?; // LD V0, #07
        chip.execute_opcode(0x61F0)?; // LD V1, #F0
        chip.execute_opcode(0x8106)?; // SHR V1, V0
        assert_eq!(chip.regs[0x0], 0x07);
        assert_eq!(chip.regs[0x1], 0x78);
        assert_eq!(chip.regs[0xF], 0);
        chip.execute_opcode(0x801E)?; // SHL V0, V1
        assert_eq!(chip.regs[0x1], 0x78);
        assert_eq!(chip.regs[0x0], 0x0E);
        assert_eq!(chip.regs[0xF], 0);

        chip.execute_opcode(0xA600)?; // LD I, #600
        chip.execute_opcode(0xF155)?; // LD [I], V1
        assert_eq!(chip.i, 0x600);
        assert_eq!(chip.memory.read_byte(0x600), 0x0E);
        assert_eq!(chip.memory.read_byte(0x601), 0x78);
        chip.execute_opcode(0xF165)?; // LD V1, [I]
        assert_eq!(chip.i, 0x600);

        Ok(())
    }

    #[test]
    fn test_comparison() -> Result<()> {
        let mut chip = chip()?;

        chip.execute_opcode(0x6045)?; // LD V0, #45
        let pc = chip.pc;
        chip.execute_opcode(0x3045)?; // SE V0, #45
        assert_eq!(chip.pc, pc + 4);
        let pc = chip.pc;
        chip.execute_opcode(0x4045)?; // SNE V0, #45
        assert_eq!(chip.pc, pc + 2);
        chip.execute_opcode(0x6139)?; // LD V1, #39
        let pc = chip.pc;
        chip.execute_opcode(0x5010)?; // SE V0, V1
        assert_eq!(chip.pc, pc + 2);
        let pc = chip.pc;
        chip.execute_opcode(0x9010)?; // SNE V0, V1
        assert_eq!(chip.pc, pc + 4);

        Ok(())
    }

    #[test]
    fn test_jp() -> Result<()> {
        let mut chip = chip()?;

        chip.execute_opcode(0x1400)?; // JP #400
        assert_eq!(chip.pc, 0x400);
        chip.execute_opcode(0x2200)?; // CALL #200
        assert_eq!(chip.pc, 0x200);
        chip.execute_opcode(0x2300)?; // CALL #300
        assert_eq!(chip.pc, 0x300);
        chip.execute_opcode(0x00EE)?; // RET
        assert_eq!(chip.pc, 0x202);
        chip.execute_opcode(0x00EE)?; // RET
        assert_eq!(chip.pc, 0x402);

        chip.execute_opcode(0x6010)?; // LD V0, #10
        chip.execute_opcode(0xB300)?; // JP V0, #300
        assert_eq!(chip.pc, 0x310);

        Ok(())
    }

    #[test]
    fn test_nested_calls_from_memory() -> Result<()> {
        let mut chip = chip()?;
        let mem = &mut chip.memory;
        write_opcodes!(mem : 0x200 => 0x2300, 0x00FD); // CALL #300; EXIT
        write_opcodes!(mem : 0x300 => 0x2400, 0x00EE); // CALL #400; RET
        write_opcodes!(mem : 0x400 => 0x2500, 0x00EE); // CALL #500; RET
        write_opcodes!(mem : 0x500 => 0x00EE); // RET

        for expected in [0x300, 0x400, 0x500] {
            chip.step()?;
            assert_eq!(chip.pc, expected);
        }
        assert_eq!(chip.call_stack(), &[0x202, 0x302, 0x402]);
        for expected in [0x402, 0x302, 0x202] {
            chip.step()?;
            assert_eq!(chip.pc, expected);
        }
        assert!(chip.call_stack().is_empty());

        chip.execute_until_exit()?;
        assert!(chip.is_halted());
        assert_eq!(chip.pc, 0x202);

        Ok(())
    }

    #[test]
    fn test_deep_call_stack() -> Result<()> {
        let mut chip = chip()?;

        for _ in 0..1000 {
            chip.execute_opcode(0x2200)?; // CALL #200
        }
        assert_eq!(chip.call_stack().len(), 1000);

        Ok(())
    }

    #[test]
    fn test_ret_with_empty_stack_halts() -> Result<()> {
        let mut chip = chip()?;

        assert!(chip.execute_opcode(0x00EE).is_err());
        assert!(chip.is_halted());

        Ok(())
    }

    #[test]
    fn test_ld() -> Result<()> {
        let mut chip = chip()?;

        chip.execute_opcode(0x6567)?; // LD V5, #67
        assert_eq!(chip.regs[0x5], 0x67);
        chip.execute_opcode(0x8A50)?; // LD VA, V5
        assert_eq!(chip.regs[0xA], 0x67);
        chip.execute_opcode(0xA600)?; // LD I, #600
        assert_eq!(chip.i, 0x600);
        chip.execute_opcode(0xF515)?; // LD DT, V5
        assert_eq!(chip.delay_timer(), 0x67);
        chip.execute_opcode(0xF007)?; // LD V0, DT
        assert_eq!(chip.regs[0x0], 0x67);
        chip.execute_opcode(0xF018)?; // LD ST, V0
        assert_eq!(chip.sound_timer(), 0x67);
        chip.execute_opcode(0xF533)?; // LD B, V5
        assert_eq!(chip.memory.read_byte(0x600), 1);
        assert_eq!(chip.memory.read_byte(0x601), 0);
        assert_eq!(chip.memory.read_byte(0x602), 3);

        chip.memory.write_array(0x600, &[0x12, 0x34]);
        chip.execute_opcode(0xF165)?; // LD V1, [I]
        assert_eq!(chip.i, 0x602);
        assert_eq!(chip.regs[0x0], 0x12);
        assert_eq!(chip.regs[0x1], 0x34);
        chip.execute_opcode(0xF155)?; // LD [I], V1
        assert_eq!(chip.i, 0x604);
        assert_eq!(chip.memory.read_byte(0x602), 0x12);
        assert_eq!(chip.memory.read_byte(0x603), 0x34);

        chip.execute_opcode(0x6303)?; // LD V3, #03
        chip.execute_opcode(0xF31E)?; // ADD I, V3
        assert_eq!(chip.i, 0x607);

        Ok(())
    }

    #[test]
    fn test_flag_slots() -> Result<()> {
        let mut chip = chip()?;

        chip.rpl[..3].copy_from_slice(&[0x6A, 0x4B, 0xF8]);
        chip.execute_opcode(0xF285)?; // LD V2, R
        assert_eq!(&chip.regs[..4], &[0x6A, 0x4B, 0xF8, 0x00]);

        chip.rpl[..3].copy_from_slice(&[0x50, 0x10, 0x02]);
        chip.execute_opcode(0xF275)?; // LD R, V2
        assert_eq!(&chip.rpl[..4], &[0x6A, 0x4B, 0xF8, 0x00]);

        Ok(())
    }

    #[test]
    fn test_glyph_addresses() -> Result<()> {
        let mut chip = chip()?;

        chip.execute_opcode(0x601A)?; // LD V0, #1A
        chip.execute_opcode(0xF029)?; // LD F, V0
        assert_eq!(chip.i, GLYPH_ADDR + 0xA * GLYPH_HEIGHT);
        assert_eq!(chip.memory.read_byte(chip.i), 0xF0);
        chip.execute_opcode(0xF030)?; // LD HF, V0
        assert_eq!(chip.i, HIGH_GLYPH_ADDR + 0xA * HIGH_GLYPH_HEIGHT);

        Ok(())
    }

    #[test]
    fn test_random_is_masked() -> Result<()> {
        let mut chip = chip()?;

        for _ in 0..32 {
            chip.execute_opcode(0xC00F)?; // RND V0, #0F
            assert_eq!(chip.regs[0x0] & 0xF0, 0);
        }
        chip.execute_opcode(0xC100)?; // RND V1, #00
        assert_eq!(chip.regs[0x1], 0);

        Ok(())
    }

    #[test]
    fn test_display() -> Result<()> {
        let mut chip = chip()?;
        chip.memory.write_array(0xA00, &[0xA5, 0x5A, 0xF0]);

        chip.execute_opcode(0x6001)?; // LD V0, 1
        chip.execute_opcode(0x6102)?; // LD V1, 2
        chip.execute_opcode(0xAA00)?; // LD I, #A00
        chip.execute_opcode(0xD013)?; // DRW V0, V1, 3
        assert_eq!(chip.regs[0xF], 0);
        assert!(chip.take_refresh());
        assert!(chip.display.pixel(1, 2));
        assert!(!chip.display.pixel(2, 2));
        assert!(chip.display.pixel(2, 3));

        chip.execute_opcode(0xD013)?; // DRW V0, V1, 3
        assert_eq!(chip.regs[0xF], 1);
        assert_eq!(chip.display, Display::default());

        // 16x16: two bytes per row
        chip.execute_opcode(0xD010)?; // DRW V0, V1, 0
        assert!(chip.display.pixel(1, 2)); // 0xA5 high half
        assert!(chip.display.pixel(10, 2)); // 0x5A low half
        assert!(chip.display.pixel(1, 3)); // 0xF0
        assert_eq!(chip.regs[0xF], 0);
        chip.execute_opcode(0xD010)?; // DRW V0, V1, 0
        assert_eq!(chip.regs[0xF], 1);
        assert_eq!(chip.display, Display::default());

        Ok(())
    }

    #[test]
    fn test_scroll_and_resolution() -> Result<()> {
        let mut chip = chip()?;
        chip.memory.write_array(0xA00, &[0xFF]);

        chip.execute_opcode(0xAA00)?; // LD I, #A00
        chip.execute_opcode(0xD001)?; // DRW V0, V0, 1
        chip.execute_opcode(0x00FB)?; // SCR
        assert!(!chip.display.pixel(3, 0));
        assert!(chip.display.pixel(4, 0));
        chip.execute_opcode(0x00C2)?; // SCD 2
        assert!(!chip.display.pixel(4, 0));
        assert!(chip.display.pixel(4, 2));
        chip.execute_opcode(0x00FC)?; // SCL
        assert!(chip.display.pixel(0, 2));

        chip.execute_opcode(0x00FF)?; // HIGH
        assert!(chip.display.is_hires());
        assert!(chip.display.pixel(0, 2));
        chip.execute_opcode(0x00FE)?; // LOW
        assert!(!chip.display.is_hires());
        chip.execute_opcode(0x00E0)?; // CLS
        assert_eq!(chip.display, Display::default());

        Ok(())
    }

    #[test]
    fn test_skip_on_keys() -> Result<()> {
        let mut chip = chip()?;
        let keypad = chip.keypad();

        chip.execute_opcode(0x6E07)?; // LD VE, 7
        let pc = chip.pc;
        chip.execute_opcode(0xEE9E)?; // SKP VE
        assert_eq!(chip.pc, pc + 2);
        keypad.press(7);
        let pc = chip.pc;
        chip.execute_opcode(0xEE9E)?; // SKP VE
        assert_eq!(chip.pc, pc + 4);
        let pc = chip.pc;
        chip.execute_opcode(0xEEA1)?; // SKNP VE
        assert_eq!(chip.pc, pc + 2);

        Ok(())
    }

    #[test]
    fn test_key_wait() -> Result<()> {
        let mut chip = chip()?;
        let keypad = chip.keypad();
        let mem = &mut chip.memory;
        write_opcodes!(mem : 0x200 => 0xF30A, 0x00FD); // LD V3, K; EXIT

        chip.step()?;
        assert!(chip.is_awaiting_key());
        for _ in 0..10 {
            chip.step()?;
        }
        assert_eq!(chip.pc, 0x200);

        keypad.press(0xB);
        keypad.press(0xC);
        chip.step()?;
        assert!(chip.is_awaiting_key());
        assert_eq!(chip.pc, 0x200);

        keypad.release(0xC); // not the key that was seen first
        chip.step()?;
        assert!(chip.is_awaiting_key());

        keypad.release(0xB);
        chip.step()?;
        assert!(!chip.is_awaiting_key());
        assert_eq!(chip.regs[0x3], 0xB);
        assert_eq!(chip.pc, 0x202);

        chip.step()?;
        assert!(chip.is_halted());

        Ok(())
    }

    #[test]
    fn test_key_wait_sounds_buzzer() -> Result<()> {
        let mut chip = chip()?;
        let keypad = chip.keypad();

        chip.execute_opcode(0xF00A)?; // LD V0, K
        chip.step()?;
        assert_eq!(chip.sound_timer(), 0);

        keypad.press(0x4);
        chip.step()?;
        assert_eq!(chip.sound_timer(), KEY_TONE);

        // A longer tone set by the program is not cut short
        chip.timers().set_sound(30);
        chip.step()?;
        assert_eq!(chip.sound_timer(), 30);

        keypad.release(0x4);
        chip.step()?;
        assert!(!chip.is_awaiting_key());
        assert_eq!(chip.regs[0x0], 0x4);

        Ok(())
    }

    #[test]
    fn test_key_wait_keeps_timer_tick() -> Result<()> {
        let mut chip = Chip8::new(Options {
            timer_freq: 1,
            ..Options::default()
        })?;

        chip.execute_opcode(0xF00A)?; // LD V0, K
        chip.timers().tick();
        for _ in 0..5 {
            chip.step()?;
        }
        assert!(chip.is_awaiting_key());
        assert!(chip.timers().take_latch());

        Ok(())
    }

    #[test]
    fn test_invalid_opcode_halts() -> Result<()> {
        let mut chip = chip()?;
        chip.load_bytes(&[0x60, 0x01, 0xFF, 0xFF, 0x60, 0x02])?;

        chip.step()?;
        let err = chip.step().unwrap_err();
        assert!(err.to_string().contains("0xFFFF"));
        assert!(chip.is_halted());
        assert_eq!(chip.invalid_opcode(), Some(0xFFFF));
        assert_eq!(chip.pc, 0x202);

        chip.step()?;
        assert_eq!(chip.regs[0x0], 0x01);
        assert_eq!(chip.pc, 0x202);

        Ok(())
    }

    #[test]
    fn test_load() -> Result<()> {
        let mut chip = chip()?;

        assert!(chip.load_bytes(&vec![0x12; PROG_SIZE + 1]).is_err());
        assert_eq!(chip.memory, Memory::with_glyphs());

        let mut file: &[u8] = &[0x00, 0xE0, 0x12, 0x00];
        chip.load_file(&mut file)?;
        assert_eq!(chip.current_instruction(), Instruction::Cls);

        let big = vec![0u8; PROG_SIZE + 10];
        assert!(chip.load_file(&mut big.as_slice()).is_err());

        Ok(())
    }

    #[test]
    fn test_exit() -> Result<()> {
        let mut chip = chip()?;
        chip.load_bytes(&[0x00, 0xFD])?;

        chip.execute_until_exit()?;
        assert!(chip.is_halted());
        assert!(chip.invalid_opcode().is_none());

        Ok(())
    }

    #[test]
    fn test_timer_thread_runs_with_interpreter() -> Result<()> {
        let mut chip = Chip8::new(Options {
            timer_freq: 500,
            delay_draws: false,
            ..Options::default()
        })?;

        chip.execute_opcode(0x6005)?; // LD V0, 5
        chip.execute_opcode(0xF015)?; // LD DT, V0
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while chip.delay_timer() != 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(chip.delay_timer(), 0);

        Ok(())
    }

    #[test]
    fn test_zero_timer_frequency_rejected() -> Result<()> {
        let options = Options {
            timer_freq: 0,
            ..Options::default()
        };
        assert!(Chip8::new(options).is_err());

        Ok(())
    }

    #[test]
    fn test_delayed_draws() -> Result<()> {
        // 1 Hz leaves the test in control of every tick that matters
        let mut chip = Chip8::new(Options {
            timer_freq: 1,
            ..Options::default()
        })?;
        let mem = &mut chip.memory;
        write_opcodes!(mem : 0x200 => 0xD001, 0xD001); // DRW V0, V0, 1 (twice)

        chip.step()?;
        assert_eq!(chip.pc, 0x202);
        assert!(!chip.needs_refresh());

        chip.step()?;
        assert_eq!(chip.pc, 0x202); // held back until a tick

        chip.timers().tick();
        chip.step()?;
        assert!(chip.take_refresh());
        assert_eq!(chip.pc, 0x204);
        assert!(!chip.needs_refresh());

        Ok(())
    }

    #[test]
    fn test_low_resolution_scroll_waits_for_tick() -> Result<()> {
        let mut chip = Chip8::new(Options {
            timer_freq: 1,
            ..Options::default()
        })?;
        chip.display.draw_sprite(0, 0, &[0x80], 8);
        let mem = &mut chip.memory;
        write_opcodes!(mem : 0x200 => 0x00C1, 0x00FF, 0x00C1); // SCD 1; HIGH; SCD 1

        chip.step()?;
        assert_eq!(chip.pc, 0x200);
        assert!(chip.display.pixel(0, 0));

        chip.timers().tick();
        chip.step()?;
        assert_eq!(chip.pc, 0x202);
        assert!(chip.display.pixel(0, 1));

        // High resolution scrolls right away
        chip.step()?;
        chip.step()?;
        assert_eq!(chip.pc, 0x206);
        assert!(chip.display.pixel(0, 2));

        Ok(())
    }
}
