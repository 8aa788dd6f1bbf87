use std::collections::HashMap;
use std::str::FromStr;

use crate::instruction::Immediate;
use crate::memory::{Byte, Word};
use crate::{PROG_SIZE, PROG_START};

use super::expr::Expr;
use super::{Assembler, ParseError, ParseErrorKind, Pending};

/// Machine code ready to be loaded at [`PROG_START`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    bytes: Vec<Byte>,
}

impl Program {
    /// The address the first byte is loaded at.
    pub fn start(&self) -> Word {
        PROG_START as Word
    }

    pub fn as_bytes(&self) -> &[Byte] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<Byte> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The big endian word at the absolute address `addr`, if the program
    /// covers both of its bytes.
    pub fn opcode_at(&self, addr: Word) -> Option<Word> {
        let offset = (addr as usize).checked_sub(PROG_START)?;
        match self.bytes.get(offset..offset + 2)? {
            [hi, lo] => Some((*hi as Word) << 8 | *lo as Word),
            _ => None,
        }
    }
}

impl AsRef<[Byte]> for Program {
    fn as_ref(&self) -> &[Byte] {
        &self.bytes
    }
}

impl FromStr for Program {
    type Err = Vec<ParseError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Assembler::assemble(s)
    }
}

fn align(offset: usize) -> usize {
    offset + (offset & 1)
}

fn eval(expr: &Expr, symbols: &HashMap<String, Word>, line_nr: usize) -> Result<Word, ParseError> {
    expr.eval(symbols).map_err(|err| ParseError::from_expr(err, line_nr))
}

impl Assembler {
    /// Lays out everything recorded so far and resolves all symbols.
    ///
    /// The first pass assigns addresses, padding instructions, words and
    /// labels to even addresses. Constants that had to wait for labels are
    /// resolved next, repeatedly in source order until none makes progress,
    /// so they may refer to each other in any order. The second pass evaluates every
    /// operand and writes the bytes.
    ///
    /// # Errors
    ///
    /// All errors are collected; any error invalidates the whole program.
    pub fn emit(&self) -> Result<Program, Vec<ParseError>> {
        let mut errors = Vec::new();

        for frame in &self.frames {
            errors.push(ParseError::new(
                ParseErrorKind::UnterminatedConditional,
                "missing `ENDIF`",
                frame.line_nr,
            ));
        }

        // Pass 1
        let mut symbols = self.symbols.clone();
        let mut offsets = Vec::with_capacity(self.pending.len());
        let mut offset = 0;
        for (_, pending) in &self.pending {
            let (start, size) = match pending {
                Pending::Label(name) => {
                    let start = align(offset);
                    symbols.insert(name.clone(), (PROG_START + start) as Word);
                    (start, 0)
                }
                Pending::Assign(..) => (offset, 0),
                Pending::Bytes(exprs) => (offset, exprs.len()),
                Pending::Words(exprs) => (align(offset), 2 * exprs.len()),
                Pending::Instruction(..) => (align(offset), 2),
            };
            offsets.push(start);
            offset = start + size;
        }

        if offset > PROG_SIZE {
            let line_nr = self.pending.last().map_or(0, |(line_nr, _)| *line_nr);
            errors.push(ParseError::new(
                ParseErrorKind::ProgramTooLarge,
                format!("program needs {} bytes, {} are available", offset, PROG_SIZE),
                line_nr,
            ));
        }

        // Constants may refer to constants further down, so keep going
        // until a round resolves nothing new
        let mut deferred: Vec<_> = self
            .pending
            .iter()
            .filter_map(|(line_nr, pending)| match pending {
                Pending::Assign(name, expr) => Some((*line_nr, name, expr)),
                _ => None,
            })
            .collect();
        loop {
            let before = deferred.len();
            deferred.retain(|&(line_nr, name, expr)| match expr.eval(&symbols) {
                Ok(value) => {
                    log::debug!("[{}] Constant `{}` = 0x{:04X}", line_nr, name, value);
                    symbols.insert(name.clone(), value);
                    false
                }
                Err(_) => true,
            });
            if deferred.is_empty() || deferred.len() == before {
                break;
            }
        }
        for (line_nr, _, expr) in deferred {
            if let Err(err) = eval(expr, &symbols, line_nr) {
                errors.push(err);
            }
        }

        // Pass 2
        let mut bytes = vec![0; offset];
        for ((line_nr, pending), &start) in self.pending.iter().zip(&offsets) {
            let line_nr = *line_nr;
            let res = match pending {
                Pending::Label(_) | Pending::Assign(..) => Ok(()),
                Pending::Bytes(exprs) => {
                    let write = |(idx, expr): (usize, &Expr)| -> Result<(), ParseError> {
                        let value = eval(expr, &symbols, line_nr)?;
                        let byte = Immediate::Byte
                            .fit(value)
                            .ok_or_else(|| out_of_range(value, "a byte", line_nr))?;
                        bytes[start + idx] = byte as Byte;
                        Ok(())
                    };
                    exprs.iter().enumerate().try_for_each(write)
                }
                Pending::Words(exprs) => {
                    let write = |(idx, expr): (usize, &Expr)| -> Result<(), ParseError> {
                        let [hi, lo] = eval(expr, &symbols, line_nr)?.to_be_bytes();
                        bytes[start + 2 * idx] = hi;
                        bytes[start + 2 * idx + 1] = lo;
                        Ok(())
                    };
                    exprs.iter().enumerate().try_for_each(write)
                }
                Pending::Instruction(instruction, imm) => {
                    let instruction = match imm {
                        Some(expr) => eval(expr, &symbols, line_nr).and_then(|value| {
                            instruction
                                .with_immediate(value)
                                .ok_or_else(|| out_of_range(value, &format!("`{}`", instruction), line_nr))
                        }),
                        None => Ok(*instruction),
                    };
                    instruction.map(|instruction| {
                        let [hi, lo] = instruction.opcode().to_be_bytes();
                        bytes[start] = hi;
                        bytes[start + 1] = lo;
                    })
                }
            };
            if let Err(err) = res {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            log::info!("Assembled {} bytes", bytes.len());
            Ok(Program { bytes })
        } else {
            for err in &errors {
                log::error!("{}", err);
            }
            Err(errors)
        }
    }
}

fn out_of_range(value: Word, target: &str, line_nr: usize) -> ParseError {
    ParseError::new(
        ParseErrorKind::ImmediateOutOfRange,
        format!("0x{:04X} does not fit {}", value, target),
        line_nr,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Chip8;
    use crate::Options;
    use color_eyre::eyre::{eyre, Result};

    fn assemble(source: &str) -> Result<Program> {
        Assembler::assemble(source).map_err(|errors| eyre!("failed to assemble: {:?}", errors))
    }

    fn errors(source: &str) -> Vec<ParseErrorKind> {
        Assembler::assemble(source)
            .unwrap_err()
            .iter()
            .map(ParseError::kind)
            .collect()
    }

    #[test]
    fn test_alignment() -> Result<()> {
        let program = assemble("DW #1234\nDB 1\nDW #5678")?;
        assert_eq!(program.as_bytes(), &[0x12, 0x34, 0x01, 0x00, 0x56, 0x78]);

        let program = assemble("DB 1, 2, 3\nafter:\nDW after")?;
        assert_eq!(program.as_bytes(), &[1, 2, 3, 0, 0x02, 0x04]);

        let program = assemble("DB 1\nCLS")?;
        assert_eq!(program.as_bytes(), &[1, 0, 0x00, 0xE0]);

        let program = assemble("DB 1\nDB 2")?;
        assert_eq!(program.as_bytes(), &[1, 2]);

        Ok(())
    }

    #[test]
    fn test_forward_references() -> Result<()> {
        let program = assemble(
            "
            start:  CALL sub
                    JP end
            sub:    LD V0, VALUE
                    RET
            VALUE = end - start
            end:    EXIT
            ",
        )?;

        assert_eq!(program.opcode_at(0x200), Some(0x2204));
        assert_eq!(program.opcode_at(0x202), Some(0x1208));
        assert_eq!(program.opcode_at(0x204), Some(0x6008));
        assert_eq!(program.opcode_at(0x206), Some(0x00EE));
        assert_eq!(program.opcode_at(0x208), Some(0x00FD));
        assert_eq!(program.opcode_at(0x20A), None);

        Ok(())
    }

    #[test]
    fn test_constants_refer_to_later_constants() -> Result<()> {
        let program = assemble(
            "
                    LD I, A
            A = B + 2
            B = lbl
            lbl:    CLS
            ",
        )?;

        assert_eq!(program.opcode_at(0x200), Some(0xA204));
        assert_eq!(program.opcode_at(0x202), Some(0x00E0));

        // A cycle never resolves; each side is reported once
        let found: Vec<_> = Assembler::assemble("A = B\nB = A\nCLS")
            .unwrap_err()
            .iter()
            .map(|err| (err.line_nr(), err.kind()))
            .collect();
        assert_eq!(
            found,
            vec![(1, ParseErrorKind::UndefinedSymbol), (2, ParseErrorKind::UndefinedSymbol)]
        );

        Ok(())
    }

    #[test]
    fn test_emission_errors_are_global() -> Result<()> {
        let mut asm = Assembler::default();
        asm.process_line("CLS", 1)?;
        asm.process_line("JP nowhere", 2)?;
        asm.process_line("LD V0, #100", 3)?;
        asm.process_line("DRW V0, V1, 16", 4)?;
        asm.process_line("DB 256", 5)?;
        asm.process_line("LATER = missing", 6)?;

        let errors = asm.emit().unwrap_err();
        let found: Vec<_> = errors.iter().map(|err| (err.line_nr(), err.kind())).collect();
        assert_eq!(
            found,
            vec![
                (6, ParseErrorKind::UndefinedSymbol),
                (2, ParseErrorKind::UndefinedSymbol),
                (3, ParseErrorKind::ImmediateOutOfRange),
                (4, ParseErrorKind::ImmediateOutOfRange),
                (5, ParseErrorKind::ImmediateOutOfRange),
            ]
        );

        Ok(())
    }

    #[test]
    fn test_negative_bytes() -> Result<()> {
        let program = assemble("ADD V0, -1\nDB -128")?;
        assert_eq!(program.as_bytes(), &[0x70, 0xFF, 0x80]);
        assert_eq!(errors("DB -129"), vec![ParseErrorKind::ImmediateOutOfRange]);

        Ok(())
    }

    #[test]
    fn test_program_too_large() -> Result<()> {
        let source = "DW 0\n".repeat(PROG_SIZE / 2 + 1);
        assert_eq!(errors(&source), vec![ParseErrorKind::ProgramTooLarge]);

        let source = "DW 0\n".repeat(PROG_SIZE / 2);
        assert_eq!(assemble(&source)?.len(), PROG_SIZE);

        Ok(())
    }

    #[test]
    fn test_from_str() -> Result<()> {
        let program: Program = "LD V0, 1\nEXIT"
            .parse()
            .map_err(|errors| eyre!("failed to assemble: {:?}", errors))?;
        assert_eq!(program.start(), 0x200);
        assert_eq!(program.into_bytes(), vec![0x60, 0x01, 0x00, 0xFD]);
        assert!("LD V0,".parse::<Program>().is_err());

        Ok(())
    }

    #[test]
    fn test_disassembly_reassembles() -> Result<()> {
        let opcodes: [Word; 12] = [
            0x00C3, 0x1ABC, 0x2123, 0x3A7F, 0x8AB6, 0x8AB7, 0xB321, 0xD12F, 0xE5A1, 0xF30A, 0xF630,
            0xF785,
        ];

        for opcode in opcodes {
            let source = crate::Instruction::decode(opcode).to_string();
            let program = assemble(&source)?;
            assert_eq!(program.opcode_at(0x200), Some(opcode), "reassembling `{}`", source);
        }

        // Invalid opcodes come back as data
        let program = assemble(&crate::Instruction::decode(0xFFFF).to_string())?;
        assert_eq!(program.as_bytes(), &[0xFF, 0xFF]);

        Ok(())
    }

    #[test]
    fn test_nested_calls_run() -> Result<()> {
        let program = assemble(
            "
                    CALL first
                    EXIT
            first:  CALL second
                    RET
            second: CALL third
                    RET
            third:  LD V0, 42
                    RET
            ",
        )?;

        let mut chip = Chip8::new(Options::testing())?;
        chip.load_bytes(program.as_bytes())?;
        chip.execute_until_exit()?;

        assert_eq!(chip.regs[0], 42);
        assert!(chip.call_stack().is_empty());
        assert_eq!(chip.pc, 0x202);

        Ok(())
    }
}
