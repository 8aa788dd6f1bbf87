//! Assembler for the Chip-8 / Super-Chip mnemonic dialect.
//!
//! ```text
//! ; draws the digit in V0 and exits
//! DIGIT = 7
//!
//! start:  LD V0, DIGIT
//!         LD F, V0
//!         DRW V1, V1, 5
//!         EXIT
//! ```
//!
//! Lines are fed one at a time with [`Assembler::process_line`]; a failing
//! line leaves the assembler untouched. [`Assembler::emit`] then lays out
//! the program and resolves every symbol.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::error;
use std::fmt;

use crate::instruction::{Address, Instruction, Register};
use crate::memory::Word;

mod emit;
pub mod expr;

pub use emit::Program;
use expr::{is_identifier, Expr, ExprError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnknownMnemonic,
    InvalidOperands,
    EmptyOperand,
    InvalidLabel,
    InvalidExpression,
    UndefinedSymbol,
    DivisionByZero,
    DuplicateSymbol,
    UnmatchedConditional,
    UnterminatedConditional,
    ImmediateOutOfRange,
    ProgramTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::UnknownMnemonic => f.write_str("unknown mnemonic"),
            ParseErrorKind::InvalidOperands => f.write_str("invalid operands"),
            ParseErrorKind::EmptyOperand => f.write_str("empty operand"),
            ParseErrorKind::InvalidLabel => f.write_str("invalid label"),
            ParseErrorKind::InvalidExpression => f.write_str("invalid expression"),
            ParseErrorKind::UndefinedSymbol => f.write_str("undefined symbol"),
            ParseErrorKind::DivisionByZero => f.write_str("division by zero"),
            ParseErrorKind::DuplicateSymbol => f.write_str("symbol defined twice"),
            ParseErrorKind::UnmatchedConditional => f.write_str("no open conditional"),
            ParseErrorKind::UnterminatedConditional => f.write_str("conditional is never closed"),
            ParseErrorKind::ImmediateOutOfRange => f.write_str("immediate out of range"),
            ParseErrorKind::ProgramTooLarge => f.write_str("program does not fit in memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    kind: ParseErrorKind,
    context: Option<Cow<'static, str>>,
    line_nr: usize,
}

impl ParseError {
    fn new<C, S>(kind: ParseErrorKind, context: C, line_nr: usize) -> Self
    where
        C: Into<Option<S>>,
        S: Into<Cow<'static, str>>,
    {
        Self {
            kind,
            context: context.into().map(|inner| inner.into()),
            line_nr,
        }
    }

    fn from_expr(err: ExprError, line_nr: usize) -> Self {
        let kind = match err {
            ExprError::Syntax(_) => ParseErrorKind::InvalidExpression,
            ExprError::Undefined(_) => ParseErrorKind::UndefinedSymbol,
            ExprError::DivisionByZero => ParseErrorKind::DivisionByZero,
        };
        Self::new(kind, err.to_string(), line_nr)
    }

    pub fn kind(&self) -> ParseErrorKind {
        self.kind
    }

    pub fn line_nr(&self) -> usize {
        self.line_nr
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "error [ln: {}]: {} - {}", self.line_nr, self.kind, context)
        } else {
            write!(f, "error [ln: {}]: {}", self.line_nr, self.kind)
        }
    }
}

impl error::Error for ParseError {}

pub type Result<T, E = ParseError> = std::result::Result<T, E>;

macro_rules! mnemonics {
    ( $( $( #[doc = $doc:expr] )* $name:ident , )+ ) => {
        /// Every word that may start a statement
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Mnemonic {
            $(
                $( #[doc = $doc] )*
                $name,
            )+
        }

        impl Mnemonic {
            pub const ALL: &'static [Self] = &[
                $( Self::$name , )+
            ];

            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name) , )+
                }
            }
        }

        impl ::std::fmt::Display for Mnemonic {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.name())
            }
        }
    }
}

mnemonics! {
    /// Clear the display
    CLS,
    /// Return from a subroutine
    RET,
    /// Scroll down `n` pixels
    SCD,
    /// Scroll right 4 pixels
    SCR,
    /// Scroll left 4 pixels
    SCL,
    /// Stop the interpreter
    EXIT,
    /// Switch to 64x32
    LOW,
    /// Switch to 128x64
    HIGH,
    /// Jump, optionally offset by `V0`
    JP,
    /// Call a subroutine
    CALL,
    /// Skip if equal
    SE,
    /// Skip if not equal
    SNE,
    /// The many load forms
    LD,
    /// Add to a register or to `I`
    ADD,
    OR,
    AND,
    XOR,
    SUB,
    SHR,
    SUBN,
    SHL,
    /// Random byte masked by an immediate
    RND,
    /// Draw a sprite
    DRW,
    /// Skip if key pressed
    SKP,
    /// Skip if key not pressed
    SKNP,
    /// Raw bytes
    DB,
    /// Raw big endian words
    DW,
    /// Set a conditional-assembly flag
    DEFINE,
    /// Assemble up to `ELSE`/`ENDIF` only if the flag is set
    IFDEF,
    /// Assemble up to `ELSE`/`ENDIF` only if the flag is not set
    IFNDEF,
    ELSE,
    ENDIF,
}

impl Mnemonic {
    /// Looks up a mnemonic, ignoring case.
    pub fn find(word: &str) -> Option<Self> {
        Mnemonic::ALL
            .iter()
            .find(|mnemonic| word.eq_ignore_ascii_case(mnemonic.name()))
            .copied()
    }
}

/// A single operand as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Reg(Register),
    I,
    DerefI,
    Dt,
    St,
    K,
    F,
    Hf,
    B,
    R,
    Expr(Expr),
}

impl Operand {
    fn parse(token: &str, line_nr: usize) -> Result<Self> {
        if let Ok(register) = token.parse::<Register>() {
            return Ok(Operand::Reg(register));
        }

        Ok(match token.to_ascii_uppercase().as_str() {
            "I" => Operand::I,
            "[I]" => Operand::DerefI,
            "DT" => Operand::Dt,
            "ST" => Operand::St,
            "K" => Operand::K,
            "F" => Operand::F,
            "HF" => Operand::Hf,
            "B" => Operand::B,
            "R" => Operand::R,
            _ => {
                let expr = Expr::parse(token).map_err(|err| ParseError::from_expr(err, line_nr))?;
                Operand::Expr(expr)
            }
        })
    }
}

/// A parsed statement, before it is applied to the assembler state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    Define(String),
    If { flag: String, negated: bool },
    Else,
    EndIf,
    Assign(String, Expr),
    Bytes(Vec<Expr>),
    Words(Vec<Expr>),
    Instruction(Instruction, Option<Expr>),
}

/// What ends up in the program, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Label(String),
    /// A constant whose value depends on something not bound yet
    Assign(String, Expr),
    Bytes(Vec<Expr>),
    Words(Vec<Expr>),
    Instruction(Instruction, Option<Expr>),
}

/// One nested `IFDEF`/`IFNDEF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    active: bool,
    /// A branch of this frame has been taken
    fired: bool,
    line_nr: usize,
}

/// Collects statements line by line; see the [module docs](self).
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    /// Constants with a known value
    symbols: HashMap<String, Word>,
    /// Every label and constant name seen so far
    names: HashSet<String>,
    flags: HashSet<String>,
    frames: Vec<Frame>,
    pending: Vec<(usize, Pending)>,
}

impl Assembler {
    /// Assembles a whole source text.
    ///
    /// # Errors
    ///
    /// All per-line errors are collected and returned together. If every
    /// line is fine, errors found while emitting are returned instead.
    pub fn assemble(source: &str) -> Result<Program, Vec<ParseError>> {
        let mut assembler = Self::default();
        let mut errors = Vec::new();

        for (idx, line) in source.lines().enumerate() {
            if let Err(err) = assembler.process_line(line, idx + 1) {
                log::error!("{}", err);
                errors.push(err);
            }
        }

        if errors.is_empty() {
            assembler.emit()
        } else {
            Err(errors)
        }
    }

    /// Evaluates `expr` against the constants known so far.
    pub fn eval(&self, expr: &str, line_nr: usize) -> Result<Word> {
        Expr::parse(expr)
            .and_then(|expr| expr.eval(&self.symbols))
            .map_err(|err| ParseError::from_expr(err, line_nr))
    }

    /// Parses one source line and records it.
    ///
    /// Lines inside an inactive conditional branch are checked but have no
    /// effect.
    ///
    /// # Errors
    ///
    /// On error nothing is recorded and the assembler can keep going.
    pub fn process_line(&mut self, line: &str, line_nr: usize) -> Result<()> {
        let line = line.split(';').next().unwrap_or_default().trim();
        if line.is_empty() {
            return Ok(());
        }

        let (label, rest) = split_label(line, line_nr)?;
        let statement = if rest.is_empty() {
            None
        } else {
            Some(parse_statement(rest, line_nr)?)
        };

        self.apply(label, statement, line_nr)
    }

    fn is_active(&self) -> bool {
        self.frames.last().map_or(true, |frame| frame.active)
    }

    fn check_unique(&self, name: &str, line_nr: usize) -> Result<()> {
        if self.names.contains(name) {
            Err(ParseError::new(
                ParseErrorKind::DuplicateSymbol,
                format!("`{}` is already defined", name),
                line_nr,
            ))
        } else {
            Ok(())
        }
    }

    /// Applies a parsed line. Everything that can fail is checked before
    /// the first change.
    fn apply(&mut self, label: Option<&str>, statement: Option<Statement>, line_nr: usize) -> Result<()> {
        let active = self.is_active();

        if active {
            if let Some(label) = label {
                self.check_unique(label, line_nr)?;
            }
        }

        // Constants are resolved right away where possible
        let mut constant = None;
        match &statement {
            Some(Statement::Assign(name, expr)) if active => {
                self.check_unique(name, line_nr)?;
                if label == Some(name.as_str()) {
                    return Err(ParseError::new(
                        ParseErrorKind::DuplicateSymbol,
                        format!("`{}` is already defined", name),
                        line_nr,
                    ));
                }
                constant = match expr.eval(&self.symbols) {
                    Ok(value) => Some(value),
                    Err(ExprError::Undefined(_)) => None,
                    Err(err) => return Err(ParseError::from_expr(err, line_nr)),
                };
            }
            Some(Statement::Else) | Some(Statement::EndIf) if self.frames.is_empty() => {
                return Err(ParseError::new(
                    ParseErrorKind::UnmatchedConditional,
                    "`ELSE`/`ENDIF` without `IFDEF`/`IFNDEF`",
                    line_nr,
                ));
            }
            _ => {}
        }

        if active {
            if let Some(label) = label {
                log::debug!("[{}] Found label `{}`", line_nr, label);
                self.names.insert(label.to_owned());
                self.pending.push((line_nr, Pending::Label(label.to_owned())));
            }
        }

        let statement = match statement {
            Some(statement) => statement,
            None => return Ok(()),
        };

        match statement {
            Statement::If { flag, negated } => {
                let taken = self.flags.contains(&flag) != negated;
                self.frames.push(Frame {
                    active: active && taken,
                    fired: taken,
                    line_nr,
                });
            }
            Statement::Else => {
                let parent = self.frames.len() < 2 || self.frames[self.frames.len() - 2].active;
                if let Some(frame) = self.frames.last_mut() {
                    frame.active = parent && !frame.fired;
                    frame.fired = true;
                }
            }
            Statement::EndIf => {
                self.frames.pop();
            }
            _ if !active => {
                log::debug!("[{}] Skipped, conditional branch not taken", line_nr);
            }
            Statement::Define(flag) => {
                log::debug!("[{}] Defined flag `{}`", line_nr, flag);
                self.flags.insert(flag);
            }
            Statement::Assign(name, expr) => {
                self.names.insert(name.clone());
                match constant {
                    Some(value) => {
                        log::debug!("[{}] Constant `{}` = 0x{:04X}", line_nr, name, value);
                        self.symbols.insert(name, value);
                    }
                    None => {
                        log::debug!("[{}] Constant `{}` deferred", line_nr, name);
                        self.pending.push((line_nr, Pending::Assign(name, expr)));
                    }
                }
            }
            Statement::Bytes(exprs) => self.pending.push((line_nr, Pending::Bytes(exprs))),
            Statement::Words(exprs) => self.pending.push((line_nr, Pending::Words(exprs))),
            Statement::Instruction(instruction, imm) => {
                log::debug!("[{}] Found instruction {}", line_nr, instruction);
                self.pending.push((line_nr, Pending::Instruction(instruction, imm)));
            }
        }

        Ok(())
    }
}

/// Splits off a leading `name:`.
fn split_label(line: &str, line_nr: usize) -> Result<(Option<&str>, &str)> {
    match line.split_once(':') {
        Some((label, rest)) => {
            let label = label.trim();
            if !is_identifier(label) {
                return Err(ParseError::new(
                    ParseErrorKind::InvalidLabel,
                    format!("`{}` is not a valid name", label),
                    line_nr,
                ));
            }
            Ok((Some(label), rest.trim()))
        }
        None => Ok((None, line)),
    }
}

fn parse_statement(line: &str, line_nr: usize) -> Result<Statement> {
    if let Some((name, expr)) = line.split_once('=') {
        let name = name.trim();
        if is_identifier(name) {
            let expr = Expr::parse(expr).map_err(|err| ParseError::from_expr(err, line_nr))?;
            return Ok(Statement::Assign(name.to_owned(), expr));
        }
    }

    let (word, operands) = match line.find(|c: char| c.is_whitespace() || c == ',') {
        Some(idx) => line.split_at(idx),
        None => (line, ""),
    };

    let mnemonic = Mnemonic::find(word).ok_or_else(|| {
        ParseError::new(
            ParseErrorKind::UnknownMnemonic,
            format!("no mnemonic named `{}`", word),
            line_nr,
        )
    })?;

    let operands = split_operands(operands, line_nr)?;

    match mnemonic {
        Mnemonic::DEFINE => Ok(Statement::Define(flag_operand(mnemonic, &operands, line_nr)?)),
        Mnemonic::IFDEF | Mnemonic::IFNDEF => Ok(Statement::If {
            flag: flag_operand(mnemonic, &operands, line_nr)?,
            negated: mnemonic == Mnemonic::IFNDEF,
        }),
        Mnemonic::ELSE | Mnemonic::ENDIF => {
            if !operands.is_empty() {
                return Err(operand_error(mnemonic, line_nr));
            }
            Ok(if mnemonic == Mnemonic::ELSE {
                Statement::Else
            } else {
                Statement::EndIf
            })
        }
        Mnemonic::DB | Mnemonic::DW => {
            let exprs = data_operands(mnemonic, &operands, line_nr)?;
            Ok(if mnemonic == Mnemonic::DB {
                Statement::Bytes(exprs)
            } else {
                Statement::Words(exprs)
            })
        }
        _ => {
            let operands = operands
                .iter()
                .map(|token| Operand::parse(token, line_nr))
                .collect::<Result<Vec<_>>>()?;
            let (instruction, imm) =
                instruction(mnemonic, operands).ok_or_else(|| operand_error(mnemonic, line_nr))?;
            Ok(Statement::Instruction(instruction, imm))
        }
    }
}

/// Splits the text after a mnemonic at commas. Every operand must be
/// non-empty.
fn split_operands(text: &str, line_nr: usize) -> Result<Vec<&str>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let operands: Vec<&str> = text.split(',').map(str::trim).collect();
    if operands.iter().any(|operand| operand.is_empty()) {
        return Err(ParseError::new(
            ParseErrorKind::EmptyOperand,
            "stray `,` in operand list",
            line_nr,
        ));
    }
    Ok(operands)
}

fn operand_error(mnemonic: Mnemonic, line_nr: usize) -> ParseError {
    ParseError::new(
        ParseErrorKind::InvalidOperands,
        format!("wrong number or kind of operands for `{}`", mnemonic),
        line_nr,
    )
}

fn flag_operand(mnemonic: Mnemonic, operands: &[&str], line_nr: usize) -> Result<String> {
    match operands {
        [flag] if is_identifier(flag) => Ok((*flag).to_owned()),
        _ => Err(operand_error(mnemonic, line_nr)),
    }
}

fn data_operands(mnemonic: Mnemonic, operands: &[&str], line_nr: usize) -> Result<Vec<Expr>> {
    if operands.is_empty() {
        return Err(operand_error(mnemonic, line_nr));
    }
    operands
        .iter()
        .map(|token| Expr::parse(token).map_err(|err| ParseError::from_expr(err, line_nr)))
        .collect()
}

/// Picks the instruction form matching the operands. The immediate, if
/// any, is filled in when the program is emitted.
fn instruction(mnemonic: Mnemonic, mut operands: Vec<Operand>) -> Option<(Instruction, Option<Expr>)> {
    use Instruction::*;
    use Mnemonic::*;
    use Operand::{Reg, B, DerefI, Dt, Hf, St, F, I, K, R};

    let addr = Address::default();
    // Only ever one expression per instruction, and always the last operand
    let imm = match operands.pop() {
        Some(Operand::Expr(expr)) => Some(expr),
        Some(other) => {
            operands.push(other);
            None
        }
        None => None,
    };

    let instruction = match (mnemonic, operands.as_slice(), imm.is_some()) {
        (CLS, [], false) => Cls,
        (RET, [], false) => Ret,
        (SCD, [], true) => Scd(0),
        (SCR, [], false) => Scr,
        (SCL, [], false) => Scl,
        (EXIT, [], false) => Exit,
        (LOW, [], false) => Low,
        (HIGH, [], false) => High,
        (JP, [], true) => Jp(addr),
        (JP, [Reg(Register::V0)], true) => JpV0(addr),
        (CALL, [], true) => Call(addr),
        (SE, [Reg(x)], true) => SeByte(*x, 0),
        (SE, [Reg(x), Reg(y)], false) => SeReg(*x, *y),
        (SNE, [Reg(x)], true) => SneByte(*x, 0),
        (SNE, [Reg(x), Reg(y)], false) => SneReg(*x, *y),
        (LD, [Reg(x)], true) => LdByte(*x, 0),
        (LD, [Reg(x), Reg(y)], false) => LdReg(*x, *y),
        (LD, [I], true) => LdI(addr),
        (LD, [Reg(x), Dt], false) => LdRegDt(*x),
        (LD, [Reg(x), K], false) => LdKey(*x),
        (LD, [Dt, Reg(x)], false) => LdDtReg(*x),
        (LD, [St, Reg(x)], false) => LdSt(*x),
        (LD, [F, Reg(x)], false) => LdF(*x),
        (LD, [Hf, Reg(x)], false) => LdHf(*x),
        (LD, [B, Reg(x)], false) => LdB(*x),
        (LD, [DerefI, Reg(x)], false) => LdDerefIReg(*x),
        (LD, [Reg(x), DerefI], false) => LdRegDerefI(*x),
        (LD, [R, Reg(x)], false) => LdRReg(*x),
        (LD, [Reg(x), R], false) => LdRegR(*x),
        (ADD, [Reg(x)], true) => AddByte(*x, 0),
        (ADD, [Reg(x), Reg(y)], false) => AddReg(*x, *y),
        (ADD, [I, Reg(x)], false) => AddI(*x),
        (OR, [Reg(x), Reg(y)], false) => Or(*x, *y),
        (AND, [Reg(x), Reg(y)], false) => And(*x, *y),
        (XOR, [Reg(x), Reg(y)], false) => Xor(*x, *y),
        (SUB, [Reg(x), Reg(y)], false) => Sub(*x, *y),
        (SUBN, [Reg(x), Reg(y)], false) => Subn(*x, *y),
        (SHR, [Reg(x)], false) => Shr(*x, *x),
        (SHR, [Reg(x), Reg(y)], false) => Shr(*x, *y),
        (SHL, [Reg(x)], false) => Shl(*x, *x),
        (SHL, [Reg(x), Reg(y)], false) => Shl(*x, *y),
        (RND, [Reg(x)], true) => Rnd(*x, 0),
        (DRW, [Reg(x), Reg(y)], true) => Drw(*x, *y, 0),
        (SKP, [Reg(x)], false) => Skp(*x),
        (SKNP, [Reg(x)], false) => Sknp(*x),
        _ => return None,
    };

    Some((instruction, imm))
}
