//! Constant expressions used as operands.
//!
//! Values are 16 bits wide and all arithmetic wraps. From loosest to
//! tightest binding:
//!
//! | operators   | meaning                     |
//! |-------------|-----------------------------|
//! | `\|`        | bitwise or                  |
//! | `^`         | bitwise xor                 |
//! | `&`         | bitwise and                 |
//! | `>` `<`     | shift right, shift left     |
//! | `+` `-`     | add, subtract               |
//! | `*` `/` `%` | multiply, divide, remainder |
//! | `~` `-`     | unary not, unary negate     |
//!
//! Literals are decimal (`42`), hexadecimal (`#2A`) or binary (`$101010`,
//! where `.` may stand in for `0`). Identifiers refer to labels and
//! constants.

use std::collections::HashMap;
use std::error;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::memory::Word;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// The text is not a well-formed expression
    Syntax(String),
    /// An identifier has no value (yet)
    Undefined(String),
    DivisionByZero,
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::Syntax(reason) => f.write_str(reason),
            ExprError::Undefined(name) => write!(f, "`{}` is not defined", name),
            ExprError::DivisionByZero => f.write_str("division by zero"),
        }
    }
}

impl error::Error for ExprError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    Xor,
    And,
    Shr,
    Shl,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            '|' => BinaryOp::Or,
            '^' => BinaryOp::Xor,
            '&' => BinaryOp::And,
            '>' => BinaryOp::Shr,
            '<' => BinaryOp::Shl,
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '*' => BinaryOp::Mul,
            '/' => BinaryOp::Div,
            '%' => BinaryOp::Rem,
            _ => return None,
        })
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 0,
            BinaryOp::Xor => 1,
            BinaryOp::And => 2,
            BinaryOp::Shr | BinaryOp::Shl => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 5,
        }
    }

    fn apply(self, lhs: Word, rhs: Word) -> Result<Word, ExprError> {
        Ok(match self {
            BinaryOp::Or => lhs | rhs,
            BinaryOp::Xor => lhs ^ rhs,
            BinaryOp::And => lhs & rhs,
            BinaryOp::Shr => lhs.checked_shr(rhs as u32).unwrap_or(0),
            BinaryOp::Shl => lhs.checked_shl(rhs as u32).unwrap_or(0),
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::Div => lhs.checked_div(rhs).ok_or(ExprError::DivisionByZero)?,
            BinaryOp::Rem => lhs.checked_rem(rhs).ok_or(ExprError::DivisionByZero)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A parsed expression, evaluated later against a symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(Word),
    Symbol(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parses `src` as a whole; trailing input is an error.
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        let mut parser = ExprParser {
            src,
            chars: src.char_indices().peekable(),
        };
        let expr = parser.parse_binary(0)?;
        parser.skip_whitespace();
        match parser.chars.next() {
            None => Ok(expr),
            Some((pos, c)) => Err(ExprError::Syntax(format!("unexpected `{}` at column {}", c, pos + 1))),
        }
    }

    pub fn eval(&self, symbols: &HashMap<String, Word>) -> Result<Word, ExprError> {
        match self {
            Expr::Number(value) => Ok(*value),
            Expr::Symbol(name) => symbols
                .get(name)
                .copied()
                .ok_or_else(|| ExprError::Undefined(name.clone())),
            Expr::Unary(UnaryOp::Not, inner) => Ok(!inner.eval(symbols)?),
            Expr::Unary(UnaryOp::Neg, inner) => Ok(inner.eval(symbols)?.wrapping_neg()),
            Expr::Binary(op, lhs, rhs) => op.apply(lhs.eval(symbols)?, rhs.eval(symbols)?),
        }
    }
}

/// Whether `s` is usable as a label, constant or flag name.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct ExprParser<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> ExprParser<'a> {
    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.peek().map(|&(_, c)| c)
    }

    /// Precedence climbing; every binary operator is left-associative.
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;

        while let Some(op) = self.peek().and_then(BinaryOp::from_char) {
            if op.precedence() < min_precedence {
                break;
            }
            self.chars.next();
            let rhs = self.parse_binary(op.precedence() + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek() {
            Some('~') => UnaryOp::Not,
            Some('-') => UnaryOp::Neg,
            _ => return self.parse_primary(),
        };
        self.chars.next();
        Ok(Expr::Unary(op, Box::new(self.parse_unary()?)))
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some('(') => {
                self.chars.next();
                let inner = self.parse_binary(0)?;
                match self.peek() {
                    Some(')') => {
                        self.chars.next();
                        Ok(inner)
                    }
                    _ => Err(ExprError::Syntax("unbalanced parentheses".into())),
                }
            }
            Some('#') => {
                self.chars.next();
                let digits = self.take_while(|c| c.is_ascii_alphanumeric());
                number(digits, 16)
            }
            Some('$') => {
                self.chars.next();
                let digits = self.take_while(|c| c.is_ascii_alphanumeric() || c == '.');
                number(&digits.replace('.', "0"), 2)
            }
            Some(c) if c.is_ascii_digit() => {
                let digits = self.take_while(|c| c.is_ascii_alphanumeric());
                number(digits, 10)
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                Ok(Expr::Symbol(name.to_owned()))
            }
            Some(c) => Err(ExprError::Syntax(format!("expected a value, found `{}`", c))),
            None => Err(ExprError::Syntax("expected a value".into())),
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.chars.peek().map_or(self.src.len(), |&(pos, _)| pos);
        let mut end = start;
        while let Some(&(pos, c)) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            end = pos + c.len_utf8();
            self.chars.next();
        }
        &self.src[start..end]
    }
}

fn number(digits: &str, radix: u32) -> Result<Expr, ExprError> {
    if digits.is_empty() {
        return Err(ExprError::Syntax(format!("missing digits in base {} literal", radix)));
    }
    Word::from_str_radix(digits, radix)
        .map(Expr::Number)
        .map_err(|_| ExprError::Syntax(format!("`{}` is not a 16-bit base {} number", digits, radix)))
}
