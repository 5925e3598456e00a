//! Dilution expressions
//!
//! A dilution is typed as text, usually a power of ten such as `10^-3`. The grammar accepted
//! here is deliberately tiny:
//!
//! ```text
//! expression := sign? literal ('^' expression)?
//! literal    := digits ('.' digits?)? (('e' | 'E') sign? digits)?
//!             | '.' digits (('e' | 'E') sign? digits)?
//! sign       := '+' | '-'
//! ```
//!
//! `^` is right associative and a leading sign applies after exponentiation, so `-10^2` is
//! `-100`. Nothing else is recognised: identifiers, brackets and every other operator are
//! rejected before any arithmetic happens.
//!
//! # Examples
//!
//! ```
//! use bench_assay::dilution::evaluate;
//!
//! approx::assert_relative_eq!(evaluate("10^-3").unwrap(), 1e-3);
//! approx::assert_relative_eq!(evaluate("1e-3").unwrap(), 1e-3);
//! assert!(evaluate("__import__('os')").is_err());
//! ```
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::ParseError;

/// A dilution as entered, together with the factor it evaluates to
#[derive(Clone, Debug, PartialEq)]
pub struct Dilution {
    expression: String,
    factor: f64,
}

impl Dilution {
    /// Parse and evaluate a dilution expression
    ///
    /// # Errors
    /// Returns a [`ParseError`] if the text is outside the grammar or the factor is not
    /// strictly positive and finite.
    pub fn parse(expression: &str) -> Result<Self, ParseError> {
        let factor = evaluate(expression)?;
        Ok(Self {
            expression: expression.trim().to_owned(),
            factor,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub const fn factor(&self) -> f64 {
        self.factor
    }
}

impl fmt::Display for Dilution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

/// Evaluate a dilution expression to its numeric factor
///
/// # Errors
/// Returns a [`ParseError`] if the text is outside the grammar, or if the factor is zero,
/// negative or not finite.
pub fn evaluate(expression: &str) -> Result<f64, ParseError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut parser = Parser {
        tokens: &tokens,
        cursor: 0,
        end: expression.len(),
    };
    let value = parser.expression()?;
    if let Some(token) = parser.peek() {
        return Err(ParseError::TrailingInput {
            position: token.position,
        });
    }

    if !value.is_finite() {
        return Err(ParseError::NonFinite);
    }
    if value <= 0.0 {
        return Err(ParseError::NonPositive { value });
    }
    log::debug!("dilution {expression:?} evaluated to {value}");
    Ok(value)
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Kind {
    Number(f64),
    Plus,
    Minus,
    Caret,
}

#[derive(Clone, Copy, Debug)]
struct Token {
    kind: Kind,
    position: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        let kind = match c {
            c if c.is_ascii_whitespace() => {
                chars.next();
                continue;
            }
            '+' => Kind::Plus,
            '-' => Kind::Minus,
            '^' => Kind::Caret,
            '0'..='9' | '.' => {
                tokens.push(Token {
                    kind: Kind::Number(literal(input, &mut chars)?),
                    position,
                });
                continue;
            }
            found => return Err(ParseError::UnexpectedChar { found, position }),
        };
        chars.next();
        tokens.push(Token { kind, position });
    }

    Ok(tokens)
}

/// Consume one numeric literal, including an optional exponent part
fn literal(input: &str, chars: &mut Peekable<CharIndices<'_>>) -> Result<f64, ParseError> {
    let start = chars.peek().map_or(input.len(), |&(i, _)| i);
    let mut end = start;
    let mut mantissa_digits = 0usize;
    let mut seen_point = false;

    while let Some(&(i, c)) = chars.peek() {
        match c {
            '0'..='9' => mantissa_digits += 1,
            '.' if !seen_point => seen_point = true,
            _ => break,
        }
        end = i + c.len_utf8();
        chars.next();
    }

    if let Some(&(i, 'e' | 'E')) = chars.peek() {
        chars.next();
        end = i + 1;
        if let Some(&(i, '+' | '-')) = chars.peek() {
            chars.next();
            end = i + 1;
        }
        let mut exponent_digits = 0usize;
        while let Some(&(i, c @ '0'..='9')) = chars.peek() {
            exponent_digits += 1;
            end = i + c.len_utf8();
            chars.next();
        }
        if exponent_digits == 0 {
            return Err(ParseError::MalformedNumber {
                text: input[start..end].to_owned(),
                position: start,
            });
        }
    }

    let text = &input[start..end];
    if mantissa_digits == 0 {
        return Err(ParseError::MalformedNumber {
            text: text.to_owned(),
            position: start,
        });
    }
    text.parse::<f64>()
        .map_err(|_| ParseError::MalformedNumber {
            text: text.to_owned(),
            position: start,
        })
}

struct Parser<'a> {
    tokens: &'a [Token],
    cursor: usize,
    end: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.cursor).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    /// `sign? number` with the sign reported separately
    fn operand(&mut self) -> Result<(bool, f64), ParseError> {
        let negate = match self.peek().map(|token| token.kind) {
            Some(Kind::Minus) => {
                self.bump();
                true
            }
            Some(Kind::Plus) => {
                self.bump();
                false
            }
            _ => false,
        };

        match self.bump() {
            Some(Token {
                kind: Kind::Number(value),
                ..
            }) => Ok((negate, value)),
            Some(token) => Err(ParseError::ExpectedNumber {
                position: token.position,
            }),
            None => Err(ParseError::ExpectedNumber { position: self.end }),
        }
    }

    /// A `^` chain, folded from the right without recursion
    fn expression(&mut self) -> Result<f64, ParseError> {
        let mut operands = vec![self.operand()?];
        while matches!(self.peek(), Some(Token { kind: Kind::Caret, .. })) {
            self.bump();
            operands.push(self.operand()?);
        }

        let signed = |negate: bool, value: f64| if negate { -value } else { value };
        let mut operands = operands.into_iter().rev();
        let (negate, last) = operands.next().ok_or(ParseError::Empty)?;
        Ok(operands.fold(signed(negate, last), |exponent, (negate, base)| {
            signed(negate, base.powf(exponent))
        }))
    }
}
