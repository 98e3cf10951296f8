//! Arithmetic expression evaluator for the calculator.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! sum     := product (('+' | '-') product)*
//! product := unary (('*' | '/' | '%') unary | implicit unary)*
//! unary   := ('-' | '+') unary | power
//! power   := postfix ('^' unary)?
//! postfix := primary '!'*
//! primary := number | name | name '(' sum ')' | '(' sum ')'
//! ```
//!
//! `implicit` is juxtaposition such as `2pi` or `3(1+2)`.

use std::f64::consts::{E, PI};

use anyhow::{anyhow, bail};
use tracing::trace;

use super::AngleMode;

const MAX_FACTORIAL: f64 = 170.0;
const SNAP_SCALE: f64 = 1e12;
const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

/// Evaluates `input`, treating trig arguments and results per `mode`.
pub fn evaluate(input: &str, mode: AngleMode) -> anyhow::Result<f64> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        bail!("empty expression");
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        mode,
    };
    let value = parser.parse_sum()?;
    parser.ensure_end()?;

    if !value.is_finite() {
        bail!("result is not a finite number");
    }
    trace!(input, value, "evaluated expression");
    Ok(value)
}

fn lex(input: &str) -> anyhow::Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            c if c.is_whitespace() => {
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent only when digits follow, so `2e` stays 2 * e.
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| anyhow!("invalid number: {text}"))?;
                out.push(Token::Num(value));
            }
            c if c.is_alphabetic() => {
                let start = i;
                while i < chars.len() && chars[i].is_alphanumeric() {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                if name == "π" {
                    out.push(Token::Ident("pi".to_string()));
                } else {
                    out.push(Token::Ident(name.to_lowercase()));
                }
            }
            '+' | '-' | '*' | '/' | '%' | '^' | '!' => {
                out.push(Token::Op(ch));
                i += 1;
            }
            '×' => {
                out.push(Token::Op('*'));
                i += 1;
            }
            '÷' => {
                out.push(Token::Op('/'));
                i += 1;
            }
            '(' => {
                out.push(Token::LParen);
                i += 1;
            }
            ')' => {
                out.push(Token::RParen);
                i += 1;
            }
            other => bail!("unexpected character: {other}"),
        }
    }

    Ok(out)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    mode: AngleMode,
}

impl Parser {
    fn parse_sum(&mut self) -> anyhow::Result<f64> {
        let mut value = self.parse_product()?;
        loop {
            if self.match_op('+') {
                value += self.parse_product()?;
            } else if self.match_op('-') {
                value -= self.parse_product()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn parse_product(&mut self) -> anyhow::Result<f64> {
        let mut value = self.parse_unary()?;
        loop {
            if self.match_op('*') {
                value *= self.parse_unary()?;
            } else if self.match_op('/') {
                let rhs = self.parse_unary()?;
                if rhs == 0.0 {
                    bail!("division by zero");
                }
                value /= rhs;
            } else if self.match_op('%') {
                let rhs = self.parse_unary()?;
                if rhs == 0.0 {
                    bail!("modulo by zero");
                }
                value %= rhs;
            } else if self.peek_starts_operand() {
                value *= self.parse_unary()?;
            } else {
                return Ok(value);
            }
        }
    }

    // Every nested group, call argument, exponent and sign passes through
    // here, so this is where recursion depth is bounded.
    fn parse_unary(&mut self) -> anyhow::Result<f64> {
        if self.depth >= MAX_DEPTH {
            bail!("expression nested too deeply");
        }
        self.depth += 1;
        let value = if self.match_op('-') {
            self.parse_unary().map(|v| -v)
        } else if self.match_op('+') {
            self.parse_unary()
        } else {
            self.parse_power()
        };
        self.depth -= 1;
        value
    }

    fn parse_power(&mut self) -> anyhow::Result<f64> {
        let base = self.parse_postfix()?;
        if self.match_op('^') {
            let exponent = self.parse_unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> anyhow::Result<f64> {
        let mut value = self.parse_primary()?;
        while self.match_op('!') {
            value = factorial(value)?;
        }
        Ok(value)
    }

    fn parse_primary(&mut self) -> anyhow::Result<f64> {
        let token = self
            .next_token()
            .ok_or_else(|| anyhow!("unexpected end of expression"))?;

        match token {
            Token::Num(value) => Ok(value),
            Token::LParen => {
                let inner = self.parse_sum()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let arg = self.parse_sum()?;
                    self.expect_rparen()?;
                    self.apply_function(&name, arg)
                } else {
                    constant(&name)
                }
            }
            Token::RParen => bail!("unexpected ')'"),
            Token::Op(op) => bail!("unexpected operator '{op}'"),
        }
    }

    fn apply_function(&self, name: &str, arg: f64) -> anyhow::Result<f64> {
        let value = match name {
            "sin" => snap(self.to_radians(arg).sin()),
            "cos" => snap(self.to_radians(arg).cos()),
            "tan" => {
                let radians = self.to_radians(arg);
                if snap(radians.cos()) == 0.0 {
                    bail!("tan undefined at {arg}");
                }
                snap(radians.tan())
            }
            "asin" => self.from_radians(checked_unit(name, arg)?.asin()),
            "acos" => self.from_radians(checked_unit(name, arg)?.acos()),
            "atan" => self.from_radians(arg.atan()),
            "sqrt" => {
                if arg < 0.0 {
                    bail!("sqrt of negative number");
                }
                arg.sqrt()
            }
            "log" => checked_positive(name, arg)?.log10(),
            "ln" => checked_positive(name, arg)?.ln(),
            "exp" => arg.exp(),
            "abs" => arg.abs(),
            other => bail!("unknown function: {other}"),
        };
        Ok(value)
    }

    fn to_radians(&self, value: f64) -> f64 {
        match self.mode {
            AngleMode::Degrees => value.to_radians(),
            AngleMode::Radians => value,
        }
    }

    fn from_radians(&self, value: f64) -> f64 {
        match self.mode {
            AngleMode::Degrees => snap(value.to_degrees()),
            AngleMode::Radians => value,
        }
    }

    fn ensure_end(&self) -> anyhow::Result<()> {
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some(Token::RParen) => bail!("unbalanced ')'"),
            Some(tok) => bail!("unexpected token: {tok:?}"),
        }
    }

    fn expect_rparen(&mut self) -> anyhow::Result<()> {
        match self.next_token() {
            Some(Token::RParen) => Ok(()),
            _ => bail!("expected ')'"),
        }
    }

    fn match_op(&mut self, op: char) -> bool {
        if self.peek() == Some(&Token::Op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek_starts_operand(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Num(_)) | Some(Token::Ident(_)) | Some(Token::LParen)
        )
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next_token(&mut self) -> Option<Token> {
        let out = self.tokens.get(self.pos).cloned();
        if out.is_some() {
            self.pos += 1;
        }
        out
    }
}

fn constant(name: &str) -> anyhow::Result<f64> {
    match name {
        "pi" => Ok(PI),
        "e" => Ok(E),
        other => bail!("unknown name: {other}"),
    }
}

fn factorial(n: f64) -> anyhow::Result<f64> {
    if n < 0.0 || n.fract() != 0.0 {
        bail!("factorial needs a non-negative integer, got {n}");
    }
    if n > MAX_FACTORIAL {
        bail!("factorial overflow for {n}");
    }
    Ok((2..=n as u32).fold(1.0, |acc, k| acc * f64::from(k)))
}

fn checked_unit(name: &str, arg: f64) -> anyhow::Result<f64> {
    if (-1.0..=1.0).contains(&arg) {
        Ok(arg)
    } else {
        Err(anyhow!("{name} argument out of range: {arg}"))
    }
}

fn checked_positive(name: &str, arg: f64) -> anyhow::Result<f64> {
    if arg > 0.0 {
        Ok(arg)
    } else {
        Err(anyhow!("{name} needs a positive argument, got {arg}"))
    }
}

// Trig on converted degrees leaves residue like 1.2e-16 or
// 0.5000000000000001; round it away at twelve decimals.
fn snap(value: f64) -> f64 {
    let rounded = (value * SNAP_SCALE).round() / SNAP_SCALE;
    if rounded.is_finite() { rounded } else { value }
}

#[cfg(test)]
mod tests {
    use super::evaluate;
    use crate::calculator::AngleMode;

    fn deg(input: &str) -> f64 {
        evaluate(input, AngleMode::Degrees).expect(input)
    }

    fn rad(input: &str) -> f64 {
        evaluate(input, AngleMode::Radians).expect(input)
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(deg("1 + 2 * 3"), 7.0);
        assert_eq!(deg("(1 + 2) * 3"), 9.0);
        assert_eq!(deg("2 ^ 3 ^ 2"), 512.0);
        assert_eq!(deg("-2 ^ 2"), -4.0);
        assert_eq!(deg("2 ^ -1"), 0.5);
        assert_eq!(deg("10 - 4 - 3"), 3.0);
        assert_eq!(deg("7 % 4"), 3.0);
        assert_eq!(deg("6 ÷ 3 × 2"), 4.0);
    }

    #[test]
    fn constants_functions_and_implicit_multiplication() {
        assert_eq!(deg("2pi"), 2.0 * std::f64::consts::PI);
        assert_eq!(deg("3(1 + 2)"), 9.0);
        assert_eq!(deg("sqrt(16) + ln(e)"), 5.0);
        assert!((deg("log(1000)") - 3.0).abs() < 1e-12);
        assert_eq!(deg("abs(-3)"), 3.0);
        assert_eq!(deg("π"), std::f64::consts::PI);
        assert_eq!(deg("1e3"), 1000.0);
        assert_eq!(deg("2e"), 2.0 * std::f64::consts::E);
    }

    #[test]
    fn trig_respects_angle_mode() {
        assert_eq!(deg("sin(90)"), 1.0);
        assert_eq!(deg("sin(180)"), 0.0);
        assert_eq!(deg("cos(60)"), 0.5);
        assert_eq!(deg("asin(1)"), 90.0);
        assert_eq!(rad("cos(0)"), 1.0);
        assert_eq!(rad("sin(pi)"), 0.0);
        assert!(evaluate("tan(90)", AngleMode::Degrees).is_err());
    }

    #[test]
    fn factorial_is_postfix_on_integers() {
        assert_eq!(deg("5!"), 120.0);
        assert_eq!(deg("0!"), 1.0);
        assert_eq!(deg("3!!"), 720.0);
        assert_eq!(deg("2 * 3!"), 12.0);
        assert!(evaluate("2.5!", AngleMode::Degrees).is_err());
        assert!(evaluate("171!", AngleMode::Degrees).is_err());
    }

    #[test]
    fn malformed_input_is_an_error() {
        for bad in ["", "1 +", "(1", "1)", "foo", "bar(2)", "1 / 0", "sqrt(-1)", "2 $ 3", "1..2", "ln(0)"] {
            assert!(evaluate(bad, AngleMode::Degrees).is_err(), "{bad:?} should fail");
        }

        let parens = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(evaluate(&parens, AngleMode::Degrees).is_err());
        let signs = format!("{}1", "-".repeat(100_000));
        assert!(evaluate(&signs, AngleMode::Degrees).is_err());
        let calls = format!("{}0{}", "abs(".repeat(100_000), ")".repeat(100_000));
        assert!(evaluate(&calls, AngleMode::Degrees).is_err());
        let powers = vec!["1"; 100_000].join("^");
        assert!(evaluate(&powers, AngleMode::Degrees).is_err());
    }

    #[test]
    fn moderate_nesting_still_evaluates() {
        let parens = format!("{}2{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(deg(&parens), 2.0);
        assert_eq!(deg("--2"), 2.0);
        assert_eq!(deg("abs(abs(-(3)))"), 3.0);
    }
}
