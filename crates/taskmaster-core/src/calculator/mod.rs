//! Scientific calculator state: an expression being typed, the last result
//! and the angle mode trig functions use.

pub mod expr;

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::debug;

pub const ERROR_MARKER: &str = "Error";
pub const NAN_MARKER: &str = "NaN";

const MAX_BINARY_FRACTION_DIGITS: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AngleMode {
    #[default]
    Degrees,
    Radians,
}

impl AngleMode {
    pub fn toggled(self) -> Self {
        match self {
            AngleMode::Degrees => AngleMode::Radians,
            AngleMode::Radians => AngleMode::Degrees,
        }
    }
}

impl fmt::Display for AngleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AngleMode::Degrees => f.write_str("DEG"),
            AngleMode::Radians => f.write_str("RAD"),
        }
    }
}

impl FromStr for AngleMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deg" | "degree" | "degrees" => Ok(AngleMode::Degrees),
            "rad" | "radian" | "radians" => Ok(AngleMode::Radians),
            other => Err(anyhow!("invalid angle mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calculator {
    expression: String,
    result: String,
    angle_mode: AngleMode,
}

impl Calculator {
    pub fn new(angle_mode: AngleMode) -> Self {
        Self {
            angle_mode,
            ..Self::default()
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn result(&self) -> &str {
        &self.result
    }

    pub fn angle_mode(&self) -> AngleMode {
        self.angle_mode
    }

    pub fn append(&mut self, input: &str) {
        self.expression.push_str(input);
    }

    pub fn clear(&mut self) {
        self.expression.clear();
        self.result.clear();
    }

    /// Removes the last character of the expression, if any.
    pub fn delete(&mut self) {
        self.expression.pop();
    }

    pub fn toggle_angle_mode(&mut self) -> AngleMode {
        self.angle_mode = self.angle_mode.toggled();
        self.angle_mode
    }

    /// Evaluates the expression into `result`; any failure leaves
    /// [`ERROR_MARKER`] there instead.
    #[tracing::instrument(skip(self), fields(expression = %self.expression, mode = %self.angle_mode))]
    pub fn evaluate(&mut self) -> &str {
        self.result = match expr::evaluate(&self.expression, self.angle_mode) {
            Ok(value) => format_number(value),
            Err(err) => {
                debug!(error = %err, "evaluation failed");
                ERROR_MARKER.to_string()
            }
        };
        &self.result
    }

    /// Rewrites the current value (the result, else the expression) in
    /// base 2.
    pub fn to_binary(&mut self) -> &str {
        let source = self.current_value();
        self.result = source
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(decimal_to_binary)
            .unwrap_or_else(|| NAN_MARKER.to_string());
        &self.result
    }

    /// Reads the current value (the result, else the expression) as base 2
    /// and rewrites it in base 10.
    pub fn from_binary(&mut self) -> &str {
        let source = self.current_value();
        self.result = binary_to_decimal(&source)
            .map(format_number)
            .unwrap_or_else(|| NAN_MARKER.to_string());
        &self.result
    }

    fn current_value(&self) -> String {
        if self.result.is_empty() {
            self.expression.clone()
        } else {
            self.result.clone()
        }
    }
}

/// Integers print without a fractional part; everything else uses the
/// shortest text that reads back to the same value.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{value}")
}

pub fn decimal_to_binary(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }

    let magnitude = value.abs();
    let whole = magnitude.trunc();
    if whole >= u128::MAX as f64 {
        return None;
    }

    let mut out = String::new();
    if value < 0.0 && magnitude != 0.0 {
        out.push('-');
    }
    out.push_str(&format!("{:b}", whole as u128));

    let mut frac = magnitude - whole;
    if frac > 0.0 {
        out.push('.');
        for _ in 0..MAX_BINARY_FRACTION_DIGITS {
            frac *= 2.0;
            if frac >= 1.0 {
                out.push('1');
                frac -= 1.0;
            } else {
                out.push('0');
            }
            if frac == 0.0 {
                break;
            }
        }
        while out.ends_with('0') {
            out.pop();
        }
        if out.ends_with('.') {
            out.pop();
        }
    }

    Some(out)
}

pub fn binary_to_decimal(raw: &str) -> Option<f64> {
    let text = raw.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let (whole, frac) = match digits.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (digits, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }

    let mut value = 0.0_f64;
    for ch in whole.chars() {
        value = value * 2.0 + f64::from(bit(ch)?);
    }
    let mut scale = 0.5_f64;
    for ch in frac.chars() {
        value += f64::from(bit(ch)?) * scale;
        scale /= 2.0;
    }

    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

fn bit(ch: char) -> Option<u8> {
    match ch {
        '0' => Some(0),
        '1' => Some(1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{AngleMode, Calculator, ERROR_MARKER, NAN_MARKER, binary_to_decimal, decimal_to_binary};

    #[test]
    fn editing_the_expression() {
        let mut calc = Calculator::default();
        calc.append("12");
        calc.append("+3");
        calc.delete();
        assert_eq!(calc.expression(), "12+");
        calc.append("4");
        assert_eq!(calc.evaluate(), "16");

        calc.clear();
        assert_eq!(calc.expression(), "");
        assert_eq!(calc.result(), "");

        calc.delete();
        assert_eq!(calc.expression(), "");
    }

    #[test]
    fn failures_set_the_error_marker() {
        let mut calc = Calculator::default();
        calc.append("2 +* 3");
        assert_eq!(calc.evaluate(), ERROR_MARKER);
        calc.clear();
        calc.append("alert(1)");
        assert_eq!(calc.evaluate(), ERROR_MARKER);
        calc.clear();
        calc.append(&"(".repeat(10_000));
        assert_eq!(calc.evaluate(), ERROR_MARKER);
    }

    #[test]
    fn toggling_angle_mode_changes_trig_results() {
        let mut calc = Calculator::new(AngleMode::Degrees);
        calc.append("cos(0) + sin(90)");
        assert_eq!(calc.evaluate(), "2");

        assert_eq!(calc.toggle_angle_mode(), AngleMode::Radians);
        calc.clear();
        calc.append("sin(pi/2)");
        assert_eq!(calc.evaluate(), "1");
        assert_eq!("rad".parse::<AngleMode>().expect("rad"), AngleMode::Radians);
    }

    #[test]
    fn decimal_results_print_shortest_form() {
        let mut calc = Calculator::default();
        calc.append("0.1 + 0.2");
        assert_eq!(calc.evaluate(), "0.30000000000000004");
        calc.clear();
        calc.append("-sin(180)");
        assert_eq!(calc.evaluate(), "0");
    }

    #[test]
    fn binary_conversion_of_results() {
        let mut calc = Calculator::default();
        calc.append("5 * 2");
        calc.evaluate();
        assert_eq!(calc.to_binary(), "1010");
        assert_eq!(calc.from_binary(), "10");

        let mut calc = Calculator::default();
        calc.append("101.1");
        assert_eq!(calc.from_binary(), "5.5");

        let mut calc = Calculator::default();
        calc.append("1 / 0");
        calc.evaluate();
        assert_eq!(calc.to_binary(), NAN_MARKER);

        let mut calc = Calculator::default();
        calc.append("12");
        assert_eq!(calc.to_binary(), "1100");
        assert_eq!(calc.from_binary(), "12");
    }

    #[test]
    fn binary_helpers_handle_signs_and_fractions() {
        assert_eq!(decimal_to_binary(-6.25).as_deref(), Some("-110.01"));
        assert_eq!(decimal_to_binary(0.0).as_deref(), Some("0"));
        assert_eq!(decimal_to_binary(f64::NAN), None);
        assert_eq!(binary_to_decimal("-110.01"), Some(-6.25));
        assert_eq!(binary_to_decimal(".1"), Some(0.5));
        assert_eq!(binary_to_decimal("102"), None);
        assert_eq!(binary_to_decimal(""), None);
        assert_eq!(binary_to_decimal("-"), None);
    }
}
