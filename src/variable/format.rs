use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Presentation format of a scalar value.
///
/// `Natural` passes the backend rendering through untouched. The numeric
/// formats re-render the value when it parses as an integer and fall back to
/// the backend rendering otherwise (strings, floats, aggregates summaries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    #[default]
    Natural,
    Decimal,
    Hexadecimal,
    Binary,
    Octal,
}

impl ValueFormat {
    pub fn render(self, natural: &str) -> String {
        if self == ValueFormat::Natural {
            return natural.to_string();
        }
        let Some(v) = parse_int(natural) else {
            return natural.to_string();
        };
        match self {
            ValueFormat::Natural => unreachable!(),
            ValueFormat::Decimal => format!("{v}"),
            ValueFormat::Hexadecimal => format!("{v:#x}"),
            ValueFormat::Binary => format!("{v:#b}"),
            ValueFormat::Octal => format!("{v:#o}"),
        }
    }
}

fn parse_int(raw: &str) -> Option<i128> {
    let raw = raw.trim();
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let v = if let Some(hex) = digits.strip_prefix("0x") {
        i128::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = digits.strip_prefix("0b") {
        i128::from_str_radix(bin, 2).ok()?
    } else if let Some(oct) = digits.strip_prefix("0o") {
        i128::from_str_radix(oct, 8).ok()?
    } else {
        digits.parse().ok()?
    };
    Some(if negative { -v } else { v })
}
