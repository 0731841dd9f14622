//! Line classifier and tokenizer for the six slip notations.
//!
//! Each line is matched against the grammars below in order; the first
//! structural match wins. The parser only recognizes shape and extracts
//! raw codes and the amount — expansion and table validation happen in
//! [`crate::calc`].

use crate::lookup::TypeBucket;
use crate::model::{EntryKind, LineErrorKind};
use once_cell::sync::Lazy;
use regex::Regex;

/// Raw tokenized line before expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawLine {
    Pana { codes: Vec<String>, amount: i64 },
    Type { key: u8, bucket: TypeBucket, amount: i64 },
    Time { digits: Vec<u8>, amount: i64 },
    Jodi { pairs: Vec<String>, amount: i64 },
    Multi { code: String, amount: i64 },
    Family { reference: u16, amount: i64 },
}

impl RawLine {
    pub fn kind(&self) -> EntryKind {
        match self {
            RawLine::Pana { .. } => EntryKind::Pana,
            RawLine::Type { .. } => EntryKind::Type,
            RawLine::Time { .. } => EntryKind::Time,
            RawLine::Jodi { .. } => EntryKind::Jodi,
            RawLine::Multi { .. } => EntryKind::Multi,
            RawLine::Family { .. } => EntryKind::Family,
        }
    }
}

/// Failure local to one line, before it is tagged with its line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFailure {
    pub kind: LineErrorKind,
    pub message: String,
}

impl LineFailure {
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: LineErrorKind::Parse,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: LineErrorKind::Validation,
            message: message.into(),
        }
    }
}

static PANA_MULTI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{3}(?:\s*/\s*\d{3})+)\s*=\s*(.*)$").unwrap());
static PANA_SINGLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{3})\s*=\s*(.*)$").unwrap());
static TYPE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d{1,2})\s*(SP|DP|CP)\s*=\s*(.*)$").unwrap());
static TIME_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d(?:[\s,]+\d)*)\s*=\s*(.*)$").unwrap());
static JODI_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2}(?:\s*[-:]\s*\d{2})+)\s*=\s*(.*)$").unwrap());
static MULTI_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(\d{2})\s*[x*]\s*(.*)$").unwrap());
static FAMILY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d{3})\s*family\s*=\s*(.*)$").unwrap());

/// Classify and tokenize a single line.
pub fn parse_line(line: &str) -> Result<RawLine, LineFailure> {
    let line = normalize_line(line);
    if line.is_empty() {
        return Err(LineFailure::parse("empty line"));
    }

    if let Some(caps) = PANA_MULTI.captures(&line) {
        let codes = digit_groups(&caps[1]);
        let amount = parse_amount(&caps[2])?;
        return Ok(RawLine::Pana { codes, amount });
    }
    if let Some(caps) = PANA_SINGLE.captures(&line) {
        let amount = parse_amount(&caps[2])?;
        return Ok(RawLine::Pana {
            codes: vec![caps[1].to_string()],
            amount,
        });
    }
    if let Some(caps) = TYPE_LINE.captures(&line) {
        let key: u8 = caps[1]
            .parse()
            .map_err(|_| LineFailure::parse("type key is not a number"))?;
        let bucket = TypeBucket::parse_bucket(&caps[2])
            .expect("regex alternation only admits SP/DP/CP");
        let amount = parse_amount(&caps[3])?;
        return Ok(RawLine::Type { key, bucket, amount });
    }
    if let Some(caps) = TIME_LINE.captures(&line) {
        let digits: Vec<u8> = digit_groups(&caps[1])
            .iter()
            .map(|d| d.parse().expect("single digit"))
            .collect();
        let amount = parse_amount(&caps[2])?;
        return Ok(RawLine::Time { digits, amount });
    }
    if let Some(caps) = JODI_LINE.captures(&line) {
        let pairs = digit_groups(&caps[1]);
        let amount = parse_amount(&caps[2])?;
        return Ok(RawLine::Jodi { pairs, amount });
    }
    if let Some(caps) = MULTI_LINE.captures(&line) {
        let amount = parse_amount(&caps[2])?;
        return Ok(RawLine::Multi {
            code: caps[1].to_string(),
            amount,
        });
    }
    if let Some(caps) = FAMILY_LINE.captures(&line) {
        let reference: u16 = caps[1]
            .parse()
            .map_err(|_| LineFailure::parse("family reference is not a number"))?;
        let amount = parse_amount(&caps[2])?;
        return Ok(RawLine::Family { reference, amount });
    }

    Err(LineFailure::parse(format!(
        "line matches no known notation: {:?}",
        line
    )))
}

fn normalize_line(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn digit_groups(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_ascii_digit())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_amount(text: &str) -> Result<i64, LineFailure> {
    let text = text.trim();
    if text.is_empty() {
        return Err(LineFailure::parse("missing amount"));
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LineFailure::parse(format!(
            "amount {:?} is not a number",
            text
        )));
    }
    let amount: i64 = text
        .parse()
        .map_err(|_| LineFailure::parse(format!("amount {:?} is out of range", text)))?;
    if amount <= 0 {
        return Err(LineFailure::validation("amount must be positive"));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_target_pana() {
        let raw = parse_line("128/129/120=100").unwrap();
        assert_eq!(
            raw,
            RawLine::Pana {
                codes: vec!["128".into(), "129".into(), "120".into()],
                amount: 100
            }
        );
    }

    #[test]
    fn single_pana() {
        let raw = parse_line("123 = 100").unwrap();
        assert_eq!(
            raw,
            RawLine::Pana {
                codes: vec!["123".into()],
                amount: 100
            }
        );
    }

    #[test]
    fn type_lines() {
        assert_eq!(
            parse_line("1SP=100").unwrap(),
            RawLine::Type {
                key: 1,
                bucket: TypeBucket::Sp,
                amount: 100
            }
        );
        assert_eq!(
            parse_line("5dp=200").unwrap(),
            RawLine::Type {
                key: 5,
                bucket: TypeBucket::Dp,
                amount: 200
            }
        );
        assert_eq!(
            parse_line("12CP=150").unwrap(),
            RawLine::Type {
                key: 12,
                bucket: TypeBucket::Cp,
                amount: 150
            }
        );
    }

    #[test]
    fn time_lines() {
        assert_eq!(
            parse_line("1=100").unwrap(),
            RawLine::Time {
                digits: vec![1],
                amount: 100
            }
        );
        assert_eq!(
            parse_line("1,2,3=300").unwrap(),
            RawLine::Time {
                digits: vec![1, 2, 3],
                amount: 300
            }
        );
        assert_eq!(
            parse_line("1 2 3=900").unwrap(),
            RawLine::Time {
                digits: vec![1, 2, 3],
                amount: 900
            }
        );
    }

    #[test]
    fn jodi_lines() {
        assert_eq!(
            parse_line("22-24-26=500").unwrap(),
            RawLine::Jodi {
                pairs: vec!["22".into(), "24".into(), "26".into()],
                amount: 500
            }
        );
        assert_eq!(
            parse_line("12:34:56=200").unwrap(),
            RawLine::Jodi {
                pairs: vec!["12".into(), "34".into(), "56".into()],
                amount: 200
            }
        );
    }

    #[test]
    fn multi_lines() {
        assert_eq!(
            parse_line("38x700").unwrap(),
            RawLine::Multi {
                code: "38".into(),
                amount: 700
            }
        );
        assert_eq!(
            parse_line("38*700").unwrap(),
            RawLine::Multi {
                code: "38".into(),
                amount: 700
            }
        );
    }

    #[test]
    fn family_line() {
        assert_eq!(
            parse_line("678family=200").unwrap(),
            RawLine::Family {
                reference: 678,
                amount: 200
            }
        );
        assert_eq!(
            parse_line("678FAMILY=200").unwrap().kind(),
            EntryKind::Family
        );
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert!(parse_line("badline").is_err());
        assert!(parse_line("12=100").is_err()); // bare two-digit code has no grammar
        assert!(parse_line("123-234=500").is_err()); // three-digit dash list has no grammar
        assert!(parse_line("").is_err());
    }

    #[test]
    fn rejects_bad_amounts() {
        let err = parse_line("123=abc").unwrap_err();
        assert_eq!(err.kind, LineErrorKind::Parse);
        let err = parse_line("123=0").unwrap_err();
        assert_eq!(err.kind, LineErrorKind::Validation);
        let err = parse_line("123=-5").unwrap_err();
        assert_eq!(err.kind, LineErrorKind::Parse);
        assert!(parse_line("123=").is_err());
    }

    #[test]
    fn dispatch_priority() {
        // A slash list is PANA even though each code is three digits.
        assert_eq!(parse_line("128/129=50").unwrap().kind(), EntryKind::Pana);
        // Type suffix beats the bare-digit time grammar.
        assert_eq!(parse_line("1SP=100").unwrap().kind(), EntryKind::Type);
        // Single digit with no suffix is TIME.
        assert_eq!(parse_line("1=100").unwrap().kind(), EntryKind::Time);
    }
}
