//! Expansion of tokenized lines into concrete stake sets.
//!
//! Literal notations (PANA, TIME, JODI, MULTI) carry their amounts as
//! given, one stake per explicit code. Expansion notations (TYPE, FAMILY)
//! enumerate every member of the referenced bucket or family and apply the
//! amount per member. Output is deterministic: expansions emit members in
//! ascending canonical order.

use crate::lookup::LookupTables;
use crate::model::{LineError, ParsedLine, Stake};
use crate::parser::{self, LineFailure, RawLine};

/// Interpreted message body: parsed lines, line-scoped failures, and the
/// grand total over every stake.
#[derive(Debug, Clone, Default)]
pub struct Breakdown {
    pub lines: Vec<ParsedLine>,
    pub errors: Vec<LineError>,
    pub total: i64,
}

impl Breakdown {
    pub fn stake_count(&self) -> usize {
        self.lines.iter().map(|l| l.stakes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Expand one tokenized line into its stake set.
pub fn expand(raw: &RawLine, tables: &LookupTables) -> Result<Vec<Stake>, LineFailure> {
    match raw {
        RawLine::Pana { codes, amount } => {
            let mut stakes = Vec::with_capacity(codes.len());
            for code in codes {
                let numeric: u16 = code
                    .parse()
                    .map_err(|_| LineFailure::validation(format!("bad pana code {:?}", code)))?;
                if !tables.contains_pana(numeric) {
                    return Err(LineFailure::validation(format!(
                        "unknown pana code {}",
                        code
                    )));
                }
                stakes.push(Stake {
                    code: code.clone(),
                    amount: *amount,
                });
            }
            Ok(stakes)
        }
        RawLine::Type { key, bucket, amount } => {
            let members = tables.bucket(*bucket, *key).ok_or_else(|| {
                LineFailure::validation(format!("unknown {} key {}", bucket.as_str(), key))
            })?;
            if members.is_empty() {
                return Err(LineFailure::validation(format!(
                    "{} key {} expands to no codes",
                    bucket.as_str(),
                    key
                )));
            }
            Ok(members
                .iter()
                .map(|code| Stake {
                    code: format!("{:03}", code),
                    amount: *amount,
                })
                .collect())
        }
        RawLine::Time { digits, amount } => Ok(digits
            .iter()
            .map(|d| Stake {
                code: d.to_string(),
                amount: *amount,
            })
            .collect()),
        RawLine::Jodi { pairs, amount } => Ok(pairs
            .iter()
            .map(|pair| Stake {
                code: pair.clone(),
                amount: *amount,
            })
            .collect()),
        RawLine::Multi { code, amount } => Ok(vec![Stake {
            code: code.clone(),
            amount: *amount,
        }]),
        RawLine::Family { reference, amount } => {
            let members = tables.family(*reference).ok_or_else(|| {
                LineFailure::validation(format!("unknown family reference {}", reference))
            })?;
            if members.is_empty() {
                return Err(LineFailure::validation(format!(
                    "family {} expands to no codes",
                    reference
                )));
            }
            Ok(members
                .iter()
                .map(|code| Stake {
                    code: format!("{:03}", code),
                    amount: *amount,
                })
                .collect())
        }
    }
}

/// Parse and expand a whole message body. Lines are independent: failures
/// are collected per line and never abort the rest.
pub fn evaluate(body: &str, tables: &LookupTables) -> Breakdown {
    let mut breakdown = Breakdown::default();

    for (idx, source) in body.lines().enumerate() {
        let line_no = idx + 1;
        if source.trim().is_empty() {
            continue;
        }
        let outcome = parser::parse_line(source).and_then(|raw| {
            let stakes = expand(&raw, tables)?;
            Ok((raw.kind(), stakes))
        });
        match outcome {
            Ok((kind, stakes)) => {
                breakdown.total += stakes.iter().map(|s| s.amount).sum::<i64>();
                breakdown.lines.push(ParsedLine {
                    line_no,
                    source: source.trim().to_string(),
                    kind,
                    stakes,
                });
            }
            Err(failure) => breakdown.errors.push(LineError {
                line_no,
                source: source.trim().to_string(),
                kind: failure.kind,
                message: failure.message,
            }),
        }
    }

    breakdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntryKind;

    fn tables() -> LookupTables {
        LookupTables::build()
    }

    #[test]
    fn literal_pana_uses_amount_as_given() {
        let breakdown = evaluate("128/129/120=100", &tables());
        assert_eq!(breakdown.lines.len(), 1);
        let line = &breakdown.lines[0];
        assert_eq!(line.kind, EntryKind::Pana);
        assert_eq!(line.stakes.len(), 3);
        assert!(line.stakes.iter().all(|s| s.amount == 100));
        assert_eq!(breakdown.total, 300);
    }

    #[test]
    fn sp_expansion_has_twelve_members() {
        let breakdown = evaluate("1SP=100", &tables());
        let line = &breakdown.lines[0];
        assert_eq!(line.stakes.len(), 12);
        assert_eq!(line.line_total(), 1200);
        assert_eq!(line.stakes[0].code, "128");
    }

    #[test]
    fn dp_and_cp_expansions() {
        let breakdown = evaluate("5DP=200\n12CP=150", &tables());
        assert_eq!(breakdown.lines[0].stakes.len(), 9);
        assert_eq!(breakdown.lines[1].stakes.len(), 1);
        assert_eq!(breakdown.lines[1].stakes[0].code, "444");
        assert_eq!(breakdown.total, 9 * 200 + 150);
    }

    #[test]
    fn time_amount_applies_per_digit() {
        let breakdown = evaluate("1,2,3=300", &tables());
        let line = &breakdown.lines[0];
        assert_eq!(line.stakes.len(), 3);
        assert_eq!(line.line_total(), 900);
    }

    #[test]
    fn jodi_amount_applies_per_pair() {
        let breakdown = evaluate("22-24-26=500", &tables());
        assert_eq!(breakdown.lines[0].stakes.len(), 3);
        assert_eq!(breakdown.total, 1500);
    }

    #[test]
    fn family_expands_whole_column() {
        let breakdown = evaluate("678family=200", &tables());
        let line = &breakdown.lines[0];
        assert_eq!(line.kind, EntryKind::Family);
        assert_eq!(line.stakes.len(), 8);
        assert_eq!(line.line_total(), 1600);
        assert!(line.stakes.iter().any(|s| s.code == "128"));
    }

    #[test]
    fn unknown_keys_are_validation_errors() {
        let breakdown = evaluate("321=100\n11SP=100\n501family=50", &tables());
        assert!(breakdown.lines.is_empty());
        assert_eq!(breakdown.errors.len(), 3);
        assert!(breakdown.errors[0].message.contains("unknown pana code"));
        assert!(breakdown.errors[1].message.contains("unknown SP key"));
        assert!(breakdown.errors[2].message.contains("unknown family"));
    }

    #[test]
    fn partial_failure_keeps_valid_lines() {
        let breakdown = evaluate("123=100\nbadline\n1SP=50", &tables());
        assert_eq!(breakdown.lines.len(), 2);
        assert_eq!(breakdown.errors.len(), 1);
        assert_eq!(breakdown.errors[0].line_no, 2);
        assert_eq!(breakdown.errors[0].source, "badline");
        assert_eq!(breakdown.total, 100 + 12 * 50);
    }

    #[test]
    fn determinism() {
        let a = evaluate("5DP=200\n678family=10", &tables());
        let b = evaluate("5DP=200\n678family=10", &tables());
        assert_eq!(a.lines, b.lines);
    }

    #[test]
    fn canonical_round_trip() {
        let tables = tables();
        let body = "128/129/120=100\n1SP=50\n1,2,3=300\n22-24-26=500\n38x700\n678family=200";
        let first = evaluate(body, &tables);
        assert!(first.errors.is_empty());

        let canonical: Vec<String> = first.lines.iter().map(|l| l.canonical()).collect();
        let second = evaluate(&canonical.join("\n"), &tables);
        assert!(second.errors.is_empty());

        let mut stakes_a: Vec<Stake> = first.lines.iter().flat_map(|l| l.stakes.clone()).collect();
        let mut stakes_b: Vec<Stake> = second.lines.iter().flat_map(|l| l.stakes.clone()).collect();
        stakes_a.sort_by(|x, y| x.code.cmp(&y.code).then(x.amount.cmp(&y.amount)));
        stakes_b.sort_by(|x, y| x.code.cmp(&y.code).then(x.amount.cmp(&y.amount)));
        assert_eq!(stakes_a, stakes_b);
        assert_eq!(first.total, second.total);
    }
}
