use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Review lifecycle of a staged slip. Transitions only move toward a
/// terminal state; `Approved` and `Rejected` are never left again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    Pending,
    Edited,
    Approved,
    Rejected,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::Edited => "EDITED",
            RecordStatus::Approved => "APPROVED",
            RecordStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RecordStatus::Pending),
            "EDITED" => Some(RecordStatus::Edited),
            "APPROVED" => Some(RecordStatus::Approved),
            "REJECTED" => Some(RecordStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Approved | RecordStatus::Rejected)
    }
}

/// The six shorthand notations a slip line can use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Pana,
    Type,
    Time,
    Jodi,
    Multi,
    Family,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Pana => "PANA",
            EntryKind::Type => "TYPE",
            EntryKind::Time => "TIME",
            EntryKind::Jodi => "JODI",
            EntryKind::Multi => "MULTI",
            EntryKind::Family => "FAMILY",
        }
    }
}

/// One concrete pattern/amount pair after interpretation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stake {
    pub code: String,
    pub amount: i64,
}

/// A fully interpreted slip line. `stakes` is recomputed whenever the
/// owning record's body is edited; `source` keeps the original text for
/// audit and re-display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedLine {
    pub line_no: usize,
    pub source: String,
    pub kind: EntryKind,
    pub stakes: Vec<Stake>,
}

impl ParsedLine {
    pub fn line_total(&self) -> i64 {
        self.stakes.iter().map(|s| s.amount).sum()
    }

    /// Canonical explicit form: expansions are spelled out code by code, so
    /// re-parsing the canonical line yields the same stake set.
    pub fn canonical(&self) -> String {
        let amount = self.stakes.first().map(|s| s.amount).unwrap_or(0);
        match self.kind {
            EntryKind::Time => {
                let digits: Vec<&str> = self.stakes.iter().map(|s| s.code.as_str()).collect();
                format!("{}={}", digits.join(","), amount)
            }
            EntryKind::Jodi => {
                let pairs: Vec<&str> = self.stakes.iter().map(|s| s.code.as_str()).collect();
                format!("{}={}", pairs.join("-"), amount)
            }
            EntryKind::Multi => {
                let code = self.stakes.first().map(|s| s.code.as_str()).unwrap_or("00");
                format!("{}x{}", code, amount)
            }
            EntryKind::Pana | EntryKind::Type | EntryKind::Family => {
                let codes: Vec<&str> = self.stakes.iter().map(|s| s.code.as_str()).collect();
                format!("{}={}", codes.join("/"), amount)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LineErrorKind {
    Parse,
    Validation,
}

/// Line-scoped failure. Collected alongside successfully parsed lines so a
/// single bad line never invalidates the rest of the message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineError {
    pub line_no: usize,
    pub source: String,
    pub kind: LineErrorKind,
    pub message: String,
}

/// Inbound slip as received over the wire. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub sender_name: String,
    pub sender_phone: String,
    pub group_name: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    /// Duplicate-detection fingerprint: SHA-256 over the normalized
    /// sender, group, and body (lowercased, whitespace runs collapsed).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalize(&self.sender_name));
        hasher.update("|");
        hasher.update(normalize(&self.group_name));
        hasher.update("|");
        hasher.update(normalize(&self.body));
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

fn normalize(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
}

/// Reviewer-chosen assignment applied at decision time.
#[derive(Debug, Clone, Default)]
pub struct DecisionMeta {
    pub customer: Option<String>,
    pub bazar: Option<String>,
}

/// One permanent ledger row. Created only from an approved record, one
/// batch per record, never partially written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub record_id: i64,
    pub customer: String,
    pub bazar: String,
    pub code: String,
    pub amount: i64,
    pub kind: EntryKind,
    pub entry_date: chrono::NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            RecordStatus::Pending,
            RecordStatus::Edited,
            RecordStatus::Approved,
            RecordStatus::Rejected,
        ] {
            assert_eq!(RecordStatus::parse_status(status.as_str()), Some(status));
        }
        assert_eq!(RecordStatus::parse_status("bogus"), None);
    }

    #[test]
    fn fingerprint_ignores_case_and_spacing() {
        let a = RawMessage {
            sender_name: "Ravi".into(),
            sender_phone: "".into(),
            group_name: "Main Group".into(),
            body: "123=100\n456=200".into(),
            received_at: Utc::now(),
        };
        let b = RawMessage {
            sender_name: "  ravi ".into(),
            sender_phone: "999".into(),
            group_name: "main   group".into(),
            body: "123=100\n456=200".into(),
            received_at: Utc::now(),
        };
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = RawMessage {
            body: "123=100\n456=201".into(),
            ..a.clone()
        };
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
