use chrono::{DateTime, Utc};

use crate::model::{AuditEntry, MatchStatus};

/// Evidence behind one accepted match.
#[derive(Debug, Clone)]
pub struct MatchEvidence {
    pub keys: Vec<String>,
    pub amount_delta_paise: Option<i64>,
    pub similarity: Option<f64>,
    pub detail: String,
}

/// Append-only audit log for one run.
///
/// Every entry carries the run timestamp rather than wall-clock time, so two
/// runs over the same input produce identical logs.
#[derive(Debug)]
pub struct AuditRecorder {
    run_at: DateTime<Utc>,
    entries: Vec<AuditEntry>,
}

impl AuditRecorder {
    pub fn new(run_at: DateTime<Utc>) -> Self {
        Self {
            run_at,
            entries: Vec::new(),
        }
    }

    pub fn record_match(
        &mut self,
        primary_id: &str,
        secondary_ids: Vec<String>,
        layer: u8,
        evidence: MatchEvidence,
    ) {
        self.push(AuditEntry {
            sequence: self.next_sequence(),
            primary_id: primary_id.to_string(),
            secondary_ids,
            layer: Some(layer),
            decision: MatchStatus::Matched,
            keys: evidence.keys,
            amount_delta_paise: evidence.amount_delta_paise,
            similarity: evidence.similarity,
            detail: evidence.detail,
            recorded_at: self.run_at,
        });
    }

    pub fn record_non_match(&mut self, primary_id: &str, detail: String) {
        self.push(AuditEntry {
            sequence: self.next_sequence(),
            primary_id: primary_id.to_string(),
            secondary_ids: Vec::new(),
            layer: None,
            decision: MatchStatus::Unmatched,
            keys: Vec::new(),
            amount_delta_paise: None,
            similarity: None,
            detail,
            recorded_at: self.run_at,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<AuditEntry> {
        self.entries
    }

    fn next_sequence(&self) -> u64 {
        self.entries.len() as u64 + 1
    }

    fn push(&mut self, entry: AuditEntry) {
        log::debug!(
            "audit #{} {} {} -> {:?} ({})",
            entry.sequence,
            entry.decision,
            entry.primary_id,
            entry.secondary_ids,
            entry.detail
        );
        self.entries.push(entry);
    }
}

/// Render paise as rupees with two decimals, e.g. `-12.05`.
pub fn format_rupees(paise: i64) -> String {
    let sign = if paise < 0 { "-" } else { "" };
    let abs = paise.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn run_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap()
    }

    #[test]
    fn sequences_and_timestamps() {
        let mut rec = AuditRecorder::new(run_at());
        assert!(rec.is_empty());
        rec.record_match(
            "p1",
            vec!["s1".into()],
            2,
            MatchEvidence {
                keys: vec!["27ABCDE1234F1Z5|INV1".into()],
                amount_delta_paise: Some(-50),
                similarity: None,
                detail: "Matched: GSTIN, Invoice Number".into(),
            },
        );
        rec.record_non_match("p2", "not found".into());
        assert_eq!(rec.len(), 2);

        let entries = rec.into_entries();
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[0].layer, Some(2));
        assert_eq!(entries[0].decision, MatchStatus::Matched);
        assert_eq!(entries[1].sequence, 2);
        assert_eq!(entries[1].decision, MatchStatus::Unmatched);
        assert!(entries[1].secondary_ids.is_empty());
        assert!(entries.iter().all(|e| e.recorded_at == run_at()));
    }

    #[test]
    fn rupee_formatting() {
        assert_eq!(format_rupees(0), "0.00");
        assert_eq!(format_rupees(118_000), "1180.00");
        assert_eq!(format_rupees(5), "0.05");
        assert_eq!(format_rupees(-1_205), "-12.05");
    }
}
