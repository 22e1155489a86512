//! Per-layer key derivation.
//!
//! Every function here is pure. A `None` key means the record lacks what the
//! layer needs and is simply skipped by it.

use std::fmt;

use crate::model::{InvoiceRecord, RemarkCode};

/// Normalized invoice numbers shorter than this are too weak to join on.
pub const MIN_INVOICE_KEY_LEN: usize = 2;

/// Fuzzy comparison on very short invoice numbers is meaningless.
pub const MIN_FUZZY_INVOICE_LEN: usize = 3;

/// Length of a well-formed GSTIN.
pub const GSTIN_LEN: usize = 15;

const PAN_LEN: usize = 10;

/// Lookup key. `party` is a GSTIN (or PAN for layer 6); `invoice` is absent
/// for the bucket-only layers 7 and 8.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchKey {
    pub party: String,
    pub invoice: Option<String>,
}

impl MatchKey {
    fn new(party: impl Into<String>, invoice: impl Into<String>) -> Self {
        Self {
            party: party.into(),
            invoice: Some(invoice.into()),
        }
    }

    fn bucket(party: impl Into<String>) -> Self {
        Self {
            party: party.into(),
            invoice: None,
        }
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.invoice {
            Some(inv) => write!(f, "{}|{}", self.party, inv),
            None => write!(f, "{}", self.party),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Uppercase with all whitespace removed.
pub fn normalize_gstin(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// The PAN segment (first 10 characters) of a normalized GSTIN.
pub fn pan_of(gstin: &str) -> Option<String> {
    if gstin.chars().count() < PAN_LEN {
        return None;
    }
    Some(gstin.chars().take(PAN_LEN).collect())
}

/// Uppercase, whitespace and ASCII punctuation removed, leading zeros stripped.
///
/// `inv-0042 ` becomes `INV0042`; `00/42` and `42` both become `42`.
pub fn normalize_invoice(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
        .flat_map(char::to_uppercase)
        .collect();
    cleaned.trim_start_matches('0').to_string()
}

/// Every ASCII digit of the raw invoice number, in order.
pub fn invoice_digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// The last four digits of the invoice number, if it has at least four.
pub fn invoice_last4(raw: &str) -> Option<String> {
    let digits = invoice_digits(raw);
    if digits.len() < 4 {
        return None;
    }
    Some(digits[digits.len() - 4..].to_string())
}

// ---------------------------------------------------------------------------
// Per-layer keys
// ---------------------------------------------------------------------------

/// Derive the lookup key a record uses in `layer`.
pub fn derive_key(record: &InvoiceRecord, layer: u8) -> Option<MatchKey> {
    if !record.valid {
        return None;
    }
    let gstin = normalize_gstin(&record.gstin);
    if gstin.is_empty() {
        return None;
    }

    match layer {
        1..=3 => basic_invoice(record, MIN_INVOICE_KEY_LEN).map(|inv| MatchKey::new(gstin, inv)),
        4 => {
            let digits = invoice_digits(&record.invoice_no);
            (!digits.is_empty()).then(|| MatchKey::new(gstin, digits))
        }
        5 => invoice_last4(&record.invoice_no).map(|last4| MatchKey::new(gstin, last4)),
        6 => {
            let pan = pan_of(&gstin)?;
            basic_invoice(record, MIN_INVOICE_KEY_LEN).map(|inv| MatchKey::new(pan, inv))
        }
        7 => basic_invoice(record, MIN_FUZZY_INVOICE_LEN).map(|_| MatchKey::bucket(gstin)),
        8 => Some(MatchKey::bucket(gstin)),
        _ => None,
    }
}

fn basic_invoice(record: &InvoiceRecord, min_len: usize) -> Option<String> {
    let inv = normalize_invoice(&record.invoice_no);
    (inv.chars().count() >= min_len).then_some(inv)
}

/// The first data-quality defect that keeps a record out of most layers.
pub fn blocking_defect(record: &InvoiceRecord) -> Option<RemarkCode> {
    if !record.valid {
        Some(RemarkCode::InvalidRecord)
    } else if normalize_gstin(&record.gstin).is_empty() {
        Some(RemarkCode::MissingGstin)
    } else if normalize_invoice(&record.invoice_no).is_empty() {
        Some(RemarkCode::BlankInvoice)
    } else if record.grand_total_paise().is_none() {
        Some(RemarkCode::MissingAmount)
    } else {
        None
    }
}

/// True when the normalized GSTIN is present but not 15 characters long.
pub fn gstin_malformed(record: &InvoiceRecord) -> bool {
    let gstin = normalize_gstin(&record.gstin);
    !gstin.is_empty() && gstin.chars().count() != GSTIN_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(gstin: &str, inv: &str) -> InvoiceRecord {
        InvoiceRecord {
            record_id: "p1".into(),
            gstin: gstin.into(),
            invoice_no: inv.into(),
            invoice_date: None,
            taxable_paise: Some(100_000),
            igst_paise: Some(18_000),
            cgst_paise: Some(0),
            sgst_paise: Some(0),
            valid: true,
        }
    }

    #[test]
    fn gstin_normalization() {
        assert_eq!(normalize_gstin(" 27abcde1234f1z5 "), "27ABCDE1234F1Z5");
        assert_eq!(normalize_gstin("27ABCDE 1234F1Z5"), "27ABCDE1234F1Z5");
        assert_eq!(pan_of("27ABCDE1234F1Z5").as_deref(), Some("27ABCDE123"));
        assert_eq!(pan_of("27ABC"), None);
    }

    #[test]
    fn invoice_projections() {
        assert_eq!(normalize_invoice("inv-001"), "INV001");
        assert_eq!(normalize_invoice(" 00/42 "), "42");
        assert_eq!(invoice_digits("GST/01"), "01");
        assert_eq!(invoice_digits("ABC"), "");
        assert_eq!(invoice_last4("WB-0995").as_deref(), Some("0995"));
        assert_eq!(invoice_last4("2023-24/001234").as_deref(), Some("1234"));
        assert_eq!(invoice_last4("A-12"), None);
    }

    #[test]
    fn layer_keys() {
        let r = rec("27abcde1234f1z5", "INV-001");
        assert_eq!(derive_key(&r, 1).unwrap().to_string(), "27ABCDE1234F1Z5|INV001");
        assert_eq!(derive_key(&r, 3), derive_key(&r, 2));
        assert_eq!(derive_key(&r, 4).unwrap().to_string(), "27ABCDE1234F1Z5|001");
        assert_eq!(derive_key(&r, 5), None);
        assert_eq!(derive_key(&r, 6).unwrap().to_string(), "27ABCDE123|INV001");
        assert_eq!(derive_key(&r, 7).unwrap().to_string(), "27ABCDE1234F1Z5");
        assert_eq!(derive_key(&r, 8).unwrap().to_string(), "27ABCDE1234F1Z5");
        assert_eq!(derive_key(&r, 9), None);
    }

    #[test]
    fn missing_gstin_disqualifies_every_layer() {
        let r = rec("  ", "INV-001");
        for layer in 1..=8 {
            assert_eq!(derive_key(&r, layer), None, "layer {layer}");
        }
        assert_eq!(blocking_defect(&r), Some(RemarkCode::MissingGstin));
    }

    #[test]
    fn short_invoice_skips_invoice_layers() {
        let r = rec("27ABCDE1234F1Z5", "7");
        assert_eq!(derive_key(&r, 1), None);
        assert_eq!(derive_key(&r, 4).unwrap().to_string(), "27ABCDE1234F1Z5|7");
        assert_eq!(derive_key(&r, 7), None);
        // Layer 8 only needs the GSTIN
        assert!(derive_key(&r, 8).is_some());
    }

    #[test]
    fn invalid_record_has_no_keys() {
        let mut r = rec("27ABCDE1234F1Z5", "INV-001");
        r.valid = false;
        assert!((1..=8).all(|l| derive_key(&r, l).is_none()));
        assert_eq!(blocking_defect(&r), Some(RemarkCode::InvalidRecord));
    }

    #[test]
    fn defects() {
        let mut r = rec("27ABCDE1234F1Z5", "--");
        assert_eq!(blocking_defect(&r), Some(RemarkCode::BlankInvoice));
        r.invoice_no = "INV-9".into();
        r.cgst_paise = None;
        assert_eq!(blocking_defect(&r), Some(RemarkCode::MissingAmount));
        r.cgst_paise = Some(0);
        assert_eq!(blocking_defect(&r), None);
        assert!(!gstin_malformed(&r));
        r.gstin = "27ABCDE1234".into();
        assert!(gstin_malformed(&r));
    }
}
