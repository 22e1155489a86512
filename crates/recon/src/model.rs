use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// A single normalized invoice row from either source.
///
/// Amounts are in paise. `None` means the upstream value was missing or not
/// numeric; such amounts never satisfy a tolerance check. A tax component that
/// simply does not apply to the invoice (e.g. IGST on an intra-state supply)
/// arrives as `Some(0)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub record_id: String,
    pub gstin: String,
    pub invoice_no: String,
    pub invoice_date: Option<NaiveDate>,
    pub taxable_paise: Option<i64>,
    pub igst_paise: Option<i64>,
    pub cgst_paise: Option<i64>,
    pub sgst_paise: Option<i64>,
    /// Upstream validity flag. Invalid records are never matched.
    pub valid: bool,
}

/// Largest amount magnitude accepted from a source, in paise (₹10 lakh crore).
/// Sums of a handful of such amounts still fit in an `i64`.
pub const MAX_AMOUNT_PAISE: i64 = 1_000_000_000_000_000;

/// Purchase-register side.
pub type PrimaryRecord = InvoiceRecord;
/// GSTR-2B side.
pub type SecondaryRecord = InvoiceRecord;

impl InvoiceRecord {
    /// IGST + CGST + SGST, or `None` if any component is unusable or the
    /// sum overflows.
    pub fn total_tax_paise(&self) -> Option<i64> {
        self.igst_paise?
            .checked_add(self.cgst_paise?)?
            .checked_add(self.sgst_paise?)
    }

    /// Taxable value plus all tax components.
    pub fn grand_total_paise(&self) -> Option<i64> {
        self.taxable_paise?.checked_add(self.total_tax_paise()?)
    }
}

/// Both record collections for one run.
///
/// `run_at` stamps every audit entry; pinning it makes a run byte-for-byte
/// reproducible.
#[derive(Debug, Clone)]
pub struct ReconInput {
    pub primary: Vec<PrimaryRecord>,
    pub secondary: Vec<SecondaryRecord>,
    pub run_at: DateTime<Utc>,
}

impl ReconInput {
    pub fn new(primary: Vec<PrimaryRecord>, secondary: Vec<SecondaryRecord>) -> Self {
        Self {
            primary,
            secondary,
            run_at: Utc::now(),
        }
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = run_at;
        self
    }
}

// ---------------------------------------------------------------------------
// Per-record results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    Unmatched,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Matched => write!(f, "matched"),
            Self::Unmatched => write!(f, "unmatched"),
        }
    }
}

/// Machine-readable reason attached to every [`MatchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemarkCode {
    StrictMatch,
    GrandTotalMatch,
    HighToleranceMatch,
    NumericInvoiceMatch,
    LastFourDigitsMatch,
    PanLevelMatch,
    FuzzyInvoiceMatch,
    ReverseClubbing,
    NotFound,
    InvalidRecord,
    MissingGstin,
    BlankInvoice,
    MissingAmount,
}

impl std::fmt::Display for RemarkCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrictMatch => write!(f, "strict_match"),
            Self::GrandTotalMatch => write!(f, "grand_total_match"),
            Self::HighToleranceMatch => write!(f, "high_tolerance_match"),
            Self::NumericInvoiceMatch => write!(f, "numeric_invoice_match"),
            Self::LastFourDigitsMatch => write!(f, "last_four_digits_match"),
            Self::PanLevelMatch => write!(f, "pan_level_match"),
            Self::FuzzyInvoiceMatch => write!(f, "fuzzy_invoice_match"),
            Self::ReverseClubbing => write!(f, "reverse_clubbing"),
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidRecord => write!(f, "invalid_record"),
            Self::MissingGstin => write!(f, "missing_gstin"),
            Self::BlankInvoice => write!(f, "blank_invoice"),
            Self::MissingAmount => write!(f, "missing_amount"),
        }
    }
}

/// Final disposition of one primary record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub record_id: String,
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<u8>,
    /// Consumed secondary ids, sorted.
    pub matched_ids: Vec<String>,
    pub remark: String,
    pub remark_code: RemarkCode,
    pub time_barred: bool,
}

/// Final disposition of one secondary record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecondaryDisposition {
    pub record_id: String,
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_primary_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<u8>,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// One decision. Entries are appended in decision order and never edited.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub primary_id: String,
    pub secondary_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<u8>,
    pub decision: MatchStatus,
    /// Derived keys that located the candidate(s), rendered as strings.
    pub keys: Vec<String>,
    /// Primary grand total minus matched grand total.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_delta_paise: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerStatistic {
    pub layer: u8,
    pub name: String,
    pub enabled: bool,
    /// Unresolved primaries entering the layer.
    pub candidates: usize,
    pub resolved: usize,
    pub cumulative_resolved: usize,
}

/// Why unmatched primaries may have failed, from the original tool's
/// post-run diagnostics. Counts overlap: one record can have several issues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MismatchAnalysis {
    pub total_unmatched: usize,
    pub invoice_format_issues: usize,
    pub gstin_issues: usize,
    pub amount_issues: usize,
    pub date_issues: usize,
    pub time_barred: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconSummary {
    pub total_primary: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub time_barred: usize,
    pub total_secondary: usize,
    pub secondary_matched: usize,
    pub secondary_unmatched: usize,
    pub analysis: MismatchAnalysis,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: DateTime<Utc>,
    pub enabled_layers: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub meta: ReconMeta,
    pub summary: ReconSummary,
    /// Indexed by layer number minus one; disabled layers are present with `enabled = false`.
    pub layers: Vec<LayerStatistic>,
    /// One per primary record, in input order.
    pub results: Vec<MatchResult>,
    pub audit: Vec<AuditEntry>,
    /// One per secondary record, in input order.
    pub secondary: Vec<SecondaryDisposition>,
}
