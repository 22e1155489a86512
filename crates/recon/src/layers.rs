use crate::config::ReconConfig;
use crate::keys::{derive_key, MatchKey};
use crate::model::{InvoiceRecord, RemarkCode};
use crate::tolerance::AmountCheck;

pub const LAYER_COUNT: u8 = 8;

/// How a layer turns candidates into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Exact key lookup, one secondary per primary.
    Keyed,
    /// GSTIN bucket, best invoice-number similarity.
    Fuzzy,
    /// GSTIN bucket, several secondaries per primary.
    Clubbing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToleranceClass {
    Standard,
    High,
}

/// Static description of one matching layer.
#[derive(Debug)]
pub struct LayerSpec {
    pub number: u8,
    pub name: &'static str,
    pub strategy: Strategy,
    pub amount_check: AmountCheck,
    pub tolerance: ToleranceClass,
    pub remark_code: RemarkCode,
    /// What agreed, in the order it is reported in remarks.
    pub fields: &'static [&'static str],
}

impl LayerSpec {
    pub fn key(&self, record: &InvoiceRecord) -> Option<MatchKey> {
        derive_key(record, self.number)
    }

    pub fn tolerance_paise(&self, config: &ReconConfig) -> i64 {
        match self.tolerance {
            ToleranceClass::Standard => config.tolerance.standard_paise,
            ToleranceClass::High => config.tolerance.high_paise,
        }
    }
}

pub static LAYERS: [LayerSpec; LAYER_COUNT as usize] = [
    LayerSpec {
        number: 1,
        name: "Strict Match",
        strategy: Strategy::Keyed,
        amount_check: AmountCheck::TaxableAndTax,
        tolerance: ToleranceClass::Standard,
        remark_code: RemarkCode::StrictMatch,
        fields: &["GSTIN", "Invoice Number", "Taxable Value", "Tax"],
    },
    LayerSpec {
        number: 2,
        name: "Grand Total Match",
        strategy: Strategy::Keyed,
        amount_check: AmountCheck::GrandTotal,
        tolerance: ToleranceClass::Standard,
        remark_code: RemarkCode::GrandTotalMatch,
        fields: &["GSTIN", "Invoice Number", "Grand Total"],
    },
    LayerSpec {
        number: 3,
        name: "High Tolerance",
        strategy: Strategy::Keyed,
        amount_check: AmountCheck::GrandTotal,
        tolerance: ToleranceClass::High,
        remark_code: RemarkCode::HighToleranceMatch,
        fields: &["GSTIN", "Invoice Number", "Grand Total (high tolerance)"],
    },
    LayerSpec {
        number: 4,
        name: "Numeric Only",
        strategy: Strategy::Keyed,
        amount_check: AmountCheck::GrandTotal,
        tolerance: ToleranceClass::Standard,
        remark_code: RemarkCode::NumericInvoiceMatch,
        fields: &["GSTIN", "Invoice Digits", "Grand Total"],
    },
    LayerSpec {
        number: 5,
        name: "Last 4 Digits",
        strategy: Strategy::Keyed,
        amount_check: AmountCheck::GrandTotal,
        tolerance: ToleranceClass::Standard,
        remark_code: RemarkCode::LastFourDigitsMatch,
        fields: &["GSTIN", "Last 4 Invoice Digits", "Grand Total"],
    },
    LayerSpec {
        number: 6,
        name: "PAN Level",
        strategy: Strategy::Keyed,
        amount_check: AmountCheck::GrandTotal,
        tolerance: ToleranceClass::Standard,
        remark_code: RemarkCode::PanLevelMatch,
        fields: &["PAN", "Invoice Number", "Grand Total"],
    },
    LayerSpec {
        number: 7,
        name: "Fuzzy Match",
        strategy: Strategy::Fuzzy,
        amount_check: AmountCheck::TaxableAndTax,
        tolerance: ToleranceClass::Standard,
        remark_code: RemarkCode::FuzzyInvoiceMatch,
        fields: &["GSTIN", "Similar Invoice Number", "Taxable Value", "Tax"],
    },
    LayerSpec {
        number: 8,
        name: "Reverse Clubbing",
        strategy: Strategy::Clubbing,
        amount_check: AmountCheck::TaxableAndTax,
        tolerance: ToleranceClass::Standard,
        remark_code: RemarkCode::ReverseClubbing,
        fields: &["GSTIN", "Taxable Sum", "Tax Sum"],
    },
];
