use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::ReconError;
use crate::layers::LAYER_COUNT;
use crate::model::MAX_AMOUNT_PAISE;

/// Default ceiling on reverse-clubbing group size.
pub const DEFAULT_MAX_CLUBBING_SUBSET_SIZE: usize = 4;

/// Hard ceiling on `clubbing.max_subset_size`. C(32, 6) is already ~900k
/// subsets, so anything above this is rejected at validation time.
pub const CLUBBING_SUBSET_SIZE_LIMIT: usize = 6;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    /// Minimum similarity score (0-100) accepted by the fuzzy invoice layer.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    /// Invoices dated strictly before this day are flagged time-barred.
    #[serde(default = "default_time_barred_cutoff")]
    pub time_barred_cutoff: NaiveDate,
    #[serde(default = "default_enabled_layers")]
    pub enabled_layers: BTreeSet<u8>,
    #[serde(default)]
    pub clubbing: ClubbingConfig,
    /// Purchase-register CSV source. Only read by the loader / CLI.
    #[serde(default)]
    pub primary: Option<SourceConfig>,
    /// GSTR-2B CSV source. Only read by the loader / CLI.
    #[serde(default)]
    pub secondary: Option<SourceConfig>,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            tolerance: ToleranceConfig::default(),
            fuzzy_threshold: default_fuzzy_threshold(),
            time_barred_cutoff: default_time_barred_cutoff(),
            enabled_layers: default_enabled_layers(),
            clubbing: ClubbingConfig::default(),
            primary: None,
            secondary: None,
        }
    }
}

fn default_name() -> String {
    "GST reconciliation".into()
}

fn default_fuzzy_threshold() -> f64 {
    85.0
}

fn default_time_barred_cutoff() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 31).unwrap_or_default()
}

fn default_enabled_layers() -> BTreeSet<u8> {
    (1..=LAYER_COUNT).collect()
}

// ---------------------------------------------------------------------------
// Tolerance
// ---------------------------------------------------------------------------

/// Absolute amount tolerances, in paise.
#[derive(Debug, Clone, Deserialize)]
pub struct ToleranceConfig {
    /// Used by layers 1, 2, 4, 5, 6, 7 and 8.
    #[serde(default = "default_standard_paise")]
    pub standard_paise: i64,
    /// Used by layer 3 only (rounding / forex variance).
    #[serde(default = "default_high_paise")]
    pub high_paise: i64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            standard_paise: default_standard_paise(),
            high_paise: default_high_paise(),
        }
    }
}

fn default_standard_paise() -> i64 {
    200
}

fn default_high_paise() -> i64 {
    5_000
}

// ---------------------------------------------------------------------------
// Reverse clubbing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ClubbingConfig {
    #[serde(default = "default_min_subset_size")]
    pub min_subset_size: usize,
    #[serde(default = "default_max_subset_size")]
    pub max_subset_size: usize,
    /// Same-GSTIN candidate buckets larger than this are skipped.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Search node budget per primary record.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
}

impl Default for ClubbingConfig {
    fn default() -> Self {
        Self {
            min_subset_size: default_min_subset_size(),
            max_subset_size: default_max_subset_size(),
            max_candidates: default_max_candidates(),
            max_nodes: default_max_nodes(),
        }
    }
}

fn default_min_subset_size() -> usize {
    1
}

fn default_max_subset_size() -> usize {
    DEFAULT_MAX_CLUBBING_SUBSET_SIZE
}

fn default_max_candidates() -> usize {
    32
}

fn default_max_nodes() -> usize {
    200_000
}

// ---------------------------------------------------------------------------
// Sources (loader only)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub file: String,
    #[serde(default)]
    pub columns: ColumnMapping,
    /// Extra chrono format tried before the built-in day-first formats.
    #[serde(default)]
    pub date_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMapping {
    /// Row identifier column. When absent, ids are assigned from the row number.
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default = "col_gstin")]
    pub gstin: String,
    #[serde(default = "col_invoice")]
    pub invoice: String,
    #[serde(default = "col_date")]
    pub date: String,
    #[serde(default = "col_taxable")]
    pub taxable: String,
    #[serde(default = "col_igst")]
    pub igst: String,
    #[serde(default = "col_cgst")]
    pub cgst: String,
    #[serde(default = "col_sgst")]
    pub sgst: String,
    /// Upstream validity flag column ("true"/"false", "1"/"0", "y"/"n").
    #[serde(default)]
    pub valid: Option<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            record_id: None,
            gstin: col_gstin(),
            invoice: col_invoice(),
            date: col_date(),
            taxable: col_taxable(),
            igst: col_igst(),
            cgst: col_cgst(),
            sgst: col_sgst(),
            valid: None,
        }
    }
}

fn col_gstin() -> String {
    "gstin".into()
}
fn col_invoice() -> String {
    "invoice_no".into()
}
fn col_date() -> String {
    "invoice_date".into()
}
fn col_taxable() -> String {
    "taxable_value".into()
}
fn col_igst() -> String {
    "igst".into()
}
fn col_cgst() -> String {
    "cgst".into()
}
fn col_sgst() -> String {
    "sgst".into()
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.tolerance.standard_paise < 0 {
            return Err(ReconError::ConfigValidation(format!(
                "standard tolerance must not be negative, got {}",
                self.tolerance.standard_paise
            )));
        }
        if self.tolerance.high_paise < 0 {
            return Err(ReconError::ConfigValidation(format!(
                "high tolerance must not be negative, got {}",
                self.tolerance.high_paise
            )));
        }
        for (label, value) in [
            ("standard", self.tolerance.standard_paise),
            ("high", self.tolerance.high_paise),
        ] {
            if value > MAX_AMOUNT_PAISE {
                return Err(ReconError::ConfigValidation(format!(
                    "{label} tolerance must be at most {MAX_AMOUNT_PAISE} paise, got {value}"
                )));
            }
        }
        if self.tolerance.high_paise < self.tolerance.standard_paise {
            log::warn!(
                "high tolerance ({}) is below standard tolerance ({}); layer 3 will be stricter than layer 2",
                self.tolerance.high_paise,
                self.tolerance.standard_paise
            );
        }

        if !(0.0..=100.0).contains(&self.fuzzy_threshold) {
            return Err(ReconError::ConfigValidation(format!(
                "fuzzy_threshold must be within 0-100, got {}",
                self.fuzzy_threshold
            )));
        }

        if self.enabled_layers.is_empty() {
            return Err(ReconError::ConfigValidation(
                "enabled_layers must name at least one layer".into(),
            ));
        }
        if let Some(&bad) = self
            .enabled_layers
            .iter()
            .find(|&&l| l == 0 || l > LAYER_COUNT)
        {
            return Err(ReconError::UnknownLayer(bad));
        }

        let c = &self.clubbing;
        if c.min_subset_size == 0 || c.min_subset_size > c.max_subset_size {
            return Err(ReconError::ConfigValidation(format!(
                "clubbing subset sizes must satisfy 1 <= min <= max, got min={} max={}",
                c.min_subset_size, c.max_subset_size
            )));
        }
        if c.max_subset_size > CLUBBING_SUBSET_SIZE_LIMIT {
            return Err(ReconError::ConfigValidation(format!(
                "clubbing.max_subset_size must be at most {CLUBBING_SUBSET_SIZE_LIMIT}, got {}",
                c.max_subset_size
            )));
        }
        if c.max_candidates == 0 || c.max_nodes == 0 {
            return Err(ReconError::ConfigValidation(
                "clubbing.max_candidates and clubbing.max_nodes must be positive".into(),
            ));
        }

        Ok(())
    }

    pub fn is_layer_enabled(&self, layer: u8) -> bool {
        self.enabled_layers.contains(&layer)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
