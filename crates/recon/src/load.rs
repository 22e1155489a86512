//! CSV adapter for the two invoice sources.
//!
//! Columns come from the explicit [`ColumnMapping`]; nothing is inferred.

use std::path::Path;

use chrono::NaiveDate;

use crate::config::{ColumnMapping, ReconConfig, SourceConfig};
use crate::error::ReconError;
use crate::model::{InvoiceRecord, ReconInput, MAX_AMOUNT_PAISE};

/// Day-first formats tried in order after any configured `date_format`.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%d-%b-%Y", "%d %b %Y",
];

/// Load CSV rows into InvoiceRecords, applying the column mapping.
pub fn load_csv_records(
    source_name: &str,
    csv_data: &str,
    source: &SourceConfig,
) -> Result<Vec<InvoiceRecord>, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let columns = Columns::resolve(source_name, &headers, &source.columns)?;

    let mut records = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let record_id = match columns.record_id {
            Some(idx) if !field(idx).is_empty() => field(idx).to_string(),
            _ => format!("{}-{}", source_name, row + 1),
        };
        let gstin = field(columns.gstin).to_string();
        let invoice_no = field(columns.invoice).to_string();

        let mut valid = columns.valid.map_or(true, |idx| parse_flag(field(idx)));
        if gstin.is_empty() && invoice_no.is_empty() {
            valid = false;
        }

        records.push(InvoiceRecord {
            record_id,
            invoice_date: parse_date(field(columns.date), source.date_format.as_deref()),
            taxable_paise: parse_amount(field(columns.taxable)),
            igst_paise: parse_tax_component(field(columns.igst)),
            cgst_paise: parse_tax_component(field(columns.cgst)),
            sgst_paise: parse_tax_component(field(columns.sgst)),
            gstin,
            invoice_no,
            valid,
        });
    }

    log::debug!("loaded {} {} rows", records.len(), source_name);
    Ok(records)
}

/// Read both configured sources, resolving file paths against `base_dir`.
pub fn load_input(config: &ReconConfig, base_dir: &Path) -> Result<ReconInput, ReconError> {
    let primary = load_source("primary", config.primary.as_ref(), base_dir)?;
    let secondary = load_source("secondary", config.secondary.as_ref(), base_dir)?;
    Ok(ReconInput::new(primary, secondary))
}

fn load_source(
    source_name: &str,
    source: Option<&SourceConfig>,
    base_dir: &Path,
) -> Result<Vec<InvoiceRecord>, ReconError> {
    let source = source.ok_or_else(|| ReconError::MissingSource(source_name.into()))?;
    let path = base_dir.join(&source.file);
    let data = std::fs::read_to_string(&path)?;
    log::info!("reading {} source from {}", source_name, path.display());
    load_csv_records(source_name, &data, source)
}

struct Columns {
    record_id: Option<usize>,
    gstin: usize,
    invoice: usize,
    date: usize,
    taxable: usize,
    igst: usize,
    cgst: usize,
    sgst: usize,
    valid: Option<usize>,
}

impl Columns {
    fn resolve(
        source_name: &str,
        headers: &[String],
        mapping: &ColumnMapping,
    ) -> Result<Self, ReconError> {
        let idx = |name: &str| -> Result<usize, ReconError> {
            headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or_else(|| ReconError::MissingColumn {
                    source_name: source_name.into(),
                    column: name.into(),
                })
        };

        Ok(Self {
            record_id: mapping.record_id.as_deref().map(idx).transpose()?,
            gstin: idx(&mapping.gstin)?,
            invoice: idx(&mapping.invoice)?,
            date: idx(&mapping.date)?,
            taxable: idx(&mapping.taxable)?,
            igst: idx(&mapping.igst)?,
            cgst: idx(&mapping.cgst)?,
            sgst: idx(&mapping.sgst)?,
            valid: mapping.valid.as_deref().map(idx).transpose()?,
        })
    }
}

/// `"1,18,000.50"`, `"₹ 500"` -> paise. Blank, non-numeric or beyond
/// [`MAX_AMOUNT_PAISE`] -> `None`.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '₹' | '\u{a0}') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    let paise = (value * 100.0).round();
    if !paise.is_finite() || paise.abs() > MAX_AMOUNT_PAISE as f64 {
        return None;
    }
    Some(paise as i64)
}

/// Tax heads that do not apply to a supply are usually left blank.
fn parse_tax_component(raw: &str) -> Option<i64> {
    if raw.trim().is_empty() {
        Some(0)
    } else {
        parse_amount(raw)
    }
}

/// Day-first date parsing. Unparseable text is treated as a missing date.
pub fn parse_date(raw: &str, custom: Option<&str>) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    // Spreadsheet exports often carry a midnight time component.
    let day = raw.split_whitespace().next().unwrap_or(raw);
    custom
        .into_iter()
        .chain(DATE_FORMATS.iter().copied())
        .find_map(|fmt| {
            NaiveDate::parse_from_str(raw, fmt)
                .or_else(|_| NaiveDate::parse_from_str(day, fmt))
                .ok()
        })
}

fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "n" | "no" | "invalid"
    )
}
