use crate::keys::{gstin_malformed, normalize_gstin, normalize_invoice, MIN_INVOICE_KEY_LEN};
use crate::layers::LayerSpec;
use crate::model::{
    LayerStatistic, MatchResult, MatchStatus, MismatchAnalysis, PrimaryRecord, ReconSummary,
    SecondaryDisposition,
};

/// Accumulates one [`LayerStatistic`] per layer, in layer order.
#[derive(Debug, Default)]
pub struct LayerTally {
    stats: Vec<LayerStatistic>,
    cumulative: usize,
}

impl LayerTally {
    pub fn record(&mut self, spec: &LayerSpec, candidates: usize, resolved: usize) {
        self.cumulative += resolved;
        self.stats.push(LayerStatistic {
            layer: spec.number,
            name: spec.name.to_string(),
            enabled: true,
            candidates,
            resolved,
            cumulative_resolved: self.cumulative,
        });
    }

    pub fn skip(&mut self, spec: &LayerSpec) {
        self.stats.push(LayerStatistic {
            layer: spec.number,
            name: spec.name.to_string(),
            enabled: false,
            candidates: 0,
            resolved: 0,
            cumulative_resolved: self.cumulative,
        });
    }

    pub fn cumulative(&self) -> usize {
        self.cumulative
    }

    pub fn finish(self) -> Vec<LayerStatistic> {
        self.stats
    }
}

/// Compute summary statistics from final dispositions.
pub fn compute_summary(
    primary: &[PrimaryRecord],
    results: &[MatchResult],
    secondary: &[SecondaryDisposition],
) -> ReconSummary {
    let matched = results
        .iter()
        .filter(|r| r.status == MatchStatus::Matched)
        .count();
    let secondary_matched = secondary
        .iter()
        .filter(|d| d.status == MatchStatus::Matched)
        .count();

    ReconSummary {
        total_primary: results.len(),
        matched,
        unmatched: results.len() - matched,
        time_barred: results.iter().filter(|r| r.time_barred).count(),
        total_secondary: secondary.len(),
        secondary_matched,
        secondary_unmatched: secondary.len() - secondary_matched,
        analysis: analyze_mismatches(primary, results),
    }
}

/// Tally likely causes across unmatched primaries.
pub fn analyze_mismatches(primary: &[PrimaryRecord], results: &[MatchResult]) -> MismatchAnalysis {
    let mut analysis = MismatchAnalysis::default();

    for (record, result) in primary.iter().zip(results) {
        if result.status != MatchStatus::Unmatched {
            continue;
        }
        analysis.total_unmatched += 1;

        if normalize_invoice(&record.invoice_no).chars().count() < MIN_INVOICE_KEY_LEN {
            analysis.invoice_format_issues += 1;
        }
        if normalize_gstin(&record.gstin).is_empty() || gstin_malformed(record) {
            analysis.gstin_issues += 1;
        }
        if matches!(record.grand_total_paise(), None | Some(0)) {
            analysis.amount_issues += 1;
        }
        if record.invoice_date.is_none() {
            analysis.date_issues += 1;
        }
        if result.time_barred {
            analysis.time_barred += 1;
        }
    }

    analysis
}
