use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audit::{format_rupees, AuditRecorder, MatchEvidence};
use crate::clubbing::{self, ClubCandidate, ClubTarget, ClubbingOutcome};
use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::fuzzy::{pick_best, similarity, Scored};
use crate::index::build_index;
use crate::keys::{blocking_defect, gstin_malformed, normalize_gstin, normalize_invoice};
use crate::layers::{LayerSpec, Strategy, LAYERS};
use crate::model::{
    InvoiceRecord, MatchResult, MatchStatus, ReconInput, ReconMeta, ReconResult, RemarkCode,
    SecondaryDisposition,
};
use crate::stats::{compute_summary, LayerTally};
use crate::tolerance::grand_delta;

/// Set to `true` from any thread to stop a run at the next layer boundary.
pub type CancelToken = Arc<AtomicBool>;

/// Run all enabled layers over `input`. Returns one result per primary record.
pub fn run(config: &ReconConfig, input: &ReconInput) -> Result<ReconResult, ReconError> {
    run_with_cancel(config, input, &CancelToken::default())
}

/// Like [`run`], but checks `cancel` before every layer.
pub fn run_with_cancel(
    config: &ReconConfig,
    input: &ReconInput,
    cancel: &CancelToken,
) -> Result<ReconResult, ReconError> {
    config.validate()?;
    ensure_unique_ids("primary", &input.primary)?;
    ensure_unique_ids("secondary", &input.secondary)?;

    log::info!(
        "reconciling {} purchase-register rows against {} GSTR-2B rows",
        input.primary.len(),
        input.secondary.len()
    );

    let mut state = RunState::new(input.primary.len());
    let mut audit = AuditRecorder::new(input.run_at);
    let mut tally = LayerTally::default();
    let mut resolutions: BTreeMap<usize, Resolution> = BTreeMap::new();

    let mut executed = 0;
    for spec in LAYERS.iter() {
        if !config.is_layer_enabled(spec.number) {
            tally.skip(spec);
            continue;
        }
        if cancel.load(Ordering::Relaxed) {
            log::warn!("run cancelled before layer {}", spec.number);
            return Err(ReconError::Cancelled {
                completed_layers: executed,
            });
        }

        let candidates = state.unresolved.len();
        let outcome = match spec.strategy {
            Strategy::Keyed => run_keyed_layer(spec, config, input, state),
            Strategy::Fuzzy => run_fuzzy_layer(spec, config, input, state),
            Strategy::Clubbing => run_clubbing_layer(spec, config, input, state),
        };
        state = outcome.state;

        let resolved = outcome.resolved.len();
        for res in outcome.resolved {
            let primary = &input.primary[res.primary];
            let secondary_ids = res
                .secondary
                .iter()
                .map(|&s| input.secondary[s].record_id.clone())
                .collect();
            audit.record_match(&primary.record_id, secondary_ids, spec.number, res.evidence.clone());
            resolutions.insert(res.primary, res);
        }
        tally.record(spec, candidates, resolved);
        executed += 1;

        log::info!(
            "layer {} ({}): resolved {} of {} ({} total)",
            spec.number,
            spec.name,
            resolved,
            candidates,
            tally.cumulative()
        );
    }

    Ok(finalize(config, input, state, resolutions, audit, tally))
}

fn ensure_unique_ids(source_name: &str, records: &[InvoiceRecord]) -> Result<(), ReconError> {
    let mut seen = BTreeSet::new();
    for record in records {
        if !seen.insert(record.record_id.as_str()) {
            return Err(ReconError::DuplicateRecordId {
                source_name: source_name.into(),
                record_id: record.record_id.clone(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// The shrinking pools, handed from layer to layer by value.
#[derive(Debug)]
struct RunState {
    /// Primary indices still waiting for a match, in input order.
    unresolved: BTreeSet<usize>,
    /// Secondary indices already claimed by some primary.
    consumed: BTreeSet<usize>,
    /// Diagnostics attached to a primary without resolving it.
    notes: BTreeMap<usize, Vec<String>>,
}

impl RunState {
    fn new(primary_len: usize) -> Self {
        Self {
            unresolved: (0..primary_len).collect(),
            consumed: BTreeSet::new(),
            notes: BTreeMap::new(),
        }
    }

    fn pending(&self) -> Vec<usize> {
        self.unresolved.iter().copied().collect()
    }

    fn claim(&mut self, primary: usize, secondary: &[usize]) {
        self.unresolved.remove(&primary);
        self.consumed.extend(secondary.iter().copied());
    }

    fn note(&mut self, primary: usize, note: String) {
        self.notes.entry(primary).or_default().push(note);
    }
}

#[derive(Debug, Clone)]
struct Resolution {
    primary: usize,
    /// Ordered by record id.
    secondary: Vec<usize>,
    layer: u8,
    code: RemarkCode,
    evidence: MatchEvidence,
}

struct LayerOutcome {
    state: RunState,
    resolved: Vec<Resolution>,
}

// ---------------------------------------------------------------------------
// Layers 1-6: exact key lookup
// ---------------------------------------------------------------------------

fn run_keyed_layer(
    spec: &LayerSpec,
    config: &ReconConfig,
    input: &ReconInput,
    mut state: RunState,
) -> LayerOutcome {
    let index = build_index(&input.secondary, &state.consumed, spec.number);
    let tolerance = spec.tolerance_paise(config);
    let mut resolved = Vec::new();

    for p in state.pending() {
        let primary = &input.primary[p];
        let Some(key) = spec.key(primary) else {
            continue;
        };
        let Some(bucket) = index.get(&key) else {
            continue;
        };

        let best = bucket
            .iter()
            .copied()
            .filter(|s| !state.consumed.contains(s))
            .filter(|&s| spec.amount_check.passes(primary, &input.secondary[s], tolerance))
            .min_by(|&a, &b| {
                let (ra, rb) = (&input.secondary[a], &input.secondary[b]);
                delta_abs(primary, ra)
                    .cmp(&delta_abs(primary, rb))
                    .then_with(|| ra.record_id.cmp(&rb.record_id))
            });
        let Some(s) = best else {
            continue;
        };

        let secondary = &input.secondary[s];
        let delta = grand_delta(primary, secondary);
        let mut detail = describe_match(spec, primary, &[secondary], delta);
        if spec.number == 6 {
            let (pg, sg) = (normalize_gstin(&primary.gstin), normalize_gstin(&secondary.gstin));
            if pg != sg {
                detail.push_str(&format!(". Note: Matched under different GSTIN {sg}"));
            }
        }

        log::debug!(
            "layer {}: {} -> {} on {}",
            spec.number,
            primary.record_id,
            secondary.record_id,
            key
        );
        state.claim(p, &[s]);
        resolved.push(Resolution {
            primary: p,
            secondary: vec![s],
            layer: spec.number,
            code: spec.remark_code,
            evidence: MatchEvidence {
                keys: vec![key.to_string()],
                amount_delta_paise: delta,
                similarity: None,
                detail,
            },
        });
    }

    LayerOutcome { state, resolved }
}

fn delta_abs(primary: &InvoiceRecord, secondary: &InvoiceRecord) -> u64 {
    grand_delta(primary, secondary).map_or(u64::MAX, i64::unsigned_abs)
}

// ---------------------------------------------------------------------------
// Layer 7: fuzzy invoice number within a GSTIN bucket
// ---------------------------------------------------------------------------

fn run_fuzzy_layer(
    spec: &LayerSpec,
    config: &ReconConfig,
    input: &ReconInput,
    mut state: RunState,
) -> LayerOutcome {
    let index = build_index(&input.secondary, &state.consumed, spec.number);
    let tolerance = spec.tolerance_paise(config);
    let mut resolved = Vec::new();

    for p in state.pending() {
        let primary = &input.primary[p];
        let Some(key) = spec.key(primary) else {
            continue;
        };
        let Some(bucket) = index.get(&key) else {
            continue;
        };

        let invoice = normalize_invoice(&primary.invoice_no);
        let scored: Vec<Scored<'_>> = bucket
            .iter()
            .copied()
            .filter(|s| !state.consumed.contains(s))
            .filter(|&s| spec.amount_check.passes(primary, &input.secondary[s], tolerance))
            .map(|s| {
                let secondary = &input.secondary[s];
                Scored {
                    idx: s,
                    record_id: &secondary.record_id,
                    score: similarity(&invoice, &normalize_invoice(&secondary.invoice_no)),
                    delta_abs: delta_abs(primary, secondary),
                }
            })
            .collect();
        let Some(best) = pick_best(&scored, config.fuzzy_threshold) else {
            continue;
        };

        let s = best.idx;
        let secondary = &input.secondary[s];
        let delta = grand_delta(primary, secondary);
        let detail = format!(
            "{} (Similarity: {:.1}%)",
            describe_match(spec, primary, &[secondary], delta),
            best.score
        );

        log::debug!(
            "layer {}: {} -> {} at {:.1}",
            spec.number,
            primary.record_id,
            secondary.record_id,
            best.score
        );
        state.claim(p, &[s]);
        resolved.push(Resolution {
            primary: p,
            secondary: vec![s],
            layer: spec.number,
            code: spec.remark_code,
            evidence: MatchEvidence {
                keys: vec![key.to_string()],
                amount_delta_paise: delta,
                similarity: Some(best.score),
                detail,
            },
        });
    }

    LayerOutcome { state, resolved }
}

// ---------------------------------------------------------------------------
// Layer 8: reverse clubbing within a GSTIN bucket
// ---------------------------------------------------------------------------

fn run_clubbing_layer(
    spec: &LayerSpec,
    config: &ReconConfig,
    input: &ReconInput,
    mut state: RunState,
) -> LayerOutcome {
    let index = build_index(&input.secondary, &state.consumed, spec.number);
    let tolerance = spec.tolerance_paise(config);
    let mut resolved = Vec::new();

    for p in state.pending() {
        let primary = &input.primary[p];
        let Some(key) = spec.key(primary) else {
            continue;
        };
        let (Some(taxable), Some(tax)) = (primary.taxable_paise, primary.total_tax_paise()) else {
            continue;
        };
        let Some(bucket) = index.get(&key) else {
            continue;
        };

        let candidates: Vec<ClubCandidate<'_>> = bucket
            .iter()
            .copied()
            .filter(|s| !state.consumed.contains(s))
            .filter_map(|s| {
                let r = &input.secondary[s];
                Some(ClubCandidate {
                    idx: s,
                    record_id: &r.record_id,
                    taxable: r.taxable_paise?,
                    tax: r.total_tax_paise()?,
                    date: r.invoice_date,
                })
            })
            .collect();
        if candidates.len() < config.clubbing.min_subset_size {
            continue;
        }

        let target = ClubTarget {
            taxable,
            tax,
            date: primary.invoice_date,
        };
        match clubbing::search(&candidates, &target, tolerance, &config.clubbing) {
            ClubbingOutcome::Found {
                members,
                taxable_sum,
                tax_sum,
                nodes_visited,
                cap_hit,
                ..
            } => {
                let group: Vec<&InvoiceRecord> =
                    members.iter().map(|&s| &input.secondary[s]).collect();
                let delta = primary
                    .grand_total_paise()
                    .zip(taxable_sum.checked_add(tax_sum))
                    .and_then(|(g, sum)| g.checked_sub(sum));
                let rows = match members.len() {
                    1 => "1 GSTR-2B row".to_string(),
                    n => format!("{n} GSTR-2B rows clubbed"),
                };
                let mut detail = format!(
                    "{} ({}, Taxable: ₹{}, Tax: ₹{})",
                    describe_match(spec, primary, &group, delta),
                    rows,
                    format_rupees(taxable_sum),
                    format_rupees(tax_sum)
                );
                if cap_hit {
                    log::warn!(
                        "layer 8: search budget exhausted for {} after {} nodes",
                        primary.record_id,
                        nodes_visited
                    );
                    detail.push_str(". Note: search budget exhausted, group may not be minimal");
                }

                log::debug!(
                    "layer 8: {} -> {:?}",
                    primary.record_id,
                    group.iter().map(|r| r.record_id.as_str()).collect::<Vec<_>>()
                );
                state.claim(p, &members);
                resolved.push(Resolution {
                    primary: p,
                    secondary: members,
                    layer: spec.number,
                    code: spec.remark_code,
                    evidence: MatchEvidence {
                        keys: vec![key.to_string()],
                        amount_delta_paise: delta,
                        similarity: None,
                        detail,
                    },
                });
            }
            ClubbingOutcome::NotFound {
                nodes_visited,
                cap_hit: true,
            } => {
                log::warn!(
                    "layer 8: search budget exhausted for {} after {} nodes",
                    primary.record_id,
                    nodes_visited
                );
                state.note(
                    p,
                    format!("clubbing search stopped after {nodes_visited} nodes"),
                );
            }
            ClubbingOutcome::NotFound { .. } => {}
            ClubbingOutcome::BucketTooLarge { size } => {
                log::warn!(
                    "layer 8: skipped {} ({} candidates exceed limit {})",
                    primary.record_id,
                    size,
                    config.clubbing.max_candidates
                );
                state.note(
                    p,
                    format!(
                        "clubbing skipped, {size} candidates exceed limit {}",
                        config.clubbing.max_candidates
                    ),
                );
            }
        }
    }

    LayerOutcome { state, resolved }
}

// ---------------------------------------------------------------------------
// Remarks
// ---------------------------------------------------------------------------

/// `Matched: GSTIN, Invoice Number, Grand Total, Date (Diff: ₹0.50)`.
/// `Date` is listed only when every matched row carries the primary's date.
fn describe_match(
    spec: &LayerSpec,
    primary: &InvoiceRecord,
    matched: &[&InvoiceRecord],
    delta: Option<i64>,
) -> String {
    let mut fields: Vec<&str> = spec.fields.to_vec();
    let dates_agree = primary.invoice_date.is_some()
        && matched.iter().all(|r| r.invoice_date == primary.invoice_date);
    if dates_agree {
        fields.push("Date");
    }
    let mut text = format!("Matched: {}", fields.join(", "));
    if let Some(d) = delta.filter(|&d| d != 0) {
        text.push_str(&format!(" (Diff: ₹{})", format_rupees(d)));
    }
    text
}

fn describe_non_match(record: &InvoiceRecord, notes: Option<&Vec<String>>) -> (RemarkCode, String) {
    let code = blocking_defect(record).unwrap_or(RemarkCode::NotFound);

    let mut issues: Vec<String> = Vec::new();
    match code {
        RemarkCode::InvalidRecord => issues.push("record flagged invalid upstream".into()),
        RemarkCode::MissingGstin => issues.push("GSTIN missing".into()),
        RemarkCode::BlankInvoice => issues.push("invoice number blank".into()),
        RemarkCode::MissingAmount => issues.push("amount missing or non-numeric".into()),
        _ => {}
    }
    if gstin_malformed(record) {
        issues.push("GSTIN is not 15 characters".into());
    }
    if record.invoice_date.is_none() {
        issues.push("invoice date missing".into());
    }
    if let Some(notes) = notes {
        issues.extend(notes.iter().cloned());
    }

    let mut text = String::from("Mismatch: no GSTR-2B record matched at any enabled layer");
    if !issues.is_empty() {
        text.push_str(&format!(" ({})", issues.join("; ")));
    }
    (code, text)
}

// ---------------------------------------------------------------------------
// Finalize
// ---------------------------------------------------------------------------

fn finalize(
    config: &ReconConfig,
    input: &ReconInput,
    state: RunState,
    resolutions: BTreeMap<usize, Resolution>,
    mut audit: AuditRecorder,
    tally: LayerTally,
) -> ReconResult {
    let cutoff = config.time_barred_cutoff;
    let warning = format!(
        ". Warning: time-barred, invoice dated before {}",
        cutoff.format("%d-%m-%Y")
    );

    let mut consumed_by: BTreeMap<usize, (&str, u8)> = BTreeMap::new();
    let mut results = Vec::with_capacity(input.primary.len());

    for (p, record) in input.primary.iter().enumerate() {
        let time_barred = record.invoice_date.is_some_and(|d| d < cutoff);

        let mut result = match resolutions.get(&p) {
            Some(res) => {
                let layer = res.layer;
                for &s in &res.secondary {
                    consumed_by.insert(s, (record.record_id.as_str(), layer));
                }
                let mut matched_ids: Vec<String> = res
                    .secondary
                    .iter()
                    .map(|&s| input.secondary[s].record_id.clone())
                    .collect();
                matched_ids.sort();
                MatchResult {
                    record_id: record.record_id.clone(),
                    status: MatchStatus::Matched,
                    layer: Some(layer),
                    matched_ids,
                    remark: res.evidence.detail.clone(),
                    remark_code: res.code,
                    time_barred,
                }
            }
            None => {
                let (code, remark) = describe_non_match(record, state.notes.get(&p));
                audit.record_non_match(&record.record_id, remark.clone());
                MatchResult {
                    record_id: record.record_id.clone(),
                    status: MatchStatus::Unmatched,
                    layer: None,
                    matched_ids: Vec::new(),
                    remark,
                    remark_code: code,
                    time_barred,
                }
            }
        };
        if time_barred {
            result.remark.push_str(&warning);
        }
        results.push(result);
    }

    let secondary: Vec<SecondaryDisposition> = input
        .secondary
        .iter()
        .enumerate()
        .map(|(s, record)| match consumed_by.get(&s) {
            Some(&(primary_id, layer)) => SecondaryDisposition {
                record_id: record.record_id.clone(),
                status: MatchStatus::Matched,
                matched_primary_id: Some(primary_id.to_string()),
                layer: Some(layer),
            },
            None => SecondaryDisposition {
                record_id: record.record_id.clone(),
                status: MatchStatus::Unmatched,
                matched_primary_id: None,
                layer: None,
            },
        })
        .collect();

    let summary = compute_summary(&input.primary, &results, &secondary);
    log::info!(
        "matched {} of {} ({} unmatched, {} time-barred)",
        summary.matched,
        summary.total_primary,
        summary.unmatched,
        summary.time_barred
    );

    ReconResult {
        meta: ReconMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: input.run_at,
            enabled_layers: config.enabled_layers.iter().copied().collect(),
        },
        summary,
        layers: tally.finish(),
        results,
        audit: audit.into_entries(),
        secondary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    const GSTIN: &str = "27ABCDE1234F1Z5";

    fn rs(rupees: i64) -> Option<i64> {
        Some(rupees * 100)
    }

    fn rec(id: &str, gstin: &str, inv: &str, taxable: i64, tax: i64) -> InvoiceRecord {
        InvoiceRecord {
            record_id: id.into(),
            gstin: gstin.into(),
            invoice_no: inv.into(),
            invoice_date: NaiveDate::from_ymd_opt(2024, 6, 15),
            taxable_paise: rs(taxable),
            igst_paise: rs(tax),
            cgst_paise: Some(0),
            sgst_paise: Some(0),
            valid: true,
        }
    }

    fn input(primary: Vec<InvoiceRecord>, secondary: Vec<InvoiceRecord>) -> ReconInput {
        ReconInput::new(primary, secondary)
            .with_run_at(Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap())
    }

    fn run_default(primary: Vec<InvoiceRecord>, secondary: Vec<InvoiceRecord>) -> ReconResult {
        run(&ReconConfig::default(), &input(primary, secondary)).unwrap()
    }

    #[test]
    fn identical_records_match_strictly() {
        let r = run_default(
            vec![rec("p1", GSTIN, "INV-001", 1000, 180)],
            vec![rec("s1", GSTIN, "INV-001", 1000, 180)],
        );
        let m = &r.results[0];
        assert_eq!(m.status, MatchStatus::Matched);
        assert_eq!(m.layer, Some(1));
        assert_eq!(m.remark_code, RemarkCode::StrictMatch);
        assert_eq!(m.matched_ids, vec!["s1"]);
        assert_eq!(
            m.remark,
            "Matched: GSTIN, Invoice Number, Taxable Value, Tax, Date"
        );
    }

    #[test]
    fn split_difference_falls_to_grand_total() {
        let r = run_default(
            vec![rec("p1", GSTIN, "INV-001", 1000, 180)],
            vec![rec("s1", GSTIN, "INV-001", 1010, 170)],
        );
        assert_eq!(r.results[0].layer, Some(2));
        assert_eq!(r.results[0].remark_code, RemarkCode::GrandTotalMatch);
    }

    #[test]
    fn high_tolerance_layer() {
        let r = run_default(
            vec![rec("p1", GSTIN, "INV-001", 1000, 180)],
            vec![rec("s1", GSTIN, "INV-001", 1030, 180)],
        );
        assert_eq!(r.results[0].layer, Some(3));
        assert!(r.results[0].remark.contains("(Diff: ₹-30.00)"));
    }

    #[test]
    fn digits_only_layer() {
        let r = run_default(
            vec![rec("p1", GSTIN, "GST/01", 1000, 180)],
            vec![rec("s1", GSTIN, "01", 1000, 180)],
        );
        assert_eq!(r.results[0].layer, Some(4));
    }

    #[test]
    fn last_four_digits_layer() {
        let r = run_default(
            vec![rec("p1", GSTIN, "WB1-0995", 1000, 180)],
            vec![rec("s1", GSTIN, "XX2-0995", 1000, 180)],
        );
        assert_eq!(r.results[0].layer, Some(5));
    }

    #[test]
    fn shared_digits_resolve_before_last_four() {
        let primary = vec![rec("p1", GSTIN, "WB-0995", 1000, 180)];
        let secondary = vec![rec("s1", GSTIN, "XX-0995", 1000, 180)];

        let r = run_default(primary.clone(), secondary.clone());
        assert_eq!(r.results[0].layer, Some(4));
        assert_eq!(r.results[0].remark_code, RemarkCode::NumericInvoiceMatch);

        let config = ReconConfig {
            enabled_layers: [1, 2, 3, 5, 6, 7, 8].into_iter().collect(),
            ..ReconConfig::default()
        };
        let r = run(&config, &input(primary, secondary)).unwrap();
        assert_eq!(r.results[0].layer, Some(5));
        assert_eq!(r.results[0].remark_code, RemarkCode::LastFourDigitsMatch);
        assert_eq!(r.results[0].matched_ids, vec!["s1"]);
    }

    #[test]
    fn pan_level_layer_notes_other_gstin() {
        let r = run_default(
            vec![rec("p1", GSTIN, "INV-77", 1000, 180)],
            vec![rec("s1", "27ABCDE1234F2Z4", "INV-77", 1000, 180)],
        );
        assert_eq!(r.results[0].layer, Some(6));
        assert!(r.results[0]
            .remark
            .contains("Note: Matched under different GSTIN 27ABCDE1234F2Z4"));
    }

    #[test]
    fn fuzzy_layer_respects_threshold() {
        let primary = vec![rec("p1", GSTIN, "9855", 1000, 180)];
        let secondary = vec![rec("s1", GSTIN, "9885", 1000, 180)];

        // Below the threshold the pair only agrees on amounts, which layer 8 accepts.
        let strict = run_default(primary.clone(), secondary.clone());
        assert_eq!(strict.results[0].layer, Some(8));
        assert_eq!(strict.results[0].remark_code, RemarkCode::ReverseClubbing);

        let config = ReconConfig {
            fuzzy_threshold: 70.0,
            ..ReconConfig::default()
        };
        let r = run(&config, &input(primary, secondary)).unwrap();
        assert_eq!(r.results[0].layer, Some(7));
        let entry = &r.audit[0];
        assert_eq!(entry.similarity, Some(75.0));
        assert!(entry.detail.ends_with("(Similarity: 75.0%)"));
    }

    #[test]
    fn reverse_clubbing_layer() {
        let r = run_default(
            vec![rec("p1", GSTIN, "INV-900", 3000, 540)],
            vec![
                rec("s2", GSTIN, "INV-901", 2000, 360),
                rec("s1", GSTIN, "INV-902", 1000, 180),
            ],
        );
        let m = &r.results[0];
        assert_eq!(m.layer, Some(8));
        assert_eq!(m.remark_code, RemarkCode::ReverseClubbing);
        assert_eq!(m.matched_ids, vec!["s1", "s2"]);
        assert!(r.secondary.iter().all(|d| d.status == MatchStatus::Matched));
    }

    #[test]
    fn single_row_with_unrelated_invoice_matches_at_layer_eight() {
        let r = run_default(
            vec![rec("p1", GSTIN, "AAA-1", 3000, 540)],
            vec![rec("s1", GSTIN, "ZZZ-9", 3000, 540)],
        );
        let m = &r.results[0];
        assert_eq!(m.status, MatchStatus::Matched);
        assert_eq!(m.layer, Some(8));
        assert_eq!(m.matched_ids, vec!["s1"]);
        assert!(m.remark.contains("(1 GSTR-2B row, Taxable: ₹3000.00, Tax: ₹540.00)"));

        let config = ReconConfig {
            clubbing: crate::config::ClubbingConfig {
                min_subset_size: 2,
                ..Default::default()
            },
            ..ReconConfig::default()
        };
        let r = run(
            &config,
            &input(
                vec![rec("p1", GSTIN, "AAA-1", 3000, 540)],
                vec![rec("s1", GSTIN, "ZZZ-9", 3000, 540)],
            ),
        )
        .unwrap();
        assert_eq!(r.results[0].status, MatchStatus::Unmatched);
    }

    #[test]
    fn extreme_amounts_do_not_overflow() {
        let mut huge = rec("p1", GSTIN, "INV-001", 0, 0);
        huge.taxable_paise = Some(i64::MAX);
        huge.igst_paise = Some(i64::MAX);
        let mut huge_twin = huge.clone();
        huge_twin.record_id = "s1".into();
        let mut big_a = rec("s2", GSTIN, "A-1", 0, 0);
        big_a.taxable_paise = Some(i64::MAX);
        let mut big_b = big_a.clone();
        big_b.record_id = "s3".into();
        big_b.invoice_no = "A-2".into();

        let r = run_default(
            vec![huge, rec("p2", GSTIN, "INV-900", 3000, 540)],
            vec![huge_twin, big_a, big_b],
        );
        assert_eq!(r.results[0].layer, Some(1));
        assert_eq!(r.audit[0].amount_delta_paise, None);
        assert_eq!(r.results[1].status, MatchStatus::Unmatched);
        assert_eq!(r.results[1].remark_code, RemarkCode::NotFound);
    }

    #[test]
    fn secondary_consumed_once() {
        let r = run_default(
            vec![
                rec("p1", GSTIN, "INV-001", 1000, 180),
                rec("p2", GSTIN, "INV-001", 1000, 180),
            ],
            vec![rec("s1", GSTIN, "INV-001", 1000, 180)],
        );
        assert_eq!(r.results[0].status, MatchStatus::Matched);
        assert_eq!(r.results[1].status, MatchStatus::Unmatched);
        assert_eq!(r.summary.matched, 1);
        assert_eq!(r.secondary[0].matched_primary_id.as_deref(), Some("p1"));
    }

    #[test]
    fn smallest_delta_then_id_wins() {
        let r = run_default(
            vec![rec("p1", GSTIN, "INV-001", 1000, 180)],
            vec![
                rec("s3", GSTIN, "INV-001", 1001, 180),
                rec("s2", GSTIN, "INV-001", 1000, 180),
                rec("s1", GSTIN, "INV-001", 1000, 180),
            ],
        );
        assert_eq!(r.results[0].matched_ids, vec!["s1"]);
    }

    #[test]
    fn disabled_layers_are_skipped_not_renumbered() {
        let config = ReconConfig {
            enabled_layers: [1, 3].into_iter().collect(),
            ..ReconConfig::default()
        };
        let r = run(
            &config,
            &input(
                vec![rec("p1", GSTIN, "INV-001", 1000, 180)],
                vec![rec("s1", GSTIN, "INV-001", 1010, 170)],
            ),
        )
        .unwrap();
        assert_eq!(r.results[0].layer, Some(3));
        assert_eq!(r.layers.len(), 8);
        assert!(!r.layers[1].enabled);
        assert_eq!(r.layers[2].resolved, 1);
    }

    #[test]
    fn defects_are_reported_on_unmatched() {
        let mut invalid = rec("p1", GSTIN, "INV-001", 1000, 180);
        invalid.valid = false;
        let no_gstin = rec("p2", "  ", "INV-002", 1000, 180);
        let mut no_amount = rec("p3", GSTIN, "INV-003", 1000, 180);
        no_amount.taxable_paise = None;
        let mut short = rec("p4", "27ABC", "INV-004", 1000, 180);
        short.invoice_date = None;

        let r = run_default(
            vec![invalid, no_gstin, no_amount, short],
            vec![rec("s1", GSTIN, "INV-001", 1000, 180)],
        );
        assert_eq!(r.results[0].remark_code, RemarkCode::InvalidRecord);
        assert_eq!(r.results[1].remark_code, RemarkCode::MissingGstin);
        assert_eq!(r.results[2].remark_code, RemarkCode::MissingAmount);
        assert_eq!(r.results[3].remark_code, RemarkCode::NotFound);
        assert!(r.results[3].remark.contains("GSTIN is not 15 characters"));
        assert!(r.results[3].remark.contains("invoice date missing"));
        assert_eq!(r.secondary[0].status, MatchStatus::Unmatched);
    }

    #[test]
    fn time_barred_flag_is_independent_of_status() {
        let mut old = rec("p1", GSTIN, "INV-001", 1000, 180);
        old.invoice_date = NaiveDate::from_ymd_opt(2024, 3, 30);
        let mut orphan = rec("p2", GSTIN, "INV-404", 10, 1);
        orphan.invoice_date = NaiveDate::from_ymd_opt(2023, 12, 1);
        let mut on_cutoff = rec("p3", GSTIN, "INV-003", 500, 90);
        on_cutoff.invoice_date = NaiveDate::from_ymd_opt(2024, 3, 31);

        let r = run_default(
            vec![old, orphan, on_cutoff],
            vec![rec("s1", GSTIN, "INV-001", 1000, 180)],
        );
        assert!(r.results[0].time_barred);
        assert_eq!(r.results[0].status, MatchStatus::Matched);
        assert!(r.results[0].remark.contains("Warning: time-barred"));
        assert!(r.results[1].time_barred);
        assert!(!r.results[2].time_barred);
        assert_eq!(r.summary.time_barred, 2);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = run(
            &ReconConfig::default(),
            &input(
                vec![
                    rec("p1", GSTIN, "INV-001", 1000, 180),
                    rec("p1", GSTIN, "INV-002", 1000, 180),
                ],
                vec![],
            ),
        )
        .unwrap_err();
        assert!(matches!(err, ReconError::DuplicateRecordId { .. }));
    }

    #[test]
    fn invalid_config_rejected_before_layers() {
        let config = ReconConfig {
            fuzzy_threshold: f64::NAN,
            ..ReconConfig::default()
        };
        let err = run(&config, &input(vec![], vec![])).unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
    }

    #[test]
    fn cancellation_stops_between_layers() {
        let cancel = CancelToken::default();
        cancel.store(true, Ordering::Relaxed);
        let err = run_with_cancel(
            &ReconConfig::default(),
            &input(vec![rec("p1", GSTIN, "INV-001", 1000, 180)], vec![]),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, ReconError::Cancelled { completed_layers: 0 }));

        // Disabled layers ahead of the first enabled one were never run.
        let config = ReconConfig {
            enabled_layers: [5, 6, 7, 8].into_iter().collect(),
            ..ReconConfig::default()
        };
        let err = run_with_cancel(
            &config,
            &input(vec![rec("p1", GSTIN, "INV-001", 1000, 180)], vec![]),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, ReconError::Cancelled { completed_layers: 0 }));
    }

    #[test]
    fn oversized_bucket_is_noted() {
        let config = ReconConfig {
            clubbing: crate::config::ClubbingConfig {
                max_candidates: 2,
                ..Default::default()
            },
            ..ReconConfig::default()
        };
        let secondary = (1..=3)
            .map(|i| rec(&format!("s{i}"), GSTIN, &format!("X-{i}"), 1000, 180))
            .collect();
        let r = run(
            &config,
            &input(vec![rec("p1", GSTIN, "INV-900", 2000, 360)], secondary),
        )
        .unwrap();
        assert_eq!(r.results[0].status, MatchStatus::Unmatched);
        assert!(r.results[0].remark.contains("clubbing skipped, 3 candidates exceed limit 2"));
    }

    #[test]
    fn accounting_and_audit_agree() {
        let r = run_default(
            vec![
                rec("p1", GSTIN, "INV-001", 1000, 180),
                rec("p2", GSTIN, "GST/01", 500, 90),
                rec("p3", GSTIN, "INV-900", 3000, 540),
                rec("p4", "29AAAAA0000A1Z5", "NOPE-1", 10, 0),
            ],
            vec![
                rec("s1", GSTIN, "INV-001", 1000, 180),
                rec("s2", GSTIN, "01", 500, 90),
                rec("s3", GSTIN, "A-11", 1000, 180),
                rec("s4", GSTIN, "A-12", 2000, 360),
            ],
        );

        let resolved: usize = r.layers.iter().map(|l| l.resolved).sum();
        assert_eq!(resolved + r.summary.unmatched, r.summary.total_primary);
        assert_eq!(r.layers.last().unwrap().cumulative_resolved, 3);

        // Matched audit entries reconstruct every matched set.
        for m in r.results.iter().filter(|m| m.status == MatchStatus::Matched) {
            let entry = r
                .audit
                .iter()
                .find(|e| e.primary_id == m.record_id && e.decision == MatchStatus::Matched)
                .unwrap();
            let mut ids = entry.secondary_ids.clone();
            ids.sort();
            assert_eq!(ids, m.matched_ids);
            assert_eq!(entry.layer, m.layer);
        }
        assert_eq!(r.audit.len(), 4);
        assert_eq!(r.audit.last().unwrap().primary_id, "p4");
        assert_eq!(r.audit.last().unwrap().decision, MatchStatus::Unmatched);
    }

    #[test]
    fn idempotent_json() {
        let make = || {
            input(
                vec![
                    rec("p1", GSTIN, "INV-001", 1000, 180),
                    rec("p2", GSTIN, "INV-900", 3000, 540),
                ],
                vec![
                    rec("s1", GSTIN, "INV-001", 1000, 180),
                    rec("s2", GSTIN, "A-1", 1000, 180),
                    rec("s3", GSTIN, "A-2", 2000, 360),
                ],
            )
        };
        let a = serde_json::to_string(&run(&ReconConfig::default(), &make()).unwrap()).unwrap();
        let b = serde_json::to_string(&run(&ReconConfig::default(), &make()).unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
