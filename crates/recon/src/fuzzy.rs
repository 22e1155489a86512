use std::cmp::Ordering;

/// Indel-normalized similarity of two normalized invoice numbers, 0-100.
pub fn similarity(a: &str, b: &str) -> f64 {
    rapidfuzz::fuzz::ratio(a.chars(), b.chars()) * 100.0
}

/// One scored candidate inside a GSTIN bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<'a> {
    pub idx: usize,
    pub record_id: &'a str,
    pub score: f64,
    pub delta_abs: u64,
}

/// Best candidate by score, then smaller amount delta, then smaller id.
/// Returns `None` if the winner scores below `threshold`.
pub fn pick_best<'a>(candidates: &[Scored<'a>], threshold: f64) -> Option<Scored<'a>> {
    let best = candidates.iter().min_by(|a, b| rank(a, b))?;
    (best.score >= threshold).then(|| best.clone())
}

fn rank(a: &Scored<'_>, b: &Scored<'_>) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.delta_abs.cmp(&b.delta_abs))
        .then_with(|| a.record_id.cmp(&b.record_id))
}
