//! Reverse clubbing: one primary invoice against several secondary rows.
//!
//! Bounded subset search over same-GSTIN candidates. Sizes are tried in
//! increasing order so the first size with any solution is the minimal one;
//! within that size the closest dates win, then the smallest id list.

use chrono::NaiveDate;

use crate::config::ClubbingConfig;

/// A secondary row eligible for clubbing. `idx` is its arena index.
#[derive(Debug, Clone)]
pub struct ClubCandidate<'a> {
    pub idx: usize,
    pub record_id: &'a str,
    pub taxable: i64,
    pub tax: i64,
    pub date: Option<NaiveDate>,
}

/// The primary amounts a group has to add up to.
#[derive(Debug, Clone, Copy)]
pub struct ClubTarget {
    pub taxable: i64,
    pub tax: i64,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClubbingOutcome {
    Found {
        /// Arena indices, ordered by record id.
        members: Vec<usize>,
        taxable_sum: i64,
        tax_sum: i64,
        date_distance_days: u64,
        nodes_visited: u64,
        cap_hit: bool,
    },
    NotFound {
        nodes_visited: u64,
        cap_hit: bool,
    },
    /// Too many candidates survived pruning; the bucket was not searched.
    BucketTooLarge { size: usize },
}

/// Search `candidates` for the best group matching `target`.
pub fn search(
    candidates: &[ClubCandidate<'_>],
    target: &ClubTarget,
    tolerance: i64,
    config: &ClubbingConfig,
) -> ClubbingOutcome {
    let mut pool = prune(candidates, target, tolerance);
    if pool.len() > config.max_candidates {
        return ClubbingOutcome::BucketTooLarge { size: pool.len() };
    }
    pool.sort_by(|a, b| a.record_id.cmp(&b.record_id));

    let mut state = Search {
        pool: &pool,
        target,
        tolerance,
        non_negative: pool.iter().all(|c| c.taxable >= 0 && c.tax >= 0),
        max_nodes: config.max_nodes as u64,
        nodes_visited: 0,
        cap_hit: false,
        stack: Vec::new(),
        best: None,
    };

    let max_size = config.max_subset_size.min(pool.len());
    for size in config.min_subset_size..=max_size {
        state.dfs(size, 0, 0, 0);
        if state.best.is_some() || state.cap_hit {
            break;
        }
    }

    match state.best {
        Some(best) => {
            let members: Vec<usize> = best.positions.iter().map(|&p| pool[p].idx).collect();
            ClubbingOutcome::Found {
                members,
                taxable_sum: best.taxable_sum,
                tax_sum: best.tax_sum,
                date_distance_days: best.date_distance,
                nodes_visited: state.nodes_visited,
                cap_hit: state.cap_hit,
            }
        }
        None => ClubbingOutcome::NotFound {
            nodes_visited: state.nodes_visited,
            cap_hit: state.cap_hit,
        },
    }
}

/// With all-positive amounts, a single row already larger than the target
/// can never be part of a matching group.
fn prune<'a>(
    candidates: &[ClubCandidate<'a>],
    target: &ClubTarget,
    tolerance: i64,
) -> Vec<ClubCandidate<'a>> {
    let non_negative = candidates.iter().all(|c| c.taxable >= 0 && c.tax >= 0);
    if !non_negative {
        return candidates.to_vec();
    }
    candidates
        .iter()
        .filter(|c| {
            c.taxable <= target.taxable.saturating_add(tolerance)
                && c.tax <= target.tax.saturating_add(tolerance)
        })
        .cloned()
        .collect()
}

struct Best {
    positions: Vec<usize>,
    taxable_sum: i64,
    tax_sum: i64,
    date_distance: u64,
}

struct Search<'p, 'a> {
    pool: &'p [ClubCandidate<'a>],
    target: &'p ClubTarget,
    tolerance: i64,
    non_negative: bool,
    max_nodes: u64,
    nodes_visited: u64,
    cap_hit: bool,
    stack: Vec<usize>,
    best: Option<Best>,
}

impl Search<'_, '_> {
    fn dfs(&mut self, size: usize, start: usize, taxable_sum: i64, tax_sum: i64) {
        if self.cap_hit {
            return;
        }
        self.nodes_visited += 1;
        if self.nodes_visited >= self.max_nodes {
            self.cap_hit = true;
            return;
        }

        if self.stack.len() == size {
            if taxable_sum.abs_diff(self.target.taxable) <= self.tolerance.unsigned_abs()
                && tax_sum.abs_diff(self.target.tax) <= self.tolerance.unsigned_abs()
            {
                self.consider(taxable_sum, tax_sum);
            }
            return;
        }

        if self.non_negative
            && (taxable_sum > self.target.taxable.saturating_add(self.tolerance)
                || tax_sum > self.target.tax.saturating_add(self.tolerance))
        {
            return;
        }

        let remaining = size - self.stack.len();
        for i in start..=(self.pool.len() - remaining) {
            // A group whose sum overflows cannot match any real target.
            let (Some(next_taxable), Some(next_tax)) = (
                taxable_sum.checked_add(self.pool[i].taxable),
                tax_sum.checked_add(self.pool[i].tax),
            ) else {
                continue;
            };
            self.stack.push(i);
            self.dfs(size, i + 1, next_taxable, next_tax);
            self.stack.pop();
            if self.cap_hit {
                return;
            }
        }
    }

    fn consider(&mut self, taxable_sum: i64, tax_sum: i64) {
        let date_distance = self
            .stack
            .iter()
            .map(|&p| date_distance(self.pool[p].date, self.target.date))
            .fold(0u64, u64::saturating_add);

        let better = match &self.best {
            None => true,
            Some(best) => {
                date_distance < best.date_distance
                    || (date_distance == best.date_distance && self.ids_before(&best.positions))
            }
        };
        if better {
            self.best = Some(Best {
                positions: self.stack.clone(),
                taxable_sum,
                tax_sum,
                date_distance,
            });
        }
    }

    fn ids_before(&self, other: &[usize]) -> bool {
        let mine = self.stack.iter().map(|&p| self.pool[p].record_id);
        let theirs = other.iter().map(|&p| self.pool[p].record_id);
        mine.lt(theirs)
    }
}

/// Absolute day distance. An unknown date on either side ranks last.
fn date_distance(member: Option<NaiveDate>, target: Option<NaiveDate>) -> u64 {
    match (member, target) {
        (Some(m), Some(t)) => (m - t).num_days().unsigned_abs(),
        _ => u64::from(u32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Option<NaiveDate> {
        Some(NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap())
    }

    fn cand(idx: usize, id: &'static str, taxable: i64, date: &str) -> ClubCandidate<'static> {
        ClubCandidate {
            idx,
            record_id: id,
            taxable,
            tax: 0,
            date: d(date),
        }
    }

    fn target(taxable: i64, date: &str) -> ClubTarget {
        ClubTarget {
            taxable,
            tax: 0,
            date: d(date),
        }
    }

    fn members(outcome: &ClubbingOutcome) -> Vec<usize> {
        match outcome {
            ClubbingOutcome::Found { members, .. } => members.clone(),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn two_rows_sum_to_target() {
        let c = vec![
            cand(10, "s1", 100_000, "2024-05-01"),
            cand(11, "s2", 200_000, "2024-05-02"),
        ];
        let out = search(&c, &target(300_000, "2024-05-01"), 200, &ClubbingConfig::default());
        assert_eq!(members(&out), vec![10, 11]);
        if let ClubbingOutcome::Found { taxable_sum, date_distance_days, .. } = out {
            assert_eq!(taxable_sum, 300_000);
            assert_eq!(date_distance_days, 1);
        }
    }

    #[test]
    fn single_row_matches_by_default() {
        let c = vec![cand(0, "s1", 300_000, "2024-05-01")];
        let out = search(&c, &target(300_000, "2024-05-01"), 0, &ClubbingConfig::default());
        assert_eq!(members(&out), vec![0]);

        let config = ClubbingConfig {
            min_subset_size: 2,
            ..ClubbingConfig::default()
        };
        let out = search(&c, &target(300_000, "2024-05-01"), 0, &config);
        assert!(matches!(out, ClubbingOutcome::NotFound { .. }));
    }

    #[test]
    fn minimal_subset_preferred() {
        let c = vec![
            cand(0, "s1", 50_000, "2024-05-01"),
            cand(1, "s2", 50_000, "2024-05-01"),
            cand(2, "s3", 200_000, "2024-05-01"),
            cand(3, "s4", 100_000, "2024-09-30"),
        ];
        // {s1, s2, s3} and {s3, s4} both sum to 300_000; the pair wins despite worse dates.
        let out = search(&c, &target(300_000, "2024-05-01"), 0, &ClubbingConfig::default());
        assert_eq!(members(&out), vec![2, 3]);
    }

    #[test]
    fn closest_dates_break_size_ties() {
        let c = vec![
            cand(0, "s1", 100_000, "2024-01-01"),
            cand(1, "s2", 200_000, "2024-01-01"),
            cand(2, "s3", 100_000, "2024-05-02"),
            cand(3, "s4", 200_000, "2024-05-03"),
        ];
        let out = search(&c, &target(300_000, "2024-05-01"), 0, &ClubbingConfig::default());
        assert_eq!(members(&out), vec![2, 3]);
    }

    #[test]
    fn ids_break_full_ties() {
        let c = vec![
            cand(0, "s4", 100_000, "2024-05-01"),
            cand(1, "s3", 200_000, "2024-05-01"),
            cand(2, "s2", 100_000, "2024-05-01"),
            cand(3, "s1", 200_000, "2024-05-01"),
        ];
        let out = search(&c, &target(300_000, "2024-05-01"), 0, &ClubbingConfig::default());
        // {s1, s2} is lexicographically smallest among equivalent pairs.
        assert_eq!(members(&out), vec![3, 2]);
    }

    #[test]
    fn tax_must_also_agree() {
        let mut c = vec![
            cand(0, "s1", 100_000, "2024-05-01"),
            cand(1, "s2", 200_000, "2024-05-01"),
        ];
        c[0].tax = 18_000;
        c[1].tax = 30_000;
        let t = ClubTarget {
            taxable: 300_000,
            tax: 54_000,
            date: d("2024-05-01"),
        };
        let out = search(&c, &t, 200, &ClubbingConfig::default());
        assert!(matches!(out, ClubbingOutcome::NotFound { .. }));
    }

    #[test]
    fn credit_notes_disable_pruning() {
        let c = vec![
            cand(0, "s1", 400_000, "2024-05-01"),
            cand(1, "s2", -100_000, "2024-05-01"),
        ];
        let out = search(&c, &target(300_000, "2024-05-01"), 0, &ClubbingConfig::default());
        assert_eq!(members(&out), vec![0, 1]);
    }

    #[test]
    fn overflowing_groups_are_skipped() {
        let c = vec![
            cand(0, "s1", i64::MAX, "2024-05-01"),
            cand(1, "s2", i64::MAX, "2024-05-01"),
            cand(2, "s3", -1, "2024-05-01"),
        ];
        let out = search(&c, &target(i64::MAX - 1, "2024-05-01"), 0, &ClubbingConfig::default());
        assert_eq!(members(&out), vec![0, 2]);
    }

    #[test]
    fn oversized_bucket_skipped() {
        let c: Vec<_> = (0..5).map(|i| cand(i, "s", 1_000, "2024-05-01")).collect();
        let config = ClubbingConfig {
            max_candidates: 4,
            ..ClubbingConfig::default()
        };
        let out = search(&c, &target(2_000, "2024-05-01"), 0, &config);
        assert_eq!(out, ClubbingOutcome::BucketTooLarge { size: 5 });
    }

    #[test]
    fn pruning_happens_before_bucket_limit() {
        let mut c: Vec<_> = (0..5).map(|i| cand(i, "big", 900_000, "2024-05-01")).collect();
        c.push(cand(5, "a", 1_000, "2024-05-01"));
        c.push(cand(6, "b", 1_000, "2024-05-01"));
        let config = ClubbingConfig {
            max_candidates: 4,
            ..ClubbingConfig::default()
        };
        let out = search(&c, &target(2_000, "2024-05-01"), 0, &config);
        assert_eq!(members(&out), vec![5, 6]);
    }

    #[test]
    fn node_budget_caps_search() {
        let c: Vec<_> = (0..20)
            .map(|i| ClubCandidate {
                idx: i,
                record_id: "s",
                taxable: 7,
                tax: 0,
                date: None,
            })
            .collect();
        let config = ClubbingConfig {
            max_nodes: 50,
            ..ClubbingConfig::default()
        };
        let out = search(&c, &target(1_000_000, "2024-05-01"), 0, &config);
        assert_eq!(
            out,
            ClubbingOutcome::NotFound {
                nodes_visited: 50,
                cap_hit: true
            }
        );
    }
}
