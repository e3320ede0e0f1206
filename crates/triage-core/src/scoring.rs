//! Weighted quality scoring and ranking.
//!
//! Every signal maps raw item metadata onto `[0, 1]`. The total is the
//! weighted sum of the primary signals plus a small flat recency bonus.
//! When diff stats are missing the diff term is dropped and the remaining
//! primary weights are rescaled so they still sum to one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::recency;
use crate::error::TriageError;
use crate::models::{CiStatus, Item, ItemType, RankedItem, SignalBreakdown};

/// Sentinel for "diff size unknown" in [`SignalBreakdown::diff_size`].
pub const DIFF_UNKNOWN: f64 = -1.0;

/// Signal weights, read from the `[scoring]` config section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScoreWeights {
    #[serde(default = "default_has_tests")]
    pub has_tests: f64,
    #[serde(default = "default_ci_passing")]
    pub ci_passing: f64,
    #[serde(default = "default_diff_size")]
    pub diff_size: f64,
    #[serde(default = "default_author_history")]
    pub author_history: f64,
    #[serde(default = "default_description_quality")]
    pub description_quality: f64,
    #[serde(default = "default_review_approvals")]
    pub review_approvals: f64,
    /// Flat bonus weight for recency, outside the normalised sum.
    #[serde(default = "default_recency_bonus")]
    pub recency_bonus: f64,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
}

fn default_has_tests() -> f64 {
    0.25
}
fn default_ci_passing() -> f64 {
    0.20
}
fn default_diff_size() -> f64 {
    0.15
}
fn default_author_history() -> f64 {
    0.15
}
fn default_description_quality() -> f64 {
    0.15
}
fn default_review_approvals() -> f64 {
    0.10
}
fn default_recency_bonus() -> f64 {
    0.05
}
fn default_half_life_days() -> f64 {
    30.0
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            has_tests: default_has_tests(),
            ci_passing: default_ci_passing(),
            diff_size: default_diff_size(),
            author_history: default_author_history(),
            description_quality: default_description_quality(),
            review_approvals: default_review_approvals(),
            recency_bonus: default_recency_bonus(),
            half_life_days: default_half_life_days(),
        }
    }
}

impl ScoreWeights {
    fn primary(&self) -> [f64; 6] {
        [
            self.has_tests,
            self.ci_passing,
            self.diff_size,
            self.author_history,
            self.description_quality,
            self.review_approvals,
        ]
    }

    /// Primary weights must be non-negative and sum to 1.
    pub fn validate(&self) -> Result<(), TriageError> {
        let primary = self.primary();
        if primary.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(TriageError::InvalidWeights(
                "weights must be non-negative".into(),
            ));
        }
        let sum: f64 = primary.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(TriageError::InvalidWeights(format!(
                "primary weights sum to {:.4}, expected 1.0",
                sum
            )));
        }
        if self.diff_size >= 1.0 {
            return Err(TriageError::InvalidWeights(
                "diff_size weight must be below 1.0".into(),
            ));
        }
        if !self.recency_bonus.is_finite() || self.recency_bonus < 0.0 {
            return Err(TriageError::InvalidWeights(
                "recency_bonus must be non-negative".into(),
            ));
        }
        if !self.half_life_days.is_finite() || self.half_life_days <= 0.0 {
            return Err(TriageError::InvalidWeights(
                "half_life_days must be positive".into(),
            ));
        }
        Ok(())
    }
}

pub fn has_tests_signal(has_tests: Option<bool>) -> f64 {
    match has_tests {
        Some(true) => 1.0,
        Some(false) => 0.0,
        None => 0.5,
    }
}

pub fn ci_signal(status: CiStatus) -> f64 {
    match status {
        CiStatus::Success => 1.0,
        CiStatus::Failure => 0.0,
        CiStatus::Pending | CiStatus::Unknown => 0.5,
    }
}

/// Smaller diffs score higher. `None` yields [`DIFF_UNKNOWN`].
pub fn diff_size_signal(lines_changed: Option<u64>) -> f64 {
    match lines_changed {
        None => DIFF_UNKNOWN,
        Some(n) if n <= 50 => 1.0,
        Some(n) if n <= 200 => 0.8,
        Some(n) if n <= 500 => 0.6,
        Some(n) if n <= 1000 => 0.4,
        Some(n) if n <= 5000 => 0.2,
        Some(_) => 0.1,
    }
}

pub fn author_history_signal(merged: u32) -> f64 {
    match merged {
        0 => 0.1,
        1..=2 => 0.3,
        3..=5 => 0.5,
        6..=10 => 0.7,
        11..=20 => 0.85,
        _ => 1.0,
    }
}

/// Banded by body length in chars.
pub fn description_signal(body: &str) -> f64 {
    match body.trim().chars().count() {
        0 => 0.0,
        n if n < 50 => 0.1,
        n if n < 200 => 0.4,
        n if n < 1000 => 0.7,
        _ => 0.9,
    }
}

pub fn review_signal(approvals: u32) -> f64 {
    (approvals as f64 / 3.0).min(1.0)
}

/// Merged-PR counts per author. Authors not present count as zero.
#[derive(Debug, Clone, Default)]
pub struct AuthorHistory {
    merged: HashMap<String, u32>,
}

impl AuthorHistory {
    pub fn new(merged: HashMap<String, u32>) -> Self {
        Self { merged }
    }

    pub fn insert(&mut self, author: impl Into<String>, merged: u32) {
        self.merged.insert(author.into(), merged);
    }

    pub fn merged(&self, author: &str) -> u32 {
        self.merged.get(author).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }
}

/// The `n` most frequent authors, by count descending then name.
pub fn top_authors(items: &[Item], n: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        if !item.author.is_empty() {
            *counts.entry(item.author.as_str()).or_default() += 1;
        }
    }
    let mut authors: Vec<(&str, usize)> = counts.into_iter().collect();
    authors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    authors
        .into_iter()
        .take(n)
        .map(|(a, _)| a.to_string())
        .collect()
}

/// Compute every signal for one item.
pub fn signals(
    item: &Item,
    history: &AuthorHistory,
    weights: &ScoreWeights,
    now: DateTime<Utc>,
) -> SignalBreakdown {
    SignalBreakdown {
        has_tests: has_tests_signal(item.has_tests),
        ci_passing: ci_signal(item.ci_status),
        diff_size: diff_size_signal(item.lines_changed()),
        author_history: author_history_signal(history.merged(&item.author)),
        description_quality: description_signal(&item.body),
        review_approvals: review_signal(item.review_count),
        recency: recency(item.updated_at, now, weights.half_life_days),
    }
}

/// Combine a breakdown into a total score.
pub fn combine(signals: &SignalBreakdown, weights: &ScoreWeights) -> f64 {
    let rest = signals.has_tests * weights.has_tests
        + signals.ci_passing * weights.ci_passing
        + signals.author_history * weights.author_history
        + signals.description_quality * weights.description_quality
        + signals.review_approvals * weights.review_approvals;

    let primary = if signals.diff_size < 0.0 {
        rest / (1.0 - weights.diff_size)
    } else {
        rest + signals.diff_size * weights.diff_size
    };
    primary + weights.recency_bonus * signals.recency
}

pub fn score_item(
    item: &Item,
    history: &AuthorHistory,
    weights: &ScoreWeights,
    now: DateTime<Utc>,
) -> RankedItem {
    let signals = signals(item, history, weights, now);
    RankedItem {
        key: item.key.clone(),
        title: item.title.clone(),
        author: item.author.clone(),
        score: combine(&signals, weights),
        signals,
    }
}

/// Score and sort, best first. Ties: PRs before issues, then by number.
pub fn rank_items(
    items: &[Item],
    history: &AuthorHistory,
    weights: &ScoreWeights,
    now: DateTime<Utc>,
) -> Vec<RankedItem> {
    let mut ranked: Vec<RankedItem> = items
        .iter()
        .map(|i| score_item(i, history, weights, now))
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| type_order(a.key.item_type).cmp(&type_order(b.key.item_type)))
            .then_with(|| a.key.number.cmp(&b.key.number))
    });
    ranked
}

fn type_order(t: ItemType) -> u8 {
    match t {
        ItemType::Pr => 0,
        ItemType::Issue => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKey;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn pr(number: u64) -> Item {
        let mut item = Item::new(ItemKey::pr("o/r", number), "t", "", "alice", now());
        item.additions = Some(10);
        item.deletions = Some(5);
        item
    }

    #[test]
    fn default_weights_are_valid() {
        ScoreWeights::default().validate().unwrap();
    }

    #[test]
    fn invalid_weights_rejected() {
        let w = ScoreWeights {
            has_tests: 0.5,
            ..ScoreWeights::default()
        };
        assert!(matches!(w.validate(), Err(TriageError::InvalidWeights(_))));

        let w = ScoreWeights {
            has_tests: -0.1,
            ci_passing: 0.55,
            ..ScoreWeights::default()
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn diff_bands() {
        assert_eq!(diff_size_signal(Some(0)), 1.0);
        assert_eq!(diff_size_signal(Some(50)), 1.0);
        assert_eq!(diff_size_signal(Some(51)), 0.8);
        assert_eq!(diff_size_signal(Some(500)), 0.6);
        assert_eq!(diff_size_signal(Some(1000)), 0.4);
        assert_eq!(diff_size_signal(Some(5000)), 0.2);
        assert_eq!(diff_size_signal(Some(5001)), 0.1);
        assert_eq!(diff_size_signal(None), DIFF_UNKNOWN);
    }

    #[test]
    fn author_and_description_bands() {
        assert_eq!(author_history_signal(0), 0.1);
        assert_eq!(author_history_signal(2), 0.3);
        assert_eq!(author_history_signal(5), 0.5);
        assert_eq!(author_history_signal(10), 0.7);
        assert_eq!(author_history_signal(20), 0.85);
        assert_eq!(author_history_signal(21), 1.0);

        assert_eq!(description_signal(""), 0.0);
        assert_eq!(description_signal("short"), 0.1);
        assert_eq!(description_signal(&"x".repeat(100)), 0.4);
        assert_eq!(description_signal(&"x".repeat(999)), 0.7);
        assert_eq!(description_signal(&"x".repeat(1000)), 0.9);
    }

    #[test]
    fn reviews_saturate_at_three() {
        assert_eq!(review_signal(0), 0.0);
        assert!((review_signal(1) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(review_signal(3), 1.0);
        assert_eq!(review_signal(10), 1.0);
    }

    #[test]
    fn better_signals_never_lower_the_score() {
        let w = ScoreWeights::default();
        let h = AuthorHistory::default();
        let base = pr(1);

        let mut tested = base.clone();
        tested.has_tests = Some(true);
        let mut green = base.clone();
        green.ci_status = CiStatus::Success;
        let mut reviewed = base.clone();
        reviewed.review_count = 2;

        let s = |i: &Item| score_item(i, &h, &w, now()).score;
        assert!(s(&tested) > s(&base));
        assert!(s(&green) > s(&base));
        assert!(s(&reviewed) > s(&base));

        let mut failing = base.clone();
        failing.ci_status = CiStatus::Failure;
        assert!(s(&failing) < s(&base));

        let mut huge = base.clone();
        huge.additions = Some(5000);
        huge.deletions = Some(1000);
        assert!(s(&base) > s(&huge));

        let mut stale = base.clone();
        stale.updated_at = now() - chrono::Duration::days(90);
        assert!(s(&base) > s(&stale));
    }

    #[test]
    fn unknown_diff_redistributes_weight() {
        let w = ScoreWeights::default();
        let mut known = SignalBreakdown {
            has_tests: 1.0,
            ci_passing: 1.0,
            diff_size: 0.8,
            author_history: 0.5,
            description_quality: 0.7,
            review_approvals: 1.0 / 3.0,
            recency: 1.0,
        };
        let with_diff = combine(&known, &w);
        known.diff_size = DIFF_UNKNOWN;
        let without = combine(&known, &w);

        // Same signals with diff = 0.8 vs unknown land close together.
        assert!((with_diff - without).abs() < 0.05, "{with_diff} vs {without}");

        // All-max signals stay at 1 + bonus when the diff is unknown.
        let max = SignalBreakdown {
            has_tests: 1.0,
            ci_passing: 1.0,
            diff_size: DIFF_UNKNOWN,
            author_history: 1.0,
            description_quality: 1.0,
            review_approvals: 1.0,
            recency: 1.0,
        };
        assert!((combine(&max, &w) - (1.0 + w.recency_bonus)).abs() < 1e-9);
    }

    #[test]
    fn top_authors_by_frequency_then_name() {
        let mut items = Vec::new();
        for (i, author) in ["bob", "carol", "bob", "alice", "carol", "dave"]
            .iter()
            .enumerate()
        {
            let mut item = pr(i as u64);
            item.author = author.to_string();
            items.push(item);
        }
        assert_eq!(top_authors(&items, 3), vec!["bob", "carol", "alice"]);
        assert_eq!(top_authors(&items, 50).len(), 4);
    }

    #[test]
    fn history_lifts_established_authors() {
        let w = ScoreWeights::default();
        let mut h = AuthorHistory::default();
        h.insert("veteran", 42);
        let mut a = pr(1);
        a.author = "veteran".into();
        let b = pr(2);
        assert_eq!(h.merged("nobody"), 0);
        assert!(score_item(&a, &h, &w, now()).score > score_item(&b, &h, &w, now()).score);
    }

    #[test]
    fn rank_ties_prs_first_then_number() {
        let w = ScoreWeights::default();
        let h = AuthorHistory::default();
        let mut issue = Item::new(ItemKey::issue("o/r", 1), "t", "", "alice", now());
        issue.additions = Some(10);
        issue.deletions = Some(5);
        let items = vec![issue, pr(9), pr(3)];

        let ranked = rank_items(&items, &h, &w, now());
        let order: Vec<(ItemType, u64)> = ranked
            .iter()
            .map(|r| (r.key.item_type, r.key.number))
            .collect();
        assert_eq!(
            order,
            vec![(ItemType::Pr, 3), (ItemType::Pr, 9), (ItemType::Issue, 1)]
        );
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
