//! Core data models shared by the store, the engines and the app.
//!
//! [`Item`]s are persisted by a [`VectorStore`](crate::store::VectorStore).
//! [`Cluster`], [`RankedItem`] and [`VisionScore`] are derived per run and
//! never stored.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TriageError;

/// A GitHub repository identifier, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    /// Parse `owner/name`. Anything else is a configuration error.
    pub fn parse(s: &str) -> Result<Self, TriageError> {
        let invalid = || TriageError::InvalidRepo(s.to_string());
        let (owner, name) = s.split_once('/').ok_or_else(invalid)?;
        let valid_part = |p: &str| {
            !p.is_empty()
                && p.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid_part(owner) || !valid_part(name) {
            return Err(invalid());
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// `owner/name`, the form stored in the `repo` column.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Pr,
    Issue,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Pr => "pr",
            ItemType::Issue => "issue",
        }
    }
}

impl FromStr for ItemType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pr" => Ok(ItemType::Pr),
            "issue" => Ok(ItemType::Issue),
            other => anyhow::bail!("unknown item type '{}': expected pr or issue", other),
        }
    }
}

/// Composite identity of an item: `(repo, type, number)`.
///
/// Ordering is by repo, then PRs before issues, then number. Several
/// deterministic orderings in the engines rely on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub repo: String,
    pub item_type: ItemType,
    pub number: u64,
}

impl ItemKey {
    pub fn new(repo: impl Into<String>, item_type: ItemType, number: u64) -> Self {
        Self {
            repo: repo.into(),
            item_type,
            number,
        }
    }

    pub fn pr(repo: impl Into<String>, number: u64) -> Self {
        Self::new(repo, ItemType::Pr, number)
    }

    pub fn issue(repo: impl Into<String>, number: u64) -> Self {
        Self::new(repo, ItemType::Issue, number)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} ({})", self.repo, self.number, self.item_type.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Open,
    Closed,
    Merged,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Open => "open",
            ItemState::Closed => "closed",
            ItemState::Merged => "merged",
        }
    }

    /// Lenient parse for stored values; unknown strings read as open.
    pub fn from_db(s: &str) -> Self {
        match s {
            "closed" => ItemState::Closed,
            "merged" => ItemState::Merged,
            _ => ItemState::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiStatus {
    Success,
    Failure,
    Pending,
    #[default]
    Unknown,
}

impl CiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiStatus::Success => "success",
            CiStatus::Failure => "failure",
            CiStatus::Pending => "pending",
            CiStatus::Unknown => "unknown",
        }
    }

    /// Maps both stored values and GitHub combined-status states
    /// (`error` counts as failure).
    pub fn from_db(s: &str) -> Self {
        match s {
            "success" => CiStatus::Success,
            "failure" | "error" => CiStatus::Failure,
            "pending" => CiStatus::Pending,
            _ => CiStatus::Unknown,
        }
    }
}

/// A pull request or issue, as cached locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: ItemKey,
    pub title: String,
    pub body: String,
    pub author: String,
    pub state: ItemState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub labels: Vec<String>,
    /// PR-only diff stats; `None` for issues or when not fetched.
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
    pub changed_files: Option<u64>,
    pub ci_status: CiStatus,
    pub review_count: u32,
    /// `None` means unknown.
    pub has_tests: Option<bool>,
}

impl Item {
    /// A bare item with neutral PR fields, handy for issues and tests.
    pub fn new(
        key: ItemKey,
        title: impl Into<String>,
        body: impl Into<String>,
        author: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            title: title.into(),
            body: body.into(),
            author: author.into(),
            state: ItemState::Open,
            created_at: updated_at,
            updated_at,
            labels: Vec::new(),
            additions: None,
            deletions: None,
            changed_files: None,
            ci_status: CiStatus::Unknown,
            review_count: 0,
            has_tests: None,
        }
    }

    /// Total lines changed, when both counts are known.
    pub fn lines_changed(&self) -> Option<u64> {
        Some(self.additions? + self.deletions?)
    }

    /// Text handed to the embedding provider.
    pub fn embedding_text(&self, max_chars: usize) -> String {
        let text = if self.body.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.body)
        };
        truncate_chars(&text, max_chars).to_string()
    }
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// A member of a duplicate [`Cluster`].
#[derive(Debug, Clone, Serialize)]
pub struct ClusterMember {
    pub key: ItemKey,
    pub title: String,
    pub author: String,
    /// Representative-selection score (recency + description length).
    pub pick_score: f64,
}

/// A group of near-duplicate items. Always at least two members.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    /// 1-based, assigned after sorting by size; not stable across runs.
    pub id: usize,
    pub members: Vec<ClusterMember>,
    pub best_pick: ItemKey,
    pub avg_similarity: f32,
    pub theme: String,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Per-signal values behind a quality score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalBreakdown {
    pub has_tests: f64,
    pub ci_passing: f64,
    /// `-1.0` when diff stats are unavailable.
    pub diff_size: f64,
    pub author_history: f64,
    pub description_quality: f64,
    pub review_approvals: f64,
    pub recency: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedItem {
    pub key: ItemKey,
    pub title: String,
    pub author: String,
    pub score: f64,
    pub signals: SignalBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alignment {
    Aligned,
    Drifting,
    OffVision,
}

impl Alignment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Alignment::Aligned => "aligned",
            Alignment::Drifting => "drifting",
            Alignment::OffVision => "off-vision",
        }
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A heading-delimited section of the vision document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisionSection {
    pub heading: String,
    pub text: String,
}

/// A vision section with its embedding.
#[derive(Debug, Clone)]
pub struct VisionChunk {
    pub heading: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisionScore {
    pub key: ItemKey,
    pub title: String,
    pub matched_section: String,
    pub similarity: f32,
    pub alignment: Alignment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_id_parse() {
        let r = RepoId::parse("rust-lang/rust").unwrap();
        assert_eq!(r.owner, "rust-lang");
        assert_eq!(r.name, "rust");
        assert_eq!(r.slug(), "rust-lang/rust");
        assert_eq!("a.b/c_d".parse::<RepoId>().unwrap().name, "c_d");
    }

    #[test]
    fn repo_id_rejects_malformed() {
        for bad in ["", "rust", "/rust", "rust-lang/", "a/b/c", "a b/c", "https://github.com/a"] {
            assert_eq!(
                RepoId::parse(bad),
                Err(TriageError::InvalidRepo(bad.to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn item_key_ordering_prs_first() {
        let mut keys = vec![
            ItemKey::issue("o/r", 1),
            ItemKey::pr("o/r", 9),
            ItemKey::pr("o/r", 2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ItemKey::pr("o/r", 2),
                ItemKey::pr("o/r", 9),
                ItemKey::issue("o/r", 1)
            ]
        );
    }

    #[test]
    fn lines_changed_needs_both_counts() {
        let mut item = Item::new(ItemKey::pr("o/r", 1), "t", "b", "a", Utc::now());
        assert_eq!(item.lines_changed(), None);
        item.additions = Some(10);
        assert_eq!(item.lines_changed(), None);
        item.deletions = Some(5);
        assert_eq!(item.lines_changed(), Some(15));
    }

    #[test]
    fn embedding_text_truncates_on_char_boundary() {
        let item = Item::new(ItemKey::issue("o/r", 1), "héllo", "wörld", "a", Utc::now());
        assert_eq!(item.embedding_text(100), "héllo\n\nwörld");
        assert_eq!(item.embedding_text(3), "hél");
        let bare = Item::new(ItemKey::issue("o/r", 2), "only title", "  ", "a", Utc::now());
        assert_eq!(bare.embedding_text(100), "only title");
    }
}
