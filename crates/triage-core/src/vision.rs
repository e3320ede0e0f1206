//! Vision document alignment.
//!
//! The vision document is split into heading-delimited sections, each
//! section is embedded (by the app), and every item is matched against
//! its most similar section. The similarity is bucketed into
//! [`Alignment`] classes by two thresholds.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::TriageError;
use crate::models::{
    truncate_chars, Alignment, Item, VisionChunk, VisionScore, VisionSection,
};
use crate::similarity::{cosine_similarity, is_zero_vector};
use crate::store::VectorStore;

/// Sections with a shorter trimmed body are dropped.
pub const MIN_SECTION_CHARS: usize = 20;
/// Documents up to this size also get a whole-document section.
pub const FULL_DOCUMENT_MAX_CHARS: usize = 6000;
/// Per-section cap on embedding text.
pub const SECTION_MAX_CHARS: usize = 2000;

pub const OVERVIEW_HEADING: &str = "Overview";
pub const FULL_DOCUMENT_HEADING: &str = "Full Document";

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct VisionThresholds {
    #[serde(default = "default_aligned")]
    pub aligned: f64,
    #[serde(default = "default_drifting")]
    pub drifting: f64,
}

fn default_aligned() -> f64 {
    0.65
}
fn default_drifting() -> f64 {
    0.40
}

impl Default for VisionThresholds {
    fn default() -> Self {
        Self {
            aligned: default_aligned(),
            drifting: default_drifting(),
        }
    }
}

impl VisionThresholds {
    /// Builds thresholds, rejecting anything outside `0 <= drifting <= aligned <= 1`.
    pub fn new(aligned: f64, drifting: f64) -> Result<Self, TriageError> {
        let t = Self { aligned, drifting };
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<(), TriageError> {
        let ok = (0.0..=1.0).contains(&self.drifting)
            && (0.0..=1.0).contains(&self.aligned)
            && self.drifting <= self.aligned;
        if ok {
            Ok(())
        } else {
            Err(TriageError::InvalidThresholds {
                aligned: self.aligned,
                drifting: self.drifting,
            })
        }
    }
}

/// ATX heading text (`# Title` … `###### Title`), or `None`.
fn heading(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim().trim_end_matches('#').trim())
}

fn flush_section(heading: &str, body: &mut Vec<&str>, out: &mut Vec<VisionSection>) {
    let text = body.join("\n").trim().to_string();
    if text.chars().count() >= MIN_SECTION_CHARS {
        out.push(VisionSection {
            heading: heading.to_string(),
            text,
        });
    }
    body.clear();
}

/// Split a markdown document into sections at ATX headings.
///
/// Text before the first heading becomes an [`OVERVIEW_HEADING`] section.
/// Sections whose trimmed body is under [`MIN_SECTION_CHARS`] are dropped.
/// Lines inside fenced code blocks are never treated as headings.
pub fn split_sections(doc: &str) -> Vec<VisionSection> {
    let mut sections = Vec::new();
    let mut current_heading = OVERVIEW_HEADING.to_string();
    let mut body: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in doc.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        match heading(line) {
            Some(h) if !in_fence => {
                flush_section(&current_heading, &mut body, &mut sections);
                current_heading = if h.is_empty() {
                    OVERVIEW_HEADING.to_string()
                } else {
                    h.to_string()
                };
            }
            _ => body.push(line),
        }
    }
    flush_section(&current_heading, &mut body, &mut sections);
    sections
}

/// Sections ready for embedding: `heading\n\nbody`, capped at
/// [`SECTION_MAX_CHARS`], plus a whole-document section for short docs.
pub fn prepare_sections(doc: &str) -> Vec<VisionSection> {
    let mut sections: Vec<VisionSection> = split_sections(doc)
        .into_iter()
        .map(|s| VisionSection {
            text: truncate_chars(&format!("{}\n\n{}", s.heading, s.text), SECTION_MAX_CHARS)
                .to_string(),
            heading: s.heading,
        })
        .collect();

    let whole = doc.trim();
    if !whole.is_empty() && whole.chars().count() <= FULL_DOCUMENT_MAX_CHARS {
        sections.push(VisionSection {
            heading: FULL_DOCUMENT_HEADING.to_string(),
            text: truncate_chars(whole, SECTION_MAX_CHARS).to_string(),
        });
    }
    sections
}

/// Tier for a cosine similarity. Compared in `f32`, the precision the
/// similarity is computed in, so a value equal to a threshold lands in the
/// higher tier.
pub fn classify_similarity(similarity: f32, thresholds: &VisionThresholds) -> Alignment {
    if similarity >= thresholds.aligned as f32 {
        Alignment::Aligned
    } else if similarity >= thresholds.drifting as f32 {
        Alignment::Drifting
    } else {
        Alignment::OffVision
    }
}

/// Best-matching chunk and its similarity. First chunk wins ties.
pub fn best_match<'a>(embedding: &[f32], chunks: &'a [VisionChunk]) -> Option<(&'a VisionChunk, f32)> {
    let mut best: Option<(&VisionChunk, f32)> = None;
    for chunk in chunks {
        if is_zero_vector(&chunk.embedding) {
            continue;
        }
        let sim = cosine_similarity(embedding, &chunk.embedding);
        if best.map_or(true, |(_, b)| sim > b) {
            best = Some((chunk, sim));
        }
    }
    best
}

/// Score one item's embedding against the vision chunks.
///
/// `None` when the embedding is a zero vector or there is nothing usable
/// to compare against.
pub fn score_item(
    item: &Item,
    embedding: &[f32],
    chunks: &[VisionChunk],
    thresholds: &VisionThresholds,
) -> Option<VisionScore> {
    if is_zero_vector(embedding) {
        return None;
    }
    let (chunk, similarity) = best_match(embedding, chunks)?;
    Some(VisionScore {
        key: item.key.clone(),
        title: item.title.clone(),
        matched_section: chunk.heading.clone(),
        similarity,
        alignment: classify_similarity(similarity, thresholds),
    })
}

/// Score every item in `repo` with a usable embedding, best aligned first.
pub async fn score_repo(
    store: &dyn VectorStore,
    repo: &str,
    chunks: &[VisionChunk],
    thresholds: &VisionThresholds,
) -> Result<Vec<VisionScore>> {
    let embeddings = store.get_all_embeddings(repo).await?;
    let mut scores = Vec::new();
    for item in store.get_all_for_repo(repo).await? {
        let Some(vector) = embeddings.get(&item.key) else {
            continue;
        };
        scores.extend(score_item(&item, vector, chunks, thresholds));
    }
    scores.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.key.cmp(&b.key))
    });
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKey;
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;

    const DOC: &str = "\
Intro paragraph that explains what this project is about.

# Goals
Fast, small, and dependable command line tooling.

## Non-goals
Nope.

### Performance ###
Every command should finish in under a second on typical repos.

```sh
# not a heading, just a shell comment inside a fence
```
";

    fn item(n: u64) -> Item {
        Item::new(ItemKey::pr("o/r", n), format!("pr {n}"), "", "a", Utc::now())
    }

    fn chunk(heading: &str, v: &[f32]) -> VisionChunk {
        VisionChunk {
            heading: heading.into(),
            embedding: v.to_vec(),
        }
    }

    #[test]
    fn sections_split_on_headings() {
        let sections = split_sections(DOC);
        let headings: Vec<&str> = sections.iter().map(|s| s.heading.as_str()).collect();
        // "Non-goals" body is too short and is dropped.
        assert_eq!(headings, vec!["Overview", "Goals", "Performance"]);
        assert!(sections[2].text.contains("not a heading"));
    }

    #[test]
    fn hash_without_space_is_not_heading() {
        assert_eq!(heading("#hashtag"), None);
        assert_eq!(heading("####### seven"), None);
        assert_eq!(heading("## Two"), Some("Two"));
        assert_eq!(heading("#"), Some(""));
    }

    #[test]
    fn prepared_sections_include_full_document_for_short_docs() {
        let sections = prepare_sections(DOC);
        let last = sections.last().unwrap();
        assert_eq!(last.heading, FULL_DOCUMENT_HEADING);
        assert!(sections[1].text.starts_with("Goals\n\n"));

        let long = format!("# Big\n{}", "word ".repeat(2000));
        let sections = prepare_sections(&long);
        assert!(sections.iter().all(|s| s.heading != FULL_DOCUMENT_HEADING));
        assert_eq!(sections[0].text.chars().count(), SECTION_MAX_CHARS);
    }

    #[test]
    fn thresholds_validated() {
        assert!(VisionThresholds::new(0.65, 0.40).is_ok());
        assert!(VisionThresholds::new(0.65, 0.65).is_ok());
        assert_eq!(
            VisionThresholds::new(0.3, 0.5),
            Err(TriageError::InvalidThresholds {
                aligned: 0.3,
                drifting: 0.5
            })
        );
        assert!(VisionThresholds::new(1.2, 0.4).is_err());
        assert!(VisionThresholds::new(0.6, -0.1).is_err());
    }

    #[test]
    fn classification_boundaries_inclusive() {
        let t = VisionThresholds::default();
        assert_eq!(classify_similarity(0.65, &t), Alignment::Aligned);
        assert_eq!(classify_similarity(0.6499, &t), Alignment::Drifting);
        assert_eq!(classify_similarity(0.40, &t), Alignment::Drifting);
        assert_eq!(classify_similarity(0.3999, &t), Alignment::OffVision);
        assert_eq!(classify_similarity(-0.5, &t), Alignment::OffVision);
    }

    #[test]
    fn scored_similarity_at_threshold_takes_higher_tier() {
        let chunks = vec![chunk("Goals", &[1.0, 0.0])];
        let t = VisionThresholds::default();
        let at_aligned = [0.65f32, (1.0f32 - 0.65 * 0.65).sqrt()];
        let score = score_item(&item(1), &at_aligned, &chunks, &t).unwrap();
        assert_eq!(score.similarity, 0.65);
        assert_eq!(score.alignment, Alignment::Aligned);

        // 3-4-5 triangles give exact cosines of 0.8 and 0.6.
        let t = VisionThresholds::new(0.8, 0.6).unwrap();
        let aligned = score_item(&item(2), &[4.0, 3.0], &chunks, &t).unwrap();
        assert_eq!(aligned.alignment, Alignment::Aligned);
        let drifting = score_item(&item(3), &[3.0, 4.0], &chunks, &t).unwrap();
        assert_eq!(drifting.alignment, Alignment::Drifting);
        let off = score_item(&item(4), &[1.0, 2.0], &chunks, &t).unwrap();
        assert_eq!(off.alignment, Alignment::OffVision);
    }

    #[test]
    fn partial_overlap_is_drifting() {
        // cos([1,0,0], [1,1,1]) = 1/sqrt(3) ~ 0.577
        let chunks = vec![chunk("Goals", &[1.0, 1.0, 1.0])];
        let score = score_item(&item(1), &[1.0, 0.0, 0.0], &chunks, &VisionThresholds::default())
            .unwrap();
        assert_eq!(score.matched_section, "Goals");
        assert!((score.similarity - 0.57735).abs() < 1e-4);
        assert_eq!(score.alignment, Alignment::Drifting);
        assert_eq!(score.key, ItemKey::pr("o/r", 1));
    }

    #[test]
    fn zero_vectors_and_empty_chunks_yield_none() {
        let t = VisionThresholds::default();
        let chunks = vec![chunk("Goals", &[1.0, 0.0])];
        assert!(score_item(&item(1), &[0.0, 0.0], &chunks, &t).is_none());
        assert!(score_item(&item(1), &[1.0, 0.0], &[], &t).is_none());
    }

    #[test]
    fn first_chunk_wins_ties() {
        let chunks = vec![chunk("A", &[1.0, 0.0]), chunk("B", &[2.0, 0.0])];
        let score = score_item(&item(1), &[1.0, 0.0], &chunks, &VisionThresholds::default())
            .unwrap();
        assert_eq!(score.matched_section, "A");
    }

    #[tokio::test]
    async fn repo_scores_sorted_and_skip_zero() {
        let store = InMemoryStore::new();
        let entries = [
            (1, [1.0, 0.0, 0.0]),
            (2, [0.0, 1.0, 0.0]),
            (3, [0.0, 0.0, 0.0]),
            (4, [1.0, 1.0, 0.0]),
        ];
        for (n, v) in entries {
            store.upsert(&item(n), &v).await.unwrap();
        }
        let chunks = vec![chunk("Goals", &[1.0, 0.0, 0.0])];
        let scores = score_repo(&store, "o/r", &chunks, &VisionThresholds::default())
            .await
            .unwrap();

        let numbers: Vec<u64> = scores.iter().map(|s| s.key.number).collect();
        assert_eq!(numbers, vec![1, 4, 2]);
        assert_eq!(scores[0].alignment, Alignment::Aligned);
        assert_eq!(scores[1].alignment, Alignment::Aligned);
        assert_eq!(scores[2].alignment, Alignment::OffVision);
        assert_eq!(scores[0].title, "pr 1");
    }
}
