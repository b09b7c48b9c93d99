//! Related-post selection.
//!
//! Score = same author (+10) + same kind (+5) + recency within the candidate
//! pool (0..3) + uniform noise in [0, 5). Unread candidates are preferred;
//! read ones only fill remaining slots.

use nostr_core::{ContentType, Post};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

const SAME_AUTHOR: f64 = 10.0;
const SAME_KIND: f64 = 5.0;
const RECENCY_MAX: f64 = 3.0;
const NOISE_MAX: f64 = 5.0;

/// Picks related posts. The random source is injectable so tests can seed it.
pub struct RelatedRanker<R = StdRng> {
    rng: R,
    affinity: Option<ContentType>,
}

impl RelatedRanker<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for RelatedRanker<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> RelatedRanker<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            affinity: None,
        }
    }

    /// Only consider candidates of this content type.
    pub fn content_affinity(mut self, content_type: ContentType) -> Self {
        self.affinity = Some(content_type);
        self
    }

    pub fn select_related(
        &mut self,
        current: &Post,
        pool: &[Post],
        count: usize,
        read_history: &HashSet<String>,
    ) -> Vec<Post> {
        if count == 0 {
            return Vec::new();
        }
        let candidates: Vec<&Post> = pool
            .iter()
            .filter(|p| p.id != current.id)
            .filter(|p| self.affinity.is_none_or(|ct| ct.accepts(p.kind)))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let min_ts = candidates
            .iter()
            .map(|p| p.effective_timestamp())
            .min()
            .unwrap_or_default();
        let max_ts = candidates
            .iter()
            .map(|p| p.effective_timestamp())
            .max()
            .unwrap_or_default();
        let range = match max_ts - min_ts {
            0 => 1.0,
            r => r as f64,
        };

        let base_score = |p: &Post| {
            let mut score = 0.0;
            if p.author == current.author {
                score += SAME_AUTHOR;
            }
            if p.kind == current.kind {
                score += SAME_KIND;
            }
            score + (p.effective_timestamp() - min_ts) as f64 / range * RECENCY_MAX
        };

        let (unread, read): (Vec<&Post>, Vec<&Post>) = candidates
            .into_iter()
            .partition(|p| !read_history.contains(&p.id));

        let mut unread = self.scored(unread, &base_score);
        if unread.len() >= count {
            unread.truncate(count);
            return unread;
        }

        let needed = count - unread.len();
        let mut read = self.scored(read, &base_score);
        read.truncate(needed);
        unread.extend(read);
        unread
    }

    fn scored(&mut self, posts: Vec<&Post>, base: &impl Fn(&Post) -> f64) -> Vec<Post> {
        let mut scored: Vec<(f64, &Post)> = posts
            .into_iter()
            .map(|p| (base(p) + self.rng.gen::<f64>() * NOISE_MAX, p))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(_, p)| p.clone()).collect()
    }
}
