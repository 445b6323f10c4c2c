//! Relevance selection
//!
//! Narrows a ranked candidate list to what the query scope asks for:
//! one source per server for a title, one source per title for an author.

use std::collections::HashSet;
use tracing::debug;

use super::parser::Candidate;
use super::query::{SearchQuery, SearchScope};

/// Word overlap (Jaccard) above which two titles count as the same book
pub const TITLE_SIMILARITY: f64 = 0.7;

const LEADING_ARTICLES: &[&str] = &["the ", "a ", "an "];

/// Release markers that make one copy of a title preferable to another
pub const QUALITY_KEYWORDS: &[&str] = &["retail", "final", "complete", "unabridged", "original"];

/// Lower-case a title and drop articles, bracketed text and `vN` versions
pub fn normalize_title(title: &str) -> String {
    let mut text = title.trim().to_lowercase();
    for article in LEADING_ARTICLES {
        if let Some(rest) = text.strip_prefix(article) {
            text = rest.to_string();
            break;
        }
    }

    let mut stripped = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }

    stripped
        .split_whitespace()
        .filter(|word| !is_version_tag(word))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_version_tag(word: &str) -> bool {
    word.strip_prefix('v')
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit() || b == b'.'))
}

/// Version number in a title (`v5`, `(v2.1)`), 0 when absent
pub fn version_of(title: &str) -> f64 {
    title
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']'))
        .filter_map(|word| word.strip_prefix('v'))
        .filter_map(|rest| rest.parse::<f64>().ok())
        .fold(0.0, f64::max)
}

/// Number of quality keywords in a title
pub fn quality_of(title: &str) -> usize {
    let lower = title.to_lowercase();
    QUALITY_KEYWORDS.iter().filter(|k| lower.contains(*k)).count()
}

/// Whether two titles name the same book
pub fn titles_match(target: &str, candidate: &str) -> bool {
    let target = normalize_title(target);
    let candidate = normalize_title(candidate);
    if target.is_empty() || candidate.is_empty() {
        return false;
    }
    if target == candidate || target.contains(&candidate) || candidate.contains(&target) {
        return true;
    }

    let a: HashSet<&str> = target.split(' ').collect();
    let b: HashSet<&str> = candidate.split(' ').collect();
    let union = a.union(&b).count();
    union > 0 && a.intersection(&b).count() as f64 / union as f64 >= TITLE_SIMILARITY
}

/// Apply scope selection to candidates already ordered by priority.
/// Group order follows the first appearance of each group.
pub fn select_for_scope(candidates: Vec<Candidate>, query: &SearchQuery) -> Vec<Candidate> {
    let before = candidates.len();
    let selected = match query.scope {
        SearchScope::Title => {
            let target = query.title.as_deref().unwrap_or_default();
            let matching = candidates
                .into_iter()
                .filter(|c| titles_match(target, c.display_title()))
                .collect();
            best_per_group(matching, |c| c.server.to_lowercase())
        }
        SearchScope::Author => best_per_group(candidates, |c| normalize_title(c.display_title())),
    };
    debug!("Relevance selection kept {} of {} candidates", selected.len(), before);
    selected
}

/// Keep the best candidate per key: lowest priority, then highest version,
/// then quality keywords, then largest size
fn best_per_group(candidates: Vec<Candidate>, key: impl Fn(&Candidate) -> String) -> Vec<Candidate> {
    let mut keys: Vec<String> = Vec::new();
    let mut best: Vec<Candidate> = Vec::new();

    for candidate in candidates {
        let k = key(&candidate);
        match keys.iter().position(|existing| *existing == k) {
            Some(i) if better(&candidate, &best[i]) => best[i] = candidate,
            Some(_) => {}
            None => {
                keys.push(k);
                best.push(candidate);
            }
        }
    }
    best
}

fn better(a: &Candidate, b: &Candidate) -> bool {
    if a.priority != b.priority {
        return a.priority < b.priority;
    }
    let (va, vb) = (version_of(a.display_title()), version_of(b.display_title()));
    if va != vb {
        return va > vb;
    }
    let (qa, qb) = (quality_of(a.display_title()), quality_of(b.display_title()));
    if qa != qb {
        return qa > qb;
    }
    a.size.unwrap_or(0) > b.size.unwrap_or(0)
}
