//! Token-set name similarity on a 0–100 scale.
//!
//! Both names are normalized (non-ASCII dropped, punctuation folded to
//! whitespace, lowercased), split into token sets, and compared as:
//! - the shared tokens alone,
//! - shared tokens + tokens unique to the left name,
//! - shared tokens + tokens unique to the right name.
//!
//! The score is the best normalized Indel similarity among those pairings, so
//! word order and repeated words never matter and a name that is a token
//! subset of the other scores 100.

use std::collections::BTreeSet;

/// Normalize a name for comparison.
pub fn normalize(name: &str) -> String {
    let folded: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    folded.trim().to_string()
}

/// Token-set similarity between two raw names, rounded to an integer score.
pub fn token_set_ratio(left: &str, right: &str) -> u8 {
    let left = normalize(left);
    let right = normalize(right);
    token_set_ratio_normalized(&left, &right).round_ties_even() as u8
}

fn token_set_ratio_normalized(left: &str, right: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = left.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = right.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let shared: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    if !shared.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let diff_a = only_a.join(" ");
    let diff_b = only_b.join(" ");
    let shared_len = shared.join(" ").len();
    let sep = usize::from(shared_len != 0);

    let shared_a_len = shared_len + sep + diff_a.len();
    let shared_b_len = shared_len + sep + diff_b.len();

    let diff_distance = indel_distance(&diff_a, &diff_b);
    let mut best = normalized_similarity(diff_distance, shared_a_len + shared_b_len);

    if shared_len == 0 {
        return best;
    }

    // shared vs shared+diff differs only by the appended diff and separator
    let shared_vs_a = normalized_similarity(sep + diff_a.len(), shared_len + shared_a_len);
    let shared_vs_b = normalized_similarity(sep + diff_b.len(), shared_len + shared_b_len);
    best = best.max(shared_vs_a).max(shared_vs_b);
    best
}

fn normalized_similarity(distance: usize, total_len: usize) -> f64 {
    if total_len == 0 {
        return 100.0;
    }
    100.0 - 100.0 * distance as f64 / total_len as f64
}

/// Insertions plus deletions needed to turn `a` into `b`.
fn indel_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    a.len() + b.len() - 2 * longest_common_subsequence(&a, &b)
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
