//! Name similarity used by reconciliation.
//!
//! Pure functions only. `similarity(a, b) == similarity(b, a)` for all
//! inputs, and identical names (after normalization) always score 100.

/// Credit for a token that abbreviates another ("app" / "application").
const PREFIX_CREDIT: f64 = 0.5;
const MIN_PREFIX_LEN: usize = 3;

const NUMBER_WORDS: [(&str, &str); 12] = [
    ("one", "1"),
    ("two", "2"),
    ("three", "3"),
    ("four", "4"),
    ("five", "5"),
    ("six", "6"),
    ("seven", "7"),
    ("eight", "8"),
    ("nine", "9"),
    ("ten", "10"),
    ("eleven", "11"),
    ("twelve", "12"),
];

/// Lowercase, split on whitespace, `-` and `_`, and map spelled-out
/// numbers to digits.
pub fn name_tokens(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|t| !t.is_empty())
        .map(|t| {
            NUMBER_WORDS
                .iter()
                .find(|(word, _)| *word == t)
                .map_or_else(|| t.to_string(), |(_, digit)| digit.to_string())
        })
        .collect()
}

pub fn normalize_name(name: &str) -> String {
    name_tokens(name).join(" ")
}

/// Similarity score in [0, 100], rounded to two decimals.
pub fn similarity(a: &str, b: &str) -> f64 {
    let tokens_a = name_tokens(a);
    let tokens_b = name_tokens(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    if tokens_a == tokens_b {
        return 100.0;
    }

    let chars_a: Vec<char> = tokens_a.join(" ").chars().collect();
    let chars_b: Vec<char> = tokens_b.join(" ").chars().collect();
    let char_score = char_ratio(&chars_a, &chars_b).max(char_ratio(&chars_b, &chars_a));
    let score = char_score.max(token_score(&tokens_a, &tokens_b)) * 100.0;

    (score.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

/// Ratcliff/Obershelp ratio: 2·M / (|a| + |b|).
fn char_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 0.0;
    }
    2.0 * matching_characters(a, b) as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_common_block(a, b, alo, ahi, blo, bhi);
        if k > 0 {
            matched += k;
            pending.push((alo, i, blo, j));
            pending.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest common substring of a[alo..ahi] and b[blo..bhi] as (i, j, len).
/// Earliest position in `a` wins ties.
fn longest_common_block(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let width = bhi.saturating_sub(blo);
    let mut best = (alo, blo, 0);
    let mut prev = vec![0usize; width + 1];
    let mut cur = vec![0usize; width + 1];
    for i in alo..ahi {
        cur.iter_mut().for_each(|c| *c = 0);
        for j in blo..bhi {
            if a[i] == b[j] {
                let k = prev[j - blo] + 1;
                cur[j - blo + 1] = k;
                if k > best.2 {
                    best = (i + 1 - k, j + 1 - k, k);
                }
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}

/// Average best per-token credit over the tokens of both names.
fn token_score(a: &[String], b: &[String]) -> f64 {
    let side = |from: &[String], to: &[String]| -> f64 {
        from.iter()
            .map(|t| to.iter().map(|u| token_credit(t, u)).fold(0.0, f64::max))
            .sum()
    };
    (side(a, b) + side(b, a)) / (a.len() + b.len()) as f64
}

fn token_credit(t: &str, u: &str) -> f64 {
    if t == u {
        return 1.0;
    }
    let (short, long) = if t.len() <= u.len() { (t, u) } else { (u, t) };
    if short.chars().count() >= MIN_PREFIX_LEN && long.starts_with(short) {
        PREFIX_CREDIT
    } else {
        0.0
    }
}
