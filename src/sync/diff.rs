//! Word-level diff for conflict review
//!
//! Side-by-side conflict resolution needs to show which words each device
//! added. This is a plain LCS diff over whitespace-split words; adjacent
//! words with the same origin are folded into one segment.

use serde::{Deserialize, Serialize};

/// One run of words with a single origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", content = "text", rename_all = "lowercase")]
pub enum DiffSegment {
    /// Present in both versions.
    Equal(String),
    /// Only in the local version.
    Local(String),
    /// Only in the remote version.
    Remote(String),
}

/// Diffs two texts word by word. Equal runs come from the longest common
/// subsequence; everything else is attributed to the side it appears on,
/// local runs before remote runs at each divergence.
pub fn word_diff(local: &str, remote: &str) -> Vec<DiffSegment> {
    let a: Vec<&str> = local.split_whitespace().collect();
    let b: Vec<&str> = remote.split_whitespace().collect();

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut segments: Vec<(Origin, Vec<&str>)> = Vec::new();
    let (mut i, mut j) = (0, 0);
    let mut raw: Vec<(Origin, &str)> = Vec::new();
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            raw.push((Origin::Equal, a[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            raw.push((Origin::Local, a[i]));
            i += 1;
        } else {
            raw.push((Origin::Remote, b[j]));
            j += 1;
        }
    }
    while i < a.len() {
        raw.push((Origin::Local, a[i]));
        i += 1;
    }
    while j < b.len() {
        raw.push((Origin::Remote, b[j]));
        j += 1;
    }

    for (origin, word) in raw {
        match segments.last_mut() {
            Some((last, words)) if *last == origin => words.push(word),
            _ => segments.push((origin, vec![word])),
        }
    }

    segments
        .into_iter()
        .map(|(origin, words)| {
            let text = words.join(" ");
            match origin {
                Origin::Equal => DiffSegment::Equal(text),
                Origin::Local => DiffSegment::Local(text),
                Origin::Remote => DiffSegment::Remote(text),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Equal,
    Local,
    Remote,
}
