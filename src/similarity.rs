//! Approximate name matching against a set of popular package names.
//!
//! Names are folded into a "skeleton" before comparison so that visually
//! confusable spellings collapse together:
//!
//! | Input | Skeleton |
//! |-------|----------|
//! | `1`   | `l`      |
//! | `0`   | `o`      |
//! | `rn`  | `m`      |
//! | `vv`  | `w`      |
//! | `_` `.` | `-`    |
//!
//! Distance is the optimal-string-alignment edit distance between skeletons
//! (insert, delete, substitute and adjacent transposition all cost 1).
//!
//! The index buckets entries by skeleton length, so a lookup only computes
//! distances against names whose length is within the search radius, and each
//! computation stops as soon as the radius is exceeded.
//!
//! # Example
//!
//! ```
//! use zerotrust_scan::similarity::SimilarityIndex;
//!
//! let index = SimilarityIndex::new(["requests", "lodash"], 3);
//! let nearest = index.nearest_neighbors("reqeusts");
//!
//! assert_eq!(nearest[0].candidate, "requests");
//! assert_eq!(nearest[0].distance, 1);
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

const BUNDLED_POPULAR: &str = include_str!("../data/popular_npm.txt");

/// Upper bound on the number of neighbors returned by a lookup.
pub const MAX_NEIGHBORS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub candidate: String,
    pub distance: usize,
}

#[derive(Debug)]
struct Entry {
    name: String,
    skeleton: Vec<char>,
}

/// Read-only after construction; safe to share across tasks.
#[derive(Debug)]
pub struct SimilarityIndex {
    names: HashSet<String>,
    buckets: BTreeMap<usize, Vec<Entry>>,
    radius: usize,
}

impl SimilarityIndex {
    /// Builds an index. `radius` is the largest distance a lookup reports.
    pub fn new<I, S>(names: I, radius: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self {
            names: HashSet::new(),
            buckets: BTreeMap::new(),
            radius,
        };

        for name in names {
            let name = name.as_ref().trim().to_lowercase();
            if name.is_empty() || !index.names.insert(name.clone()) {
                continue;
            }
            let skeleton = skeleton(&name);
            index
                .buckets
                .entry(skeleton.len())
                .or_default()
                .push(Entry { name, skeleton });
        }

        index
    }

    /// Index over the popular-name list shipped with the crate.
    pub fn bundled(radius: usize) -> Self {
        Self::new(parse_name_list(BUNDLED_POPULAR), radius)
    }

    /// Index over a newline-separated name list on disk.
    pub fn from_file(path: &Path, radius: usize) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::new(parse_name_list(&content), radius))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// True when `name` is itself one of the popular names.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.trim().to_lowercase())
    }

    /// Up to [`MAX_NEIGHBORS`] popular names within the radius, ordered by
    /// ascending distance, then lexicographically. The queried name itself is
    /// never its own neighbor.
    pub fn nearest_neighbors(&self, name: &str) -> Vec<Neighbor> {
        let name = name.trim().to_lowercase();
        let query = skeleton(&name);
        let lo = query.len().saturating_sub(self.radius);
        let hi = query.len() + self.radius;

        let mut neighbors: Vec<Neighbor> = self
            .buckets
            .range(lo..=hi)
            .flat_map(|(_, entries)| entries.iter())
            .filter(|entry| entry.name != name)
            .filter_map(|entry| {
                bounded_distance(&query, &entry.skeleton, self.radius).map(|distance| Neighbor {
                    candidate: entry.name.clone(),
                    distance,
                })
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .cmp(&b.distance)
                .then_with(|| a.candidate.cmp(&b.candidate))
        });
        neighbors.truncate(MAX_NEIGHBORS);
        neighbors
    }
}

fn parse_name_list(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Folds confusable characters so look-alike names compare equal.
pub fn skeleton(name: &str) -> Vec<char> {
    let chars: Vec<char> = name.to_lowercase().chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        let pair = (chars[i], chars.get(i + 1).copied());
        match pair {
            ('r', Some('n')) => {
                out.push('m');
                i += 2;
            }
            ('v', Some('v')) => {
                out.push('w');
                i += 2;
            }
            (c, _) => {
                out.push(match c {
                    '1' => 'l',
                    '0' => 'o',
                    '_' | '.' => '-',
                    other => other,
                });
                i += 1;
            }
        }
    }

    out
}

/// Homoglyph-aware edit distance between two names.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a = skeleton(a);
    let b = skeleton(b);
    let max = a.len().max(b.len());
    bounded_distance(&a, &b, max).unwrap_or(max)
}

/// Optimal-string-alignment distance, or `None` once it must exceed `max`.
fn bounded_distance(a: &[char], b: &[char], max: usize) -> Option<usize> {
    if a.len().abs_diff(b.len()) > max {
        return None;
    }
    if a.is_empty() || b.is_empty() {
        let d = a.len().max(b.len());
        return (d <= max).then_some(d);
    }

    let m = b.len();
    let mut before_prev: Vec<usize> = vec![0; m + 1];
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr: Vec<usize> = vec![0; m + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        let mut row_min = curr[0];

        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut value = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                value = value.min(before_prev[j - 2] + 1);
            }
            curr[j] = value;
            row_min = row_min.min(value);
        }

        if row_min > max {
            return None;
        }

        std::mem::swap(&mut before_prev, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }

    let d = prev[m];
    (d <= max).then_some(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_distance_basics() {
        assert_eq!(edit_distance("lodash", "lodash"), 0);
        assert_eq!(edit_distance("lodash", "lodah"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("abc", ""), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_transposition_costs_one() {
        assert_eq!(edit_distance("reqeusts", "requests"), 1);
        assert_eq!(edit_distance("lodahs", "lodash"), 1);
    }

    #[test]
    fn test_homoglyphs_collapse() {
        assert_eq!(edit_distance("1odash", "lodash"), 0);
        assert_eq!(edit_distance("expre55", "express"), 2);
        assert_eq!(edit_distance("rnoment", "moment"), 0);
        assert_eq!(edit_distance("vvinston", "winston"), 0);
        assert_eq!(edit_distance("b0dy_parser", "body-parser"), 0);
    }

    #[test]
    fn test_bounded_distance_gives_up_early() {
        let a = skeleton("completely-different");
        let b = skeleton("lodash");
        assert_eq!(bounded_distance(&a, &b, 3), None);
        assert_eq!(bounded_distance(&skeleton("lodas"), &skeleton("lodash"), 1), Some(1));
    }

    #[test]
    fn test_nearest_neighbors_ordering_and_limit() {
        let index = SimilarityIndex::new(["abcd", "abce", "abcf", "abcg", "xbcd"], 2);
        let nearest = index.nearest_neighbors("abcx");
        assert_eq!(nearest.len(), MAX_NEIGHBORS);
        assert_eq!(
            nearest.iter().map(|n| n.candidate.as_str()).collect::<Vec<_>>(),
            vec!["abcd", "abce", "abcf"]
        );
        assert!(nearest.iter().all(|n| n.distance == 1));
    }

    #[test]
    fn test_nearest_neighbors_excludes_self_and_far_names() {
        let index = SimilarityIndex::new(["react", "preact", "express"], 2);
        let nearest = index.nearest_neighbors("react");
        assert_eq!(nearest, vec![Neighbor { candidate: "preact".into(), distance: 1 }]);
        assert!(index.nearest_neighbors("zzzzzzzzzz").is_empty());
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let index = SimilarityIndex::new(["Lodash"], 2);
        assert!(index.contains("lodash"));
        assert!(index.contains("LODASH"));
        assert!(!index.contains("lodash2"));
    }

    #[test]
    fn test_bundled_list_loads() {
        let index = SimilarityIndex::bundled(3);
        assert!(index.len() > 100);
        assert!(index.contains("express"));
        assert!(!index.contains("# Popular npm package names used as typosquat targets."));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.txt");
        std::fs::write(&path, "# comment\nleft-pad\n\nis-odd\n").unwrap();
        let index = SimilarityIndex::from_file(&path, 2).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains("left-pad"));
    }
}
