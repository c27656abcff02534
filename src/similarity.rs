// Near-duplicate lookup over raw schema content.
//
// Content is compared under normalized Levenshtein distance: the edit distance
// divided by the character length of the longer string. That quotient is not a
// metric, so the BK-tree is keyed by the raw (integer) edit distance, which is.
// A normalized threshold is translated into an integer search radius wide enough
// to cover every possible match, and each candidate is re-checked exactly.

use strsim::generic_levenshtein;

// Edit distance scaled into [0, 1]. Two empty strings are identical.
pub fn normalized(distance: usize, len_a: usize, len_b: usize) -> f64 {
    let longest = len_a.max(len_b);
    if longest == 0 {
        0.0
    } else {
        distance as f64 / longest as f64
    }
}

pub fn normalized_distance(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    normalized(generic_levenshtein(&a, &b), a.len(), b.len())
}

// Largest edit distance a string of `query_len` chars can have to any string
// within `threshold` normalized distance of it.
// A match x needs lev <= t * max(|q|, |x|) and lev >= |x| - |q|, so |x| <= |q| / (1 - t)
// and therefore lev <= t * |q| / (1 - t).
pub fn search_radius(query_len: usize, threshold: f64) -> usize {
    if threshold >= 1.0 {
        return usize::MAX;
    }
    let radius = (threshold * query_len as f64 / (1.0 - threshold)).ceil();
    if radius >= usize::MAX as f64 {
        usize::MAX
    } else {
        radius as usize
    }
}

struct BkNode {
    item: usize,
    children: Vec<(usize, usize)>,
}

// A Burkhard-Keller tree over items stored elsewhere, addressed by index.
pub struct BkTree {
    nodes: Vec<BkNode>,
}

impl Default for BkTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BkTree {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    // Insert item `item`; `distance_to` gives the metric distance from it to any other item.
    pub fn insert<F>(&mut self, item: usize, mut distance_to: F)
    where
        F: FnMut(usize) -> usize,
    {
        if self.nodes.is_empty() {
            self.nodes.push(BkNode {
                item,
                children: Vec::new(),
            });
            return;
        }
        let mut current = 0;
        loop {
            let d = distance_to(self.nodes[current].item);
            match self.nodes[current]
                .children
                .iter()
                .find(|(edge, _)| *edge == d)
                .map(|(_, child)| *child)
            {
                Some(child) => current = child,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(BkNode {
                        item,
                        children: Vec::new(),
                    });
                    self.nodes[current].children.push((d, next));
                    return;
                }
            }
        }
    }

    // All items whose distance (as given by `distance_to`) is at most `radius`,
    // paired with that distance.
    pub fn find<F>(&self, radius: usize, mut distance_to: F) -> Vec<(usize, usize)>
    where
        F: FnMut(usize) -> usize,
    {
        let mut found = Vec::new();
        if self.nodes.is_empty() {
            return found;
        }
        let mut stack = vec![0];
        while let Some(current) = stack.pop() {
            let node = &self.nodes[current];
            let d = distance_to(node.item);
            if d <= radius {
                found.push((node.item, d));
            }
            let low = d.saturating_sub(radius);
            let high = d.saturating_add(radius);
            for (edge, child) in node.children.iter() {
                if *edge >= low && *edge <= high {
                    stack.push(*child);
                }
            }
        }
        found
    }
}

struct IndexedContent {
    id: String,
    chars: Vec<char>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch<'a> {
    pub id: &'a str,
    pub distance: f64,
}

// Content index used to find near-duplicate schemas.
// Content is trimmed of surrounding whitespace. Empty content is never indexed,
// and an empty query matches nothing.
pub struct SimilarityIndex {
    items: Vec<IndexedContent>,
    tree: BkTree,
    skipped_empty: usize,
}

impl SimilarityIndex {
    pub fn build<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut index = SimilarityIndex {
            items: Vec::new(),
            tree: BkTree::new(),
            skipped_empty: 0,
        };
        for (id, content) in items {
            index.insert(id, content);
        }
        index
    }

    pub fn insert(&mut self, id: &str, content: &str) {
        let chars: Vec<char> = content.trim().chars().collect();
        if chars.is_empty() {
            self.skipped_empty += 1;
            return;
        }
        let item = self.items.len();
        self.items.push(IndexedContent {
            id: id.to_owned(),
            chars,
        });
        let items = &self.items;
        self.tree
            .insert(item, |other| generic_levenshtein(&items[item].chars, &items[other].chars));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn skipped_empty(&self) -> usize {
        self.skipped_empty
    }

    // Every indexed item within `threshold` normalized distance of `content`.
    pub fn query(&self, content: &str, threshold: f64) -> Vec<SimilarityMatch<'_>> {
        let query: Vec<char> = content.trim().chars().collect();
        if query.is_empty() {
            return Vec::new();
        }
        let radius = search_radius(query.len(), threshold);
        let mut matches: Vec<SimilarityMatch<'_>> = self
            .tree
            .find(radius, |item| generic_levenshtein(&query, &self.items[item].chars))
            .into_iter()
            .filter_map(|(item, d)| {
                let distance = normalized(d, query.len(), self.items[item].chars.len());
                (distance <= threshold).then(|| SimilarityMatch {
                    id: self.items[item].id.as_str(),
                    distance,
                })
            })
            .collect();
        matches.sort_by(|a, b| a.id.cmp(b.id));
        matches
    }

    // Linear scan with the same acceptance rule as `query`.
    pub fn exhaustive_query(&self, content: &str, threshold: f64) -> Vec<SimilarityMatch<'_>> {
        let query: Vec<char> = content.trim().chars().collect();
        if query.is_empty() {
            return Vec::new();
        }
        let mut matches: Vec<SimilarityMatch<'_>> = self
            .items
            .iter()
            .filter_map(|item| {
                let d = generic_levenshtein(&query, &item.chars);
                let distance = normalized(d, query.len(), item.chars.len());
                (distance <= threshold).then(|| SimilarityMatch {
                    id: item.id.as_str(),
                    distance,
                })
            })
            .collect();
        matches.sort_by(|a, b| a.id.cmp(b.id));
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn distance_counts_chars_not_bytes() {
        assert_eq!(normalized_distance("kitten", "sitting"), 3.0 / 7.0);
        assert_eq!(normalized_distance("flaw", "lawn"), 0.5);
        assert_eq!(normalized_distance("same", "same"), 0.0);
        // 'é' is two bytes but one edit
        assert_eq!(normalized_distance("héllo", "hello"), 0.2);
    }

    #[test]
    fn normalized_distance_bounds() {
        assert_eq!(normalized_distance("", ""), 0.0);
        assert_eq!(normalized_distance("abcd", ""), 1.0);
        assert_eq!(normalized_distance("abcd", "abce"), 0.25);
        assert_eq!(normalized_distance("abcd", "wxyz"), 1.0);
    }

    #[test]
    fn search_radius_covers_longer_matches() {
        // 10 chars at threshold 0.5 can match a 20 char string at distance 10
        assert!(search_radius(10, 0.5) >= 10);
        assert_eq!(search_radius(10, 0.0), 0);
        assert_eq!(search_radius(10, 1.0), usize::MAX);
    }

    #[test]
    fn query_includes_self_and_near_duplicates() {
        let index = SimilarityIndex::build(vec![
            ("a", "{\"type\": \"object\"}"),
            ("b", "{\"type\": \"objects\"}"),
            ("c", "something else entirely"),
        ]);
        let ids: Vec<&str> = index
            .query("{\"type\": \"object\"}", 0.1)
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn empty_content_is_never_similar() {
        let index = SimilarityIndex::build(vec![("a", "   "), ("b", ""), ("c", "x")]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.skipped_empty(), 2);
        assert!(index.query("", 1.0).is_empty());
        assert!(index.query("  \n", 1.0).is_empty());
        assert_eq!(index.query("y", 1.0).len(), 1);
    }

    #[test]
    fn threshold_one_matches_everything_non_empty() {
        let index = SimilarityIndex::build(vec![("a", "aaaa"), ("b", "b"), ("c", "cccccccccc")]);
        assert_eq!(index.query("zz", 1.0).len(), 3);
    }

    #[test]
    fn bk_tree_agrees_with_exhaustive_scan() {
        let mut rng = StdRng::seed_from_u64(7);
        let alphabet = ['a', 'b', 'c', '{', '}'];
        let contents: Vec<String> = (0..300)
            .map(|_| {
                let len = rng.gen_range(1..24);
                (0..len)
                    .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
                    .collect()
            })
            .collect();
        let ids: Vec<String> = (0..contents.len()).map(|i| format!("s{:03}", i)).collect();
        let index = SimilarityIndex::build(
            ids.iter()
                .map(|s| s.as_str())
                .zip(contents.iter().map(|s| s.as_str())),
        );
        for threshold in [0.0, 0.1, 0.25, 0.4, 0.6, 0.9] {
            for content in contents.iter().take(60) {
                assert_eq!(
                    index.query(content, threshold),
                    index.exhaustive_query(content, threshold),
                    "threshold {} content {:?}",
                    threshold,
                    content
                );
            }
        }
    }
}
