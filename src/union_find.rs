use ahash::AHashMap;

// A disjoint-set forest over string ids.
// Ids are interned into dense indices in insertion order, which is also the order
// `components` reports groups and members in.
pub struct DisjointSet {
    ids: Vec<String>,
    index: AHashMap<String, usize>,
    parent: Vec<usize>,
    rank: Vec<u8>,
    num_components: usize,
}

impl Default for DisjointSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DisjointSet {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            index: AHashMap::with_capacity(capacity),
            parent: Vec::with_capacity(capacity),
            rank: Vec::with_capacity(capacity),
            num_components: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    // Add an id as a singleton set. Adding an existing id is a no-op.
    // Returns the dense index of the id.
    pub fn add(&mut self, id: &str) -> usize {
        if let Some(&i) = self.index.get(id) {
            return i;
        }
        let i = self.ids.len();
        self.ids.push(id.to_owned());
        self.index.insert(id.to_owned(), i);
        self.parent.push(i);
        self.rank.push(0);
        self.num_components += 1;
        i
    }

    // Canonical representative of the set containing `id`, or `None` if the id
    // was never added.
    pub fn find(&mut self, id: &str) -> Option<&str> {
        let i = *self.index.get(id)?;
        let root = self.find_index(i);
        Some(self.ids[root].as_str())
    }

    // Merge the sets containing `a` and `b`, adding either id if it is unknown.
    // Returns false when both were already in the same set.
    pub fn union(&mut self, a: &str, b: &str) -> bool {
        let a = self.add(a);
        let b = self.add(b);
        self.union_indices(a, b)
    }

    pub fn same_set(&mut self, a: &str, b: &str) -> bool {
        match (self.index.get(a).copied(), self.index.get(b).copied()) {
            (Some(a), Some(b)) => self.find_index(a) == self.find_index(b),
            _ => false,
        }
    }

    // Every added id exactly once, grouped by set.
    // Groups are ordered by their earliest-added member, members by insertion order.
    pub fn components(&mut self) -> Vec<Vec<String>> {
        let mut slot_of_root: AHashMap<usize, usize> = AHashMap::with_capacity(self.num_components);
        let mut components: Vec<Vec<String>> = Vec::with_capacity(self.num_components);
        for i in 0..self.ids.len() {
            let root = self.find_index(i);
            let slot = *slot_of_root.entry(root).or_insert_with(|| {
                components.push(Vec::new());
                components.len() - 1
            });
            components[slot].push(self.ids[i].clone());
        }
        components
    }

    fn find_index(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // path compression
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union_indices(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find_index(a);
        let rb = self.find_index(b);
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        self.num_components -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut ds = DisjointSet::new();
        assert_eq!(ds.add("a"), 0);
        assert_eq!(ds.add("b"), 1);
        assert_eq!(ds.add("a"), 0);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.num_components(), 2);
    }

    #[test]
    fn find_unknown_is_none() {
        let mut ds = DisjointSet::new();
        ds.add("a");
        assert_eq!(ds.find("a"), Some("a"));
        assert_eq!(ds.find("missing"), None);
    }

    #[test]
    fn union_is_transitive() {
        let mut ds = DisjointSet::new();
        for id in ["a", "b", "c", "d"] {
            ds.add(id);
        }
        assert!(ds.union("a", "b"));
        assert!(ds.union("b", "c"));
        assert!(!ds.union("a", "c"));
        assert!(ds.same_set("a", "c"));
        assert!(!ds.same_set("a", "d"));
        let rep_a = ds.find("a").unwrap().to_owned();
        assert_eq!(ds.find("c").unwrap(), rep_a);
        assert_eq!(ds.num_components(), 2);
    }

    #[test]
    fn union_adds_unknown_ids() {
        let mut ds = DisjointSet::new();
        ds.union("x", "y");
        assert!(ds.contains("x"));
        assert!(ds.contains("y"));
        assert_eq!(ds.num_components(), 1);
    }

    #[test]
    fn components_partition_all_ids_in_insertion_order() {
        let mut ds = DisjointSet::new();
        for id in ["a", "b", "c", "d", "e"] {
            ds.add(id);
        }
        ds.union("e", "b");
        ds.union("d", "a");
        let components = ds.components();
        assert_eq!(
            components,
            vec![
                vec!["a".to_string(), "d".to_string()],
                vec!["b".to_string(), "e".to_string()],
                vec!["c".to_string()],
            ]
        );
        let total: usize = components.iter().map(|c| c.len()).sum();
        assert_eq!(total, ds.len());
    }

    #[test]
    fn long_chain_collapses() {
        let mut ds = DisjointSet::with_capacity(100_000);
        let ids: Vec<String> = (0..100_000).map(|i| format!("id-{}", i)).collect();
        for pair in ids.windows(2) {
            ds.union(&pair[0], &pair[1]);
        }
        assert_eq!(ds.num_components(), 1);
        assert_eq!(ds.components().len(), 1);
        let first = ds.find("id-0").unwrap().to_owned();
        assert_eq!(ds.find("id-99999").unwrap(), first);
    }
}
