use ahash::AHashMap;
use serde::Serialize;

use crate::inventory::SchemaRecord;
use crate::log_pbar::LogProgressBar;
use crate::similarity::SimilarityIndex;
use crate::union_find::DisjointSet;

// A maximal set of records connected by a shared organization or by similar content.
#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    pub id: usize,
    pub representative: String,
    pub members: Vec<String>,
}

impl Group {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct GroupingStats {
    pub records: usize,
    pub organizations: usize,
    pub similarity_links: usize,
    pub similarity_merges: usize,
    pub empty_contents: usize,
    pub groups: usize,
    pub largest_group: usize,
}

// Union every record with the first record seen for its organization.
// Returns the number of distinct organizations.
pub fn group_by_organization(records: &[SchemaRecord], sets: &mut DisjointSet) -> usize {
    let mut first_of_org: AHashMap<&str, &str> = AHashMap::new();
    let mut pbar = LogProgressBar::new("Grouping by repository", records.len());
    for record in records {
        sets.add(&record.id);
        match first_of_org.get(record.organization.as_str()) {
            Some(first) => {
                sets.union(first, &record.id);
            }
            None => {
                first_of_org.insert(&record.organization, &record.id);
            }
        }
        pbar.inc(1);
    }
    pbar.finish();
    first_of_org.len()
}

// Index every record's content, then union each record with everything the
// index returns for its own content.
// Returns (links found, merges performed, empty contents). Self matches are not links.
pub fn group_by_similarity(
    records: &[SchemaRecord],
    threshold: f64,
    sets: &mut DisjointSet,
) -> (usize, usize, usize) {
    let index = SimilarityIndex::build(
        records
            .iter()
            .map(|r| (r.id.as_str(), r.content.as_str())),
    );
    log::info!(
        "Indexed {} schemas for similarity ({} empty)",
        index.len(),
        index.skipped_empty()
    );

    let mut links = 0;
    let mut merges = 0;
    let mut pbar = LogProgressBar::new("Grouping similar files", records.len());
    for record in records {
        for found in index.query(&record.content, threshold) {
            if found.id == record.id {
                continue;
            }
            links += 1;
            if sets.union(&record.id, found.id) {
                merges += 1;
            }
        }
        pbar.inc(1);
    }
    pbar.finish();
    // every link is seen from both ends
    (links / 2, merges, index.skipped_empty())
}

pub fn enumerate_groups(sets: &mut DisjointSet) -> Vec<Group> {
    let components = sets.components();
    components
        .into_iter()
        .enumerate()
        .map(|(id, members)| {
            let representative = sets
                .find(&members[0])
                .map(|r| r.to_owned())
                .unwrap_or_else(|| members[0].clone());
            Group {
                id,
                representative,
                members,
            }
        })
        .collect()
}

// Organization grouping, then similarity grouping when `similarity` is positive.
pub fn build_groups(records: &[SchemaRecord], similarity: f64) -> (Vec<Group>, GroupingStats) {
    let mut sets = DisjointSet::with_capacity(records.len());
    let mut stats = GroupingStats {
        records: records.len(),
        ..Default::default()
    };

    stats.organizations = group_by_organization(records, &mut sets);
    log::info!(
        "{} records in {} organizations",
        stats.records,
        stats.organizations
    );

    if similarity > 0.0 {
        let (links, merges, empty) = group_by_similarity(records, similarity, &mut sets);
        stats.similarity_links = links;
        stats.similarity_merges = merges;
        stats.empty_contents = empty;
        log::info!(
            "Found {} similar pairs at threshold {}, merging {} groups",
            links,
            similarity,
            merges
        );
    }

    let groups = enumerate_groups(&mut sets);
    stats.groups = groups.len();
    stats.largest_group = groups.iter().map(|g| g.len()).max().unwrap_or(0);
    log::info!(
        "Formed {} groups, largest has {} schemas",
        stats.groups,
        stats.largest_group
    );
    (groups, stats)
}
