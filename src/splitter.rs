use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::grouper::Group;

// Validation and test should each get half of the held-out items. A larger gap
// than this (as a fraction of held-out items) is reported as skew.
pub const SKEW_TOLERANCE: f64 = 0.1;

// Groups holding more than this fraction of a partition's items are placed before
// the small ones, so a late oversized group cannot overshoot the target.
pub const LARGE_GROUP_FRACTION: f64 = 0.01;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Validation, Split::Test];

    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "validation",
            Split::Test => "test",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.jsonl.gz", self.name())
    }

    fn slot(&self) -> usize {
        match self {
            Split::Train => 0,
            Split::Validation => 1,
            Split::Test => 2,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Which split each group went to, and the member ids of each split.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitAssignment {
    by_group: Vec<Split>,
    ids: [Vec<String>; 3],
    groups: [usize; 3],
}

impl SplitAssignment {
    pub fn split_of(&self, group_id: usize) -> Option<Split> {
        self.by_group.get(group_id).copied()
    }

    pub fn ids(&self, split: Split) -> &[String] {
        &self.ids[split.slot()]
    }

    pub fn group_count(&self, split: Split) -> usize {
        self.groups[split.slot()]
    }

    pub fn item_count(&self, split: Split) -> usize {
        self.ids[split.slot()].len()
    }

    pub fn total_items(&self) -> usize {
        self.ids.iter().map(|ids| ids.len()).sum()
    }

    pub fn realized_fraction(&self, split: Split) -> f64 {
        let total = self.total_items();
        if total == 0 {
            0.0
        } else {
            self.item_count(split) as f64 / total as f64
        }
    }

    // |validation - test| as a fraction of the held-out items, 0 when nothing is held out.
    pub fn validation_test_skew(&self) -> f64 {
        let validation = self.item_count(Split::Validation);
        let test = self.item_count(Split::Test);
        let held_out = validation + test;
        if held_out == 0 {
            0.0
        } else {
            validation.abs_diff(test) as f64 / held_out as f64
        }
    }
}

// Walk the groups in a shuffled order, large groups first, putting a group on the
// primary side when that leaves the primary item count no further from its target
// than before. Whole groups only; every group is visited once, so a dominant group
// just ends up on whichever side it fits best.
fn partition_groups<'a, R: Rng + ?Sized>(
    groups: &[&'a Group],
    fraction: f64,
    rng: &mut R,
) -> (Vec<&'a Group>, Vec<&'a Group>) {
    let total: usize = groups.iter().map(|g| g.len()).sum();
    let target = fraction * total as f64;

    let large = LARGE_GROUP_FRACTION * total as f64;

    let mut order: Vec<&'a Group> = groups.to_vec();
    order.shuffle(rng);
    // stable, so both halves keep their shuffled order
    order.sort_by_key(|g| std::cmp::Reverse(g.len() as f64 > large));

    let mut primary = Vec::new();
    let mut remainder = Vec::new();
    let mut primary_items = 0usize;
    for group in order {
        let shortfall = target - primary_items as f64;
        let overshoot = (primary_items + group.len()) as f64 - target;
        if overshoot <= shortfall {
            primary_items += group.len();
            primary.push(group);
        } else {
            remainder.push(group);
        }
    }
    (primary, remainder)
}

// Assign whole groups to train, validation and test.
// `train_fraction` of the items go to train; the rest is halved between test and
// validation with the same rng stream. The result depends only on the groups,
// the fraction and the rng state. Group ids must be their positions in `groups`.
pub fn split_groups<R: Rng + ?Sized>(
    groups: &[Group],
    train_fraction: f64,
    rng: &mut R,
) -> SplitAssignment {
    let all: Vec<&Group> = groups.iter().collect();
    let (train, held_out) = partition_groups(&all, train_fraction, rng);
    let (test, validation) = partition_groups(&held_out, 0.5, rng);

    let mut by_group = vec![Split::Train; groups.len()];
    for (split, assigned) in [
        (Split::Train, &train),
        (Split::Validation, &validation),
        (Split::Test, &test),
    ] {
        for group in assigned.iter() {
            by_group[group.id] = split;
        }
    }

    // Ids are listed in group enumeration order so output order does not depend
    // on the shuffle.
    let mut ids: [Vec<String>; 3] = Default::default();
    let mut counts = [0usize; 3];
    for group in groups {
        let split = by_group[group.id];
        ids[split.slot()].extend(group.members.iter().cloned());
        counts[split.slot()] += 1;
    }

    let assignment = SplitAssignment {
        by_group,
        ids,
        groups: counts,
    };
    for split in Split::ALL {
        log::info!(
            "{}: {} groups, {} schemas ({:.1}%)",
            split,
            assignment.group_count(split),
            assignment.item_count(split),
            100.0 * assignment.realized_fraction(split)
        );
    }
    let skew = assignment.validation_test_skew();
    if skew > SKEW_TOLERANCE {
        log::warn!(
            "Validation/test split is skewed: {} vs {} schemas ({:.1}% of held-out items)",
            assignment.item_count(Split::Validation),
            assignment.item_count(Split::Test),
            100.0 * skew
        );
    }
    assignment
}
