//! Timeline combination
//!
//! Merges per-account item lists (each already in timeline order) into a
//! single ordered timeline, removes duplicate ids and groups by UTC date.

use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use super::item::{TimelineItem, compare_items};

/// Head of one source list inside the merge heap
struct HeapEntry {
    item: TimelineItem,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap pops the greatest entry; reverse so the item that comes
    // first in timeline order is greatest. Earlier sources win ties.
    fn cmp(&self, other: &Self) -> Ordering {
        compare_items(&other.item, &self.item).then_with(|| other.source.cmp(&self.source))
    }
}

/// K-way merge of sorted lists
///
/// A duplicate id keeps the position of its first occurrence and the
/// content of its last one.
pub fn combine(lists: Vec<Vec<TimelineItem>>) -> Vec<TimelineItem> {
    let total: usize = lists.iter().map(Vec::len).sum();
    let mut sources: Vec<std::vec::IntoIter<TimelineItem>> =
        lists.into_iter().map(Vec::into_iter).collect();

    let mut heap = BinaryHeap::with_capacity(sources.len());
    for (source, iter) in sources.iter_mut().enumerate() {
        if let Some(item) = iter.next() {
            heap.push(HeapEntry { item, source });
        }
    }

    let mut merged: Vec<TimelineItem> = Vec::with_capacity(total);
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(total);

    while let Some(HeapEntry { item, source }) = heap.pop() {
        if let Some(next) = sources[source].next() {
            heap.push(HeapEntry { item: next, source });
        }

        match positions.get(&item.id) {
            Some(&index) => merged[index] = item,
            None => {
                positions.insert(item.id.clone(), merged.len());
                merged.push(item);
            }
        }
    }

    merged
}

/// Items sharing a UTC calendar date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateGroup {
    /// `YYYY-MM-DD`
    pub date: NaiveDate,
    pub items: Vec<TimelineItem>,
}

/// Group consecutive items by UTC date, preserving order
pub fn group_by_date(items: Vec<TimelineItem>) -> Vec<DateGroup> {
    let mut groups: Vec<DateGroup> = Vec::new();

    for item in items {
        let date = item.timestamp.date_naive();
        match groups.last_mut() {
            Some(group) if group.date == date => group.items.push(item),
            _ => groups.push(DateGroup {
                date,
                items: vec![item],
            }),
        }
    }

    groups
}
