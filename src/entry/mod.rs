use std::cmp::Ordering;

use serde::Serialize;

use crate::encoding::{Decode, Encode, KeyReader, KeyWriter};

pub type EntryId = i64;
pub type Score = i64;
pub type Timestamp = i64;
pub type Rank = i32;
pub type Category = i16;

/// One ranked entity.
///
/// `rank` is only meaningful on values returned from a query, where it holds
/// the 1-based rank at the moment the query ran. Stored entries keep it at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Entry {
    pub id: EntryId,
    pub score: Score,
    pub rank: Rank,
    pub timestamp: Timestamp,
}

impl Entry {
    pub fn new(id: EntryId, score: Score, timestamp: Timestamp) -> Self {
        Entry {
            id,
            score,
            rank: 0,
            timestamp,
        }
    }

    pub fn key(&self) -> OrderKey {
        OrderKey {
            score: self.score,
            timestamp: self.timestamp,
            id: self.id,
        }
    }

    pub(crate) fn ranked(mut self, rank: Rank) -> Self {
        self.rank = rank;
        self
    }
}

impl From<OrderKey> for Entry {
    fn from(key: OrderKey) -> Self {
        Entry::new(key.id, key.score, key.timestamp)
    }
}

/// The position of an entry in the ranking.
///
/// Orders by score descending, then timestamp ascending, then id ascending,
/// so the smallest key is rank 1. Two keys are equal only if all three
/// components are, which for live entries means the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub score: Score,
    pub timestamp: Timestamp,
    pub id: EntryId,
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A flattened `(category, entry)` pair, the shape used to hydrate or dump a
/// whole registry at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CategoryRecord {
    pub category: Category,
    pub id: EntryId,
    pub score: Score,
    pub timestamp: Timestamp,
}

impl CategoryRecord {
    pub fn new(category: Category, entry: &Entry) -> Self {
        CategoryRecord {
            category,
            id: entry.id,
            score: entry.score,
            timestamp: entry.timestamp,
        }
    }
}

impl Encode for Entry {
    fn write_bytes(&self, kw: &mut KeyWriter) {
        (self.id, (self.score, (self.rank, self.timestamp))).write_bytes(kw);
    }
}

impl Decode for Entry {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let (id, (score, (rank, timestamp))) = <(EntryId, (Score, (Rank, Timestamp)))>::decode(kr)?;
        Ok(Entry {
            id,
            score,
            rank,
            timestamp,
        })
    }
}

impl Encode for CategoryRecord {
    fn write_bytes(&self, kw: &mut KeyWriter) {
        (self.category, (self.id, (self.score, self.timestamp))).write_bytes(kw);
    }
}

impl Decode for CategoryRecord {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let (category, (id, (score, timestamp))) =
            <(Category, (EntryId, (Score, Timestamp)))>::decode(kr)?;
        Ok(CategoryRecord {
            category,
            id,
            score,
            timestamp,
        })
    }
}
