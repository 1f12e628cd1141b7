use std::collections::{hash_map, HashMap};

use parking_lot::RwLock;
use tracing::trace;

use crate::{
    config::Config,
    entry::{Entry, EntryId, OrderKey, Rank, Score, Timestamp},
    skiplist::RankList,
};


fn to_rank(position: usize) -> Rank {
    Rank::try_from(position).unwrap_or(Rank::MAX)
}

// The lookup map and the ordered index always hold the same set of ids, and
// every indexed key is exactly `entries[id].key()`.
#[derive(Debug)]
struct Inner {
    index: RankList<OrderKey>,
    entries: HashMap<EntryId, Entry>,
}

impl Inner {
    fn new(config: &Config) -> Self {
        Inner {
            index: RankList::new(config),
            entries: HashMap::new(),
        }
    }

    fn upsert(&mut self, id: EntryId, score: Score, timestamp: Timestamp) {
        match self.entries.entry(id) {
            hash_map::Entry::Vacant(slot) => {
                let entry = slot.insert(Entry::new(id, score, timestamp));
                self.index.insert(entry.key());
            }
            hash_map::Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                // An unchanged score keeps the original timestamp, and with it
                // the entry's place among equal scores.
                if entry.score != score {
                    Self::rekey(&mut self.index, entry, score, timestamp);
                }
            }
        }
    }

    fn increment(&mut self, id: EntryId, delta: Score, timestamp: Timestamp) {
        match self.entries.get_mut(&id) {
            None => self.upsert(id, delta, timestamp),
            Some(entry) => {
                let score = entry.score.saturating_add(delta);
                Self::rekey(&mut self.index, entry, score, timestamp);
            }
        }
    }

    // The old key has to come out of the index before the entry changes.
    fn rekey(
        index: &mut RankList<OrderKey>,
        entry: &mut Entry,
        score: Score,
        timestamp: Timestamp,
    ) {
        let removed = index.remove(&entry.key());
        debug_assert!(removed, "entry {} missing from the index", entry.id);
        entry.score = score;
        entry.timestamp = timestamp;
        index.insert(entry.key());
    }

    fn remove(&mut self, id: EntryId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                let removed = self.index.remove(&entry.key());
                debug_assert!(removed, "entry {} missing from the index", id);
                true
            }
            None => false,
        }
    }
}

/// A ranking over entries keyed by id.
///
/// Mutations take the write lock for their whole body and queries take the
/// read lock, so concurrent callers observe some serial order of calls.
/// Entries handed out are copies stamped with the rank they had when the
/// query ran.
#[derive(Debug)]
pub struct RankTable {
    inner: RwLock<Inner>,
}

impl Default for RankTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RankTable {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        RankTable {
            inner: RwLock::new(Inner::new(config)),
        }
    }

    /// Builds a table by replaying `upsert` for every entry. Stamped ranks on
    /// the input are ignored.
    pub fn from_entries<I>(config: &Config, entries: I) -> Self
    where
        I: IntoIterator<Item = Entry>,
    {
        let mut inner = Inner::new(config);
        for e in entries {
            inner.upsert(e.id, e.score, e.timestamp);
        }
        trace!(len = inner.entries.len(), "rebuilt rank table");
        RankTable {
            inner: RwLock::new(inner),
        }
    }

    /// Sets the score of `id`, creating the entry if needed. Setting the
    /// score it already has changes nothing, not even the timestamp.
    pub fn upsert(&self, id: EntryId, score: Score, timestamp: Timestamp) {
        self.inner.write().upsert(id, score, timestamp);
        trace!(id, score, timestamp, "upsert");
    }

    /// Adds `delta` to the score of `id`, creating the entry with score
    /// `delta` if needed. Every call refreshes the timestamp, including a
    /// zero delta. Scores saturate at the `i64` bounds.
    pub fn increment(&self, id: EntryId, delta: Score, timestamp: Timestamp) {
        self.inner.write().increment(id, delta, timestamp);
        trace!(id, delta, timestamp, "increment");
    }

    pub fn remove(&self, id: EntryId) -> bool {
        let removed = self.inner.write().remove(id);
        trace!(id, removed, "remove");
        removed
    }

    pub fn query_by_id(&self, id: EntryId) -> Option<Entry> {
        let inner = self.inner.read();
        let entry = inner.entries.get(&id)?;
        let rank = inner.index.rank_of(&entry.key())?;
        Some(entry.ranked(to_rank(rank + 1)))
    }

    /// The entry at 1-based `rank`.
    pub fn query_by_rank(&self, rank: Rank) -> Option<Entry> {
        let position = usize::try_from(rank).ok()?.checked_sub(1)?;
        let inner = self.inner.read();
        let key = inner.index.get(position)?;
        Some(Entry::from(*key).ranked(rank))
    }

    /// Entries ranked `min..=max`, 1-based. `min` is raised to 1 and `max`
    /// lowered to the table length before the range is read.
    pub fn query_by_rank_range(&self, min: Rank, max: Rank) -> Vec<Entry> {
        let inner = self.inner.read();
        let min = min.max(1);
        let max = max.min(to_rank(inner.index.len()));
        if min > max {
            return Vec::new();
        }
        // Both bounds are positive here.
        let (first, last) = (min as usize - 1, max as usize - 1);
        inner
            .index
            .range(first, last)
            .into_iter()
            .map(|(position, key)| Entry::from(key).ranked(to_rank(position + 1)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.inner.read().entries.contains_key(&id)
    }

    /// Every entry in rank order, stamped with its rank. The copy is taken
    /// under one read lock, so it is a consistent point-in-time view.
    pub fn entries(&self) -> Vec<Entry> {
        let inner = self.inner.read();
        inner
            .index
            .iter()
            .map(|(position, key)| Entry::from(*key).ranked(to_rank(position + 1)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let inner = self.inner.read();
        inner.index.check_invariants();
        assert_eq!(inner.index.len(), inner.entries.len());
        for (id, entry) in &inner.entries {
            assert_eq!(*id, entry.id);
            assert!(
                inner.index.contains(&entry.key()),
                "entry {} not indexed under its current key",
                id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        io,
        sync::Arc,
        thread,
    };

    use parking_lot::Mutex;

    use rand::Rng;

    use super::RankTable;
    use crate::{
        config::Config,
        entry::{Entry, Rank},
        snapshot,
    };

    fn fmt_entry(e: Option<Entry>) -> String {
        match e {
            Some(e) => format!("{}\n", serde_json::to_string(&e).unwrap()),
            None => "not found\n".into(),
        }
    }

    fn parse_line<const N: usize>(line: &str) -> [i64; N] {
        let fields: Vec<i64> = line
            .split_whitespace()
            .map(|f| f.parse().unwrap())
            .collect();
        fields.try_into().unwrap()
    }

    #[test]
    fn test_table() {
        datadriven::walk("src/table/testdata/", |f| {
            let config = Config::seeded(1);
            let mut table = RankTable::with_config(&config);
            f.run(|test_case| match test_case.directive.as_str() {
                "upsert" => {
                    for line in test_case.input.lines() {
                        let [id, score, ts] = parse_line::<3>(line);
                        table.upsert(id, score, ts);
                    }
                    "ok\n".into()
                }
                "incr" => {
                    for line in test_case.input.lines() {
                        let [id, delta, ts] = parse_line::<3>(line);
                        table.increment(id, delta, ts);
                    }
                    "ok\n".into()
                }
                "remove" => test_case
                    .input
                    .lines()
                    .map(|line| {
                        let [id] = parse_line::<1>(line);
                        format!("{}\n", table.remove(id))
                    })
                    .collect(),
                "get" => test_case
                    .input
                    .lines()
                    .map(|line| {
                        let [id] = parse_line::<1>(line);
                        fmt_entry(table.query_by_id(id))
                    })
                    .collect(),
                "rank" => test_case
                    .input
                    .lines()
                    .map(|line| {
                        let [rank] = parse_line::<1>(line);
                        fmt_entry(table.query_by_rank(rank as Rank))
                    })
                    .collect(),
                "range" => {
                    let arg = |name: &str| -> Rank {
                        test_case
                            .args
                            .get(name)
                            .unwrap_or_else(|| panic!("range requires a {} argument", name))
                            .get(0)
                            .unwrap()
                            .parse()
                            .unwrap()
                    };
                    let entries = table.query_by_rank_range(arg("min"), arg("max"));
                    if entries.is_empty() {
                        "empty\n".into()
                    } else {
                        entries.into_iter().map(|e| fmt_entry(Some(e))).collect()
                    }
                }
                "len" => format!("{}\n", table.len()),
                "reload" => {
                    let mut buf = Vec::new();
                    snapshot::write_table(&table, &mut buf).unwrap();
                    table = snapshot::read_table(&buf[..], &config).unwrap();
                    "ok\n".into()
                }
                _ => {
                    panic!("unhandled: {}", test_case.directive);
                }
            });
            table.check_invariants();
        })
    }

    #[test]
    fn test_descending_scores_rank_in_order() {
        let table = RankTable::new();
        for id in 1..=10 {
            table.upsert(id, 11 - id, 0);
        }
        assert_eq!(table.query_by_rank(1).map(|e| (e.id, e.score)), Some((1, 10)));
        assert_eq!(table.query_by_rank(10).map(|e| (e.id, e.score)), Some((10, 1)));
        assert_eq!(table.query_by_id(5).map(|e| e.rank), Some(5));
        assert_eq!(table.query_by_rank(11), None);
        assert_eq!(table.query_by_rank(0), None);
        assert_eq!(table.query_by_rank(-3), None);
    }

    #[test]
    fn test_removal_frees_rank() {
        let table = RankTable::new();
        for id in 1..=5 {
            table.upsert(id, id * 10, 0);
        }
        assert!(table.remove(5));
        assert_eq!(table.len(), 4);
        assert_eq!(table.query_by_id(5), None);
        assert_eq!(table.query_by_rank(5), None);
        assert_eq!(table.query_by_rank(1).map(|e| e.id), Some(4));

        assert!(!table.remove(5));
        assert!(!table.remove(42));
        assert_eq!(table.len(), 4);
        table.check_invariants();
    }

    #[test]
    fn test_returned_entries_are_copies() {
        let table = RankTable::new();
        table.upsert(1, 100, 0);
        let mut got = table.query_by_id(1).unwrap();
        got.score = 5;
        got.rank = 99;
        let mut range = table.query_by_rank_range(1, 1);
        range[0].score = 7;
        assert_eq!(table.query_by_id(1), Some(Entry::new(1, 100, 0).ranked(1)));
    }

    #[test]
    fn test_increment_saturates() {
        let table = RankTable::new();
        table.upsert(1, i64::MAX - 1, 0);
        table.increment(1, 10, 1);
        table.upsert(2, i64::MIN + 1, 0);
        table.increment(2, -10, 1);
        assert_eq!(table.query_by_id(1).map(|e| e.score), Some(i64::MAX));
        assert_eq!(table.query_by_id(2).map(|e| e.score), Some(i64::MIN));
        table.check_invariants();
    }

    #[test]
    fn test_many_entities_rank_by_id() {
        let n = 20_000;
        let table = RankTable::new();
        let mut rng = rand::thread_rng();
        for id in 1..=n {
            table.upsert(id, rng.gen_range(0..200_000), id);
        }
        // Rescore everyone so that id i ends up at rank i.
        for id in 1..=n {
            table.upsert(id, n - id + 1, id);
        }
        for id in 1..=n {
            assert_eq!(table.query_by_id(id).map(|e| e.rank as i64), Some(id));
        }
        table.check_invariants();
    }

    // Every query is checked against a brute-force sort of a plain map.
    #[test]
    fn test_random_ops_match_model() {
        let mut rng = rand::thread_rng();
        let table = RankTable::new();
        let mut model: HashMap<i64, (i64, i64)> = HashMap::new();

        for ts in 0..3000 {
            let id = rng.gen_range(0..60);
            match rng.gen_range(0..4) {
                0 => {
                    let score = rng.gen_range(0..20);
                    table.upsert(id, score, ts);
                    let slot = model.entry(id).or_insert((score, ts));
                    if slot.0 != score {
                        *slot = (score, ts);
                    }
                }
                1 => {
                    let delta = rng.gen_range(-3..4);
                    table.increment(id, delta, ts);
                    let slot = model.entry(id).or_insert((0, ts));
                    *slot = (slot.0 + delta, ts);
                }
                2 => {
                    assert_eq!(table.remove(id), model.remove(&id).is_some());
                }
                _ => {
                    let mut sorted: Vec<Entry> = model
                        .iter()
                        .map(|(&id, &(score, ts))| Entry::new(id, score, ts))
                        .collect();
                    sorted.sort_by_key(|e| e.key());
                    let expected: Vec<Entry> = sorted
                        .into_iter()
                        .enumerate()
                        .map(|(i, e)| e.ranked(i as Rank + 1))
                        .collect();
                    assert_eq!(table.entries(), expected);
                    for e in &expected {
                        assert_eq!(table.query_by_id(e.id), Some(*e));
                        assert_eq!(table.query_by_rank(e.rank), Some(*e));
                    }
                    let (lo, hi) = (rng.gen_range(-2..70), rng.gen_range(-2..70));
                    let want: Vec<Entry> = expected
                        .iter()
                        .filter(|e| e.rank >= lo && e.rank <= hi)
                        .cloned()
                        .collect();
                    assert_eq!(table.query_by_rank_range(lo, hi), want);
                }
            }
        }
        table.check_invariants();
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_mutations_emit_trace_events() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let table = RankTable::new();
        tracing::subscriber::with_default(subscriber, || {
            table.upsert(1, 10, 5);
            table.increment(1, 2, 6);
            table.remove(1);
        });

        let logs = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(logs.contains("upsert id=1 score=10 timestamp=5"), "{}", logs);
        assert!(logs.contains("increment id=1 delta=2 timestamp=6"), "{}", logs);
        assert!(logs.contains("remove id=1 removed=true"), "{}", logs);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let table = RankTable::new();
        let writers = 4;
        let per_writer = 500;

        thread::scope(|s| {
            for w in 0..writers {
                let table = &table;
                s.spawn(move || {
                    for i in 0..per_writer {
                        let id = 1000 + (w * per_writer + i) as i64;
                        table.upsert(id, id % 97, i as i64);
                        table.increment((i % 50) as i64, 1, i as i64);
                    }
                });
            }
            for _ in 0..2 {
                let table = &table;
                s.spawn(move || {
                    for _ in 0..200 {
                        let page = table.query_by_rank_range(1, 20);
                        for pair in page.windows(2) {
                            assert!(pair[0].key() < pair[1].key());
                            assert_eq!(pair[0].rank + 1, pair[1].rank);
                        }
                    }
                });
            }
        });

        assert_eq!(table.len(), writers * per_writer + 50);
        table.check_invariants();
        // No increment is lost: each low id was bumped once per writer per
        // pass over 0..50.
        let bumps = (writers * per_writer / 50) as i64;
        for id in 0..50 {
            assert_eq!(table.query_by_id(id).map(|e| e.score), Some(bumps));
        }
    }
}
