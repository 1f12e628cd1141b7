use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::info;

use crate::{
    config::Config,
    entry::{Category, CategoryRecord},
    table::RankTable,
};

/// What `Registry::replace` installs for a category.
#[derive(Debug)]
pub enum Replacement {
    Empty,
    Table(RankTable),
}

/// Owns one ranking table per category.
///
/// The registry lock only guards the category map. Callers get an `Arc` to
/// the table and run table operations after the registry lock is released,
/// so the two locks are never held together.
#[derive(Debug, Default)]
pub struct Registry {
    config: Config,
    tables: RwLock<HashMap<Category, Arc<RankTable>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// New tables are created with `config`.
    pub fn with_config(config: Config) -> Self {
        Registry {
            config,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_records<I>(config: Config, records: I) -> Self
    where
        I: IntoIterator<Item = CategoryRecord>,
    {
        let registry = Self::with_config(config);
        registry.import(records);
        registry
    }

    pub fn get(&self, category: Category) -> Option<Arc<RankTable>> {
        self.tables.read().get(&category).cloned()
    }

    pub fn get_or_create(&self, category: Category) -> Arc<RankTable> {
        if let Some(table) = self.get(category) {
            return table;
        }
        self.tables
            .write()
            .entry(category)
            .or_insert_with(|| Arc::new(RankTable::with_config(&self.config)))
            .clone()
    }

    /// Installs a new table for `category` and returns the one it replaced.
    /// Holders of the old `Arc` keep a working, detached table.
    pub fn replace(&self, category: Category, replacement: Replacement) -> Option<Arc<RankTable>> {
        let table = match replacement {
            Replacement::Empty => RankTable::with_config(&self.config),
            Replacement::Table(table) => table,
        };
        let len = table.len();
        let previous = self.tables.write().insert(category, Arc::new(table));
        info!(category, len, replaced = previous.is_some(), "installed rank table");
        previous
    }

    /// Shorthand for `replace(category, Replacement::Empty)`.
    pub fn reset(&self, category: Category) -> Option<Arc<RankTable>> {
        self.replace(category, Replacement::Empty)
    }

    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<_> = self.tables.read().keys().copied().collect();
        categories.sort_unstable();
        categories
    }

    // Clones the table handles so the registry lock is not held while the
    // tables are read or written.
    fn snapshot_tables(&self) -> Vec<(Category, Arc<RankTable>)> {
        let mut tables: Vec<_> = self
            .tables
            .read()
            .iter()
            .map(|(category, table)| (*category, table.clone()))
            .collect();
        tables.sort_unstable_by_key(|(category, _)| *category);
        tables
    }

    /// Flattens every table into records, ordered by category then rank.
    /// Each table is copied at a single point in time, but tables are copied
    /// one after another.
    pub fn export(&self) -> Vec<CategoryRecord> {
        self.snapshot_tables()
            .into_iter()
            .flat_map(|(category, table)| {
                table
                    .entries()
                    .into_iter()
                    .map(move |entry| CategoryRecord::new(category, &entry))
            })
            .collect()
    }

    /// Replays each record as an `upsert` on its category's table, creating
    /// tables as needed.
    pub fn import<I>(&self, records: I)
    where
        I: IntoIterator<Item = CategoryRecord>,
    {
        let mut tables: HashMap<Category, Arc<RankTable>> = HashMap::new();
        let mut count = 0_usize;
        for record in records {
            tables
                .entry(record.category)
                .or_insert_with(|| self.get_or_create(record.category))
                .upsert(record.id, record.score, record.timestamp);
            count += 1;
        }
        info!(count, tables = tables.len(), "imported category records");
    }
}
