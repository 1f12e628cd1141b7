//! A skip list that knows the rank of every element.
//!
//! Every forward link carries a `span`: the number of level-0 elements the
//! link jumps over, counting the element it lands on. A link that points past
//! the end spans every remaining element. Summing spans along a search path
//! yields an element's position, and descending by spans finds the element
//! at a given position, both in expected O(log n).
//!
//! Nodes live in a slab and link to each other by `NodeId`. The head links
//! are kept outside the slab so that nodes only ever hold real keys.

use rand::{rngs::StdRng, Rng, SeedableRng};
use slab::Slab;
use tracing::warn;

use crate::config::{Config, DEFAULT_LEVEL_PROBABILITY};

pub const MAX_LEVEL: usize = 32;

type NodeId = usize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Link {
    forward: Option<NodeId>,
    span: usize,
}

#[derive(Debug)]
struct Node<K> {
    key: K,
    links: Vec<Link>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Head,
    At(NodeId),
}

// For each level, the last node before the search key and the number of
// elements up to and including it.
struct Path {
    update: [Cursor; MAX_LEVEL],
    rank: [usize; MAX_LEVEL],
}

#[derive(Debug)]
pub struct RankList<K> {
    head: [Link; MAX_LEVEL],
    nodes: Slab<Node<K>>,
    // Number of levels currently in use, always at least 1.
    level: usize,
    max_level: usize,
    probability: f64,
    rng: StdRng,
}

impl<K> RankList<K>
where
    K: Ord,
{
    pub fn new(config: &Config) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // Outside (0, 1) the level draw degenerates.
        let probability = if config.level_probability > 0.0 && config.level_probability < 1.0 {
            config.level_probability
        } else {
            warn!(
                probability = config.level_probability,
                "level probability out of range, using the default"
            );
            DEFAULT_LEVEL_PROBABILITY
        };
        RankList {
            head: [Link::default(); MAX_LEVEL],
            nodes: Slab::new(),
            level: 1,
            max_level: config.max_level.clamp(1, MAX_LEVEL),
            probability,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of levels currently in use.
    pub fn level(&self) -> usize {
        self.level
    }

    fn links(&self, at: Cursor) -> &[Link] {
        match at {
            Cursor::Head => &self.head,
            Cursor::At(id) => &self.nodes[id].links,
        }
    }

    fn links_mut(&mut self, at: Cursor) -> &mut [Link] {
        match at {
            Cursor::Head => &mut self.head,
            Cursor::At(id) => &mut self.nodes[id].links,
        }
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < self.max_level && self.rng.gen::<f64>() < self.probability {
            level += 1;
        }
        level
    }

    fn descend(&self, key: &K) -> Path {
        let mut path = Path {
            update: [Cursor::Head; MAX_LEVEL],
            rank: [0; MAX_LEVEL],
        };
        let mut x = Cursor::Head;
        for i in (0..self.level).rev() {
            path.rank[i] = if i + 1 == self.level {
                0
            } else {
                path.rank[i + 1]
            };
            while let Some(next) = self.links(x)[i].forward {
                if self.nodes[next].key >= *key {
                    break;
                }
                path.rank[i] += self.links(x)[i].span;
                x = Cursor::At(next);
            }
            path.update[i] = x;
        }
        path
    }

    // The node matching `key` exactly, if the path leads to one.
    fn found(&self, path: &Path, key: &K) -> Option<NodeId> {
        self.links(path.update[0])[0]
            .forward
            .filter(|&id| self.nodes[id].key == *key)
    }

    /// Inserts `key`. The caller guarantees no equal key is present.
    pub fn insert(&mut self, key: K) {
        let mut path = self.descend(&key);

        let level = self.random_level();
        if level > self.level {
            for i in self.level..level {
                path.rank[i] = 0;
                path.update[i] = Cursor::Head;
                self.head[i].span = self.len();
            }
            self.level = level;
        }

        let id = self.nodes.insert(Node {
            key,
            links: vec![Link::default(); level],
        });
        for i in 0..level {
            let pred = path.update[i];
            let crossed = path.rank[0] - path.rank[i];
            let prev = self.links(pred)[i];
            self.nodes[id].links[i] = Link {
                forward: prev.forward,
                span: prev.span - crossed,
            };
            self.links_mut(pred)[i] = Link {
                forward: Some(id),
                span: crossed + 1,
            };
        }

        // Links above the new node's height now jump over one more element.
        for i in level..self.level {
            self.links_mut(path.update[i])[i].span += 1;
        }
    }

    /// Removes the element equal to `key`. Returns false if there was none.
    pub fn remove(&mut self, key: &K) -> bool {
        let path = self.descend(key);
        let target = match self.found(&path, key) {
            Some(id) => id,
            None => return false,
        };

        for i in 0..self.level {
            let pred = path.update[i];
            let link = self.links(pred)[i];
            if link.forward == Some(target) {
                let skipped = self.nodes[target].links[i];
                self.links_mut(pred)[i] = Link {
                    forward: skipped.forward,
                    span: link.span + skipped.span - 1,
                };
            } else {
                self.links_mut(pred)[i].span -= 1;
            }
        }

        while self.level > 1 && self.head[self.level - 1].forward.is_none() {
            self.level -= 1;
        }

        self.nodes.remove(target);
        true
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.found(&self.descend(key), key).is_some()
    }

    /// The 0-based position of `key`, if present.
    pub fn rank_of(&self, key: &K) -> Option<usize> {
        let path = self.descend(key);
        self.found(&path, key).map(|_| path.rank[0])
    }

    // Finds the node at 1-based `position` by accumulating spans.
    fn node_at(&self, position: usize) -> Option<NodeId> {
        if position == 0 || position > self.len() {
            return None;
        }
        let mut traversed = 0;
        let mut x = Cursor::Head;
        for i in (0..self.level).rev() {
            while let Some(next) = self.links(x)[i].forward {
                let span = self.links(x)[i].span;
                if traversed + span > position {
                    break;
                }
                traversed += span;
                x = Cursor::At(next);
            }
            if traversed == position {
                if let Cursor::At(id) = x {
                    return Some(id);
                }
            }
        }
        None
    }

    /// The element at 0-based `rank`.
    pub fn get(&self, rank: usize) -> Option<&K> {
        let id = self.node_at(rank.checked_add(1)?)?;
        Some(&self.nodes[id].key)
    }

    pub fn iter(&self) -> Iter<'_, K> {
        Iter {
            list: self,
            next: self.head[0].forward,
            rank: 0,
        }
    }

    /// Iterates from 0-based `rank` to the end, yielding `(rank, key)`.
    pub fn iter_from(&self, rank: usize) -> Iter<'_, K> {
        Iter {
            list: self,
            next: rank.checked_add(1).and_then(|p| self.node_at(p)),
            rank,
        }
    }

    /// Copies of the elements at 0-based ranks `first..=last`, paired with
    /// their ranks. Ranks past the end are skipped.
    pub fn range(&self, first: usize, last: usize) -> Vec<(usize, K)>
    where
        K: Clone,
    {
        self.iter_from(first)
            .take_while(|(rank, _)| *rank <= last)
            .map(|(rank, key)| (rank, key.clone()))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        use std::collections::HashMap;

        let mut position = HashMap::new();
        let mut prev: Option<&K> = None;
        for (rank, key) in self.iter() {
            if let Some(prev) = prev {
                assert!(prev < key, "level 0 is out of order at rank {}", rank);
            }
            prev = Some(key);
        }
        let mut x = self.head[0].forward;
        let mut pos = 0;
        while let Some(id) = x {
            pos += 1;
            position.insert(id, pos);
            x = self.nodes[id].links[0].forward;
        }
        assert_eq!(pos, self.len());

        for i in 0..self.level {
            let mut x = Cursor::Head;
            let mut x_pos = 0;
            loop {
                let link = self.links(x)[i];
                let target = link.forward.map(|id| position[&id]);
                let expected = target.unwrap_or(self.len()) - x_pos;
                assert_eq!(link.span, expected, "bad span at level {}", i);
                match link.forward {
                    Some(id) => {
                        assert!(self.nodes[id].links.len() > i);
                        x = Cursor::At(id);
                        x_pos = position[&id];
                    }
                    None => break,
                }
            }
        }
        if self.level > 1 {
            assert!(self.head[self.level - 1].forward.is_some());
        }
        for (_, node) in self.nodes.iter() {
            assert!(node.links.len() <= self.level);
        }
    }
}

pub struct Iter<'a, K> {
    list: &'a RankList<K>,
    next: Option<NodeId>,
    rank: usize,
}

impl<'a, K> Iterator for Iter<'a, K> {
    type Item = (usize, &'a K);

    fn next(&mut self) -> Option<Self::Item> {
        let list = self.list;
        let node = &list.nodes[self.next?];
        let item = (self.rank, &node.key);
        self.next = node.links[0].forward;
        self.rank += 1;
        Some(item)
    }
}
