//! Lazily computed value cache of a variable node.
//!
//! The cache is only ever filled by a client query, never by the event path:
//! change/resume notifications invalidate it and the next query recomputes.
//! Aggregate values own their child nodes; array children are materialized
//! one fixed-size partition at a time so that touching a single index of a
//! large array never forces a full backend fetch.

use crate::variable::Variable;
use std::collections::HashMap;
use std::sync::Arc;

/// Unit of lazy loading for array values. Tuning constant.
pub const PARTITION_SIZE: u64 = 100;

pub(crate) enum CachedValue {
    /// Invalidated or never queried; the next query recomputes.
    NotComputed,
    /// Last-fetched scalar in the backend's natural rendering.
    Scalar(String),
    Array(ArrayCache),
    Composite(Vec<Arc<Variable>>),
    /// A fetch failed on a stale handle; the message is served
    /// until the next invalidation.
    Failed(String),
}

impl CachedValue {
    /// Child nodes owned by this cached value. They die with it.
    pub(crate) fn take_children(self) -> Vec<Arc<Variable>> {
        match self {
            CachedValue::NotComputed | CachedValue::Scalar(_) | CachedValue::Failed(_) => vec![],
            CachedValue::Composite(children) => children,
            CachedValue::Array(array) => array
                .partitions
                .into_values()
                .flatten()
                .collect(),
        }
    }
}

pub(crate) struct ArrayCache {
    pub len: u64,
    /// Materialized partitions, keyed by partition index.
    partitions: HashMap<u64, Vec<Arc<Variable>>>,
}

impl ArrayCache {
    pub fn new(len: u64) -> Self {
        Self {
            len,
            partitions: HashMap::new(),
        }
    }

    pub fn partition_of(index: u64) -> u64 {
        index / PARTITION_SIZE
    }

    /// O(1) for any index inside an already materialized partition.
    pub fn get(&self, index: u64) -> Option<Arc<Variable>> {
        let partition = self.partitions.get(&Self::partition_of(index))?;
        partition
            .get((index % PARTITION_SIZE) as usize)
            .cloned()
    }

    pub fn insert_partition(&mut self, partition: u64, nodes: Vec<Arc<Variable>>) {
        self.partitions.insert(partition, nodes);
    }
}
