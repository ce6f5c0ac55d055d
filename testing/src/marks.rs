//! In-memory [`OffsetMarkStore`].

#![allow(clippy::unwrap_used)] // Test mock, panicking on poisoned lock is acceptable
#![allow(clippy::missing_panics_doc)] // Test mock

use eventloom_core::error::Result;
use eventloom_core::replay::{OffsetMarkStore, ReplayOffsetMark};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// Replay offset marks in a `HashMap` keyed by (topic, partition).
#[derive(Clone, Debug, Default)]
pub struct InMemoryOffsetMarkStore {
    marks: Arc<RwLock<HashMap<(String, i32), i64>>>,
}

impl InMemoryOffsetMarkStore {
    /// Create a store without marks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mark of a partition, bypassing the async port
    #[must_use]
    pub fn offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.marks
            .read()
            .unwrap()
            .get(&(topic.to_string(), partition))
            .copied()
    }

    /// Clear all marks
    pub fn clear(&self) {
        self.marks.write().unwrap().clear();
    }
}

impl OffsetMarkStore for InMemoryOffsetMarkStore {
    fn get<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ReplayOffsetMark>>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self.offset(topic, partition).map(|offset| ReplayOffsetMark {
                topic: topic.to_string(),
                partition,
                offset,
            }))
        })
    }

    fn advance<'a>(
        &'a self,
        mark: &'a ReplayOffsetMark,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut marks = self.marks.write().unwrap();
            let current = marks
                .entry((mark.topic.clone(), mark.partition))
                .or_insert(mark.offset);
            *current = (*current).max(mark.offset);
            Ok(())
        })
    }
}
