use crate::shared::prelude::{AnalysisKey, AnalysisRecord, AnalysisResult};
use async_trait::async_trait;
use mockall::automock;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Past analyses, newest (or most recently promoted) first.
#[automock]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn add(&self, record: Arc<AnalysisRecord>);

    /// Moves the first successful record matching `key` to the front and
    /// returns it. Failed records are never promoted.
    async fn find_and_promote(&self, key: &AnalysisKey) -> Option<Arc<AnalysisRecord>>;

    /// Same lookup as [`HistoryStore::find_and_promote`], without moving anything.
    async fn contains_success(&self, key: &AnalysisKey) -> bool;

    /// Snapshot of the history in display order.
    async fn records(&self) -> Vec<Arc<AnalysisRecord>>;
}

pub fn is_error(result: &AnalysisResult) -> bool {
    result.is_error()
}

pub fn format_result(result: &AnalysisResult) -> String {
    result.format()
}

#[derive(Debug, Default)]
pub struct InMemoryHistory {
    records: RwLock<VecDeque<Arc<AnalysisRecord>>>,
    capacity: Option<NonZeroUsize>,
}

impl InMemoryHistory {
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            records: RwLock::default(),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    fn position_of_success(records: &VecDeque<Arc<AnalysisRecord>>, key: &AnalysisKey) -> Option<usize> {
        records
            .iter()
            .position(|record| record.matches(key) && record.is_success())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn add(&self, record: Arc<AnalysisRecord>) {
        let mut records = self.records.write().await;
        debug!(text = %record.text, kind = %record.kind, mode = %record.mode, "Analysis added to history");
        records.push_front(record);

        if let Some(capacity) = self.capacity {
            while records.len() > capacity.get() {
                if let Some(evicted) = records.pop_back() {
                    debug!(text = %evicted.text, "Evicted oldest analysis from history");
                }
            }
        }
    }

    async fn find_and_promote(&self, key: &AnalysisKey) -> Option<Arc<AnalysisRecord>> {
        let mut records = self.records.write().await;
        let index = Self::position_of_success(&records, key)?;

        let record = records.remove(index)?;
        records.push_front(record.clone());
        info!(text = %key.text, kind = %key.kind, mode = %key.mode, "Promoted existing successful analysis");

        Some(record)
    }

    async fn contains_success(&self, key: &AnalysisKey) -> bool {
        let records = self.records.read().await;
        Self::position_of_success(&records, key).is_some()
    }

    async fn records(&self) -> Vec<Arc<AnalysisRecord>> {
        self.records.read().await.iter().cloned().collect()
    }
}
