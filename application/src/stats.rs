use crate::{ApplicationError, KeyValueStore, RecordRepository};
use domain::RecordStats;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Dashboard aggregates and the store availability check.
pub struct StatsService {
    repository: Arc<RecordRepository>,
    store: Arc<dyn KeyValueStore>,
}

impl StatsService {
    pub fn new(repository: Arc<RecordRepository>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { repository, store }
    }

    #[instrument(skip(self))]
    pub async fn record_stats(&self) -> Result<RecordStats, ApplicationError> {
        info!("Gathering record statistics");
        let records = self.repository.fetch_all().await?;
        let stats = RecordStats::from_records(&records);
        debug!("Record stats gathered: {:?}", stats);
        Ok(stats)
    }

    #[instrument(skip(self))]
    pub async fn store_available(&self) -> bool {
        let available = self.store.is_available().await;
        if !available {
            warn!("Backing store reports itself unavailable");
        }
        available
    }
}
