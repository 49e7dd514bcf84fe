// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fakes for evaluator tests.

use async_trait::async_trait;
use serde_json::Value;
use solarwatch_data::elastic::{PerformanceBucket, UniquePlantBucket};
use solarwatch_data::models::{SiteItem, SnmpPerformanceAlarmItem};
use solarwatch_data::{DataError, SolarStore};
use tokio::sync::Mutex;

/// Records bulk writes; aggregation reads answer empty.
#[derive(Default)]
pub(crate) struct RecordingSolarStore {
    pub bulks: Mutex<Vec<(String, Vec<Value>)>>,
}

impl RecordingSolarStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SolarStore for RecordingSolarStore {
    async fn bulk_index(&self, index: &str, docs: Vec<Value>) -> Result<(), DataError> {
        self.bulks.lock().await.push((index.to_string(), docs));
        Ok(())
    }

    async fn upsert_site_station(&self, _docs: Vec<SiteItem>) -> Result<(), DataError> {
        Ok(())
    }

    async fn performance_low(
        &self,
        _duration: i32,
        _efficiency_factor: f64,
        _focus_hour: i32,
        _threshold_pct: f64,
    ) -> Result<Vec<PerformanceBucket>, DataError> {
        Ok(Vec::new())
    }

    async fn sum_performance_low(
        &self,
        _duration: i32,
    ) -> Result<Vec<PerformanceBucket>, DataError> {
        Ok(Vec::new())
    }

    async fn unique_plants(&self, _index: &str) -> Result<Vec<UniquePlantBucket>, DataError> {
        Ok(Vec::new())
    }

    async fn performance_alarms(
        &self,
        _index: &str,
    ) -> Result<Vec<SnmpPerformanceAlarmItem>, DataError> {
        Ok(Vec::new())
    }
}
