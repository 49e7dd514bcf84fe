// SPDX-License-Identifier: AGPL-3.0-or-later
//! Alarm evaluators and performance jobs.
//!
//! Evaluators compare live device state against the edge-state tracker:
//! a device in fault gets a MAJOR trap and a tracker record; a device back
//! to normal gets the residual records scanned, one CLEAR trap each, then
//! deleted. The emitted trap payloads are also bulk-indexed into the daily
//! alarm index.

mod clear;
mod growatt;
mod huawei;
mod kstar;
mod performance;
mod solarman;

pub use clear::ClearAlarm;
pub use growatt::GrowattAlarm;
pub use huawei::HuaweiAlarm;
pub use kstar::KstarAlarm;
pub use performance::{LowPerformanceAlarm, SumPerformanceAlarm};
pub use solarman::SolarmanAlarm;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use solarwatch_data::models::{daily_index, SnmpAlarmItem, ALARM_INDEX};
use solarwatch_data::SolarStore;
use tracing::info;

/// Trap alert names never carry spaces.
pub(crate) fn dashed(s: &str) -> String {
    s.replace(' ', "-")
}

pub(crate) async fn index_alarm_documents(
    solar: &Arc<dyn SolarStore>,
    vendor: &str,
    now: DateTime<Utc>,
    documents: Vec<SnmpAlarmItem>,
) -> anyhow::Result<()> {
    let index = daily_index(ALARM_INDEX, now);
    let count = documents.len();
    let values = documents
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;

    solar.bulk_index(&index, values).await?;
    info!(vendor, index, count, "indexed alarm documents");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashed_replaces_every_space() {
        assert_eq!(dashed("String Abnormal"), "String-Abnormal");
        assert_eq!(dashed("Disconnect"), "Disconnect");
    }
}
