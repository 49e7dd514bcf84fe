// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daily clear jobs.
//!
//! At the morning tick, every plant seen in yesterday's telemetry gets a
//! blanket CLEAR trap per vendor-specific standing alarm name, and every
//! performance alarm recorded yesterday is re-sent with CLEAR severity.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use solarwatch_data::models::{
    daily_index, PlantItem, OWNER_TRUE, PERFORMANCE_ALARM_INDEX, SOLAR_INDEX,
    VENDOR_TYPE_GROWATT, VENDOR_TYPE_HUAWEI, VENDOR_TYPE_INVT, VENDOR_TYPE_KSTAR,
    VENDOR_TYPE_SOLARMAN,
};
use solarwatch_data::snmp::CLEAR_SEVERITY;
use solarwatch_data::{SolarStore, TrapSink};
use tracing::{info, warn};

pub struct ClearAlarm {
    solar: Arc<dyn SolarStore>,
    snmp: Arc<dyn TrapSink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClearAlarmPayload {
    pub plant_name: String,
    pub alarm_name: String,
    pub payload: String,
}

impl ClearAlarm {
    pub fn new(solar: Arc<dyn SolarStore>, snmp: Arc<dyn TrapSink>) -> Self {
        Self { solar, snmp }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let index = daily_index(SOLAR_INDEX, now - Duration::days(1));
        let buckets = self.solar.unique_plants(&index).await?;
        info!(index, plants = buckets.len(), "clearing standing alarms");

        let date = now.format("%Y-%m-%d %H:%M:%S").to_string();
        for bucket in &buckets {
            let Some(source) = bucket.top_hit_source() else { continue };
            let Some(plant) = plant_of_source(source) else { continue };

            let payloads = match clear_payloads(now, &plant) {
                Ok(payloads) => payloads,
                Err(err) => {
                    warn!(%err, "skipping plant for clear alarm");
                    continue;
                }
            };

            for payload in payloads {
                self.snmp
                    .send_trap(
                        &payload.plant_name,
                        &payload.alarm_name,
                        &payload.payload,
                        CLEAR_SEVERITY,
                        &date,
                    )
                    .await;
            }
        }

        Ok(())
    }

    /// Re-sends yesterday's recorded performance alarms with CLEAR severity.
    pub async fn clear_performance_alarms(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let index = daily_index(PERFORMANCE_ALARM_INDEX, now - Duration::days(1));
        let items = self.solar.performance_alarms(&index).await?;
        info!(index, count = items.len(), "clearing performance alarms");

        let date = now.format("%Y-%m-%d %H:%M:%S").to_string();
        for item in &items {
            self.snmp
                .send_trap(
                    &item.plant_name,
                    &item.alarm_name,
                    &item.description,
                    CLEAR_SEVERITY,
                    &date,
                )
                .await;
        }

        Ok(())
    }
}

/// Minimal plant projection out of a unique-plant top hit. A hit without a
/// name or vendor type is unusable and skipped.
fn plant_of_source(source: &Value) -> Option<PlantItem> {
    let mut plant = PlantItem {
        name: Some(source.get("name")?.as_str()?.to_string()),
        vendor_type: source.get("vendor_type")?.as_str()?.to_string(),
        ..Default::default()
    };

    if let Some(area) = source.get("area").and_then(Value::as_str) {
        plant.area = area.to_string();
    }
    if let Some(capacity) = source.get("installed_capacity").and_then(Value::as_f64) {
        plant.installed_capacity = Some(capacity);
    }
    plant.owner = source
        .get("owner")
        .and_then(Value::as_str)
        .unwrap_or(OWNER_TRUE)
        .to_string();

    if let Some(location) = source.get("location").and_then(Value::as_str) {
        let parts: Vec<&str> = location.split(',').collect();
        if parts.len() == 2 {
            plant.latitude = parts[0].parse().ok();
        }
    }

    Some(plant)
}

pub(crate) fn clear_payloads(
    date: DateTime<Utc>,
    plant: &PlantItem,
) -> anyhow::Result<Vec<ClearAlarmPayload>> {
    let (vendor_label, alarm_names): (&str, Vec<&str>) =
        match plant.vendor_type.to_lowercase().as_str() {
            VENDOR_TYPE_GROWATT => ("Growatt", vec!["Growatt-Solarcell-Inverter_Error_0"]),
            VENDOR_TYPE_HUAWEI => ("HUA", vec!["Huawei-Solarcell-HUW_Disconnect"]),
            VENDOR_TYPE_KSTAR => ("Kstar", vec!["Huawei-Solarcell-Disconnect"]),
            VENDOR_TYPE_INVT | VENDOR_TYPE_SOLARMAN => (
                "INVT-Ipanda",
                vec![
                    "INVT-Solarcell-INVERTER_Disconnect",
                    "INVT-Solarcell-COLLECTOR_Disconnect",
                ],
            ),
            other => anyhow::bail!("vendor type ({other}) not supported"),
        };

    let plant_name = plant.name.clone().unwrap_or_default();
    if plant_name.contains("ATV") {
        anyhow::bail!("plant name ({plant_name}) not supported");
    }

    Ok(alarm_names
        .into_iter()
        .map(|alarm_name| ClearAlarmPayload {
            plant_name: plant_name.clone(),
            alarm_name: alarm_name.to_string(),
            payload: format!(
                "{}, {}, Clear all alarms, Date:{}",
                vendor_label,
                plant_name,
                date.format("%Y-%m-%d %H:%M:%S"),
            ),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn plant(vendor: &str, name: &str) -> PlantItem {
        PlantItem {
            vendor_type: vendor.to_string(),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn solarman_plants_clear_both_standing_alarms() {
        let date = Utc.with_ymd_and_hms(2026, 8, 2, 6, 0, 0).unwrap();
        let payloads = clear_payloads(date, &plant("INVT", "STN001-PEA-3P-25kW")).unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].alarm_name, "INVT-Solarcell-INVERTER_Disconnect");
        assert_eq!(payloads[1].alarm_name, "INVT-Solarcell-COLLECTOR_Disconnect");
        assert_eq!(
            payloads[0].payload,
            "INVT-Ipanda, STN001-PEA-3P-25kW, Clear all alarms, Date:2026-08-02 06:00:00"
        );
    }

    #[test]
    fn atv_plants_and_unknown_vendors_are_skipped() {
        let date = Utc::now();
        assert!(clear_payloads(date, &plant("GROWATT", "ATV-Rooftop")).is_err());
        assert!(clear_payloads(date, &plant("ACME", "P1")).is_err());
    }

    #[test]
    fn source_projection_reads_latitude_only() {
        let source = json!({
            "name": "NMA001-SS-3P-10kW",
            "vendor_type": "HUAWEI",
            "area": "Northeast",
            "installed_capacity": 10.0,
            "location": "14.970000,102.100000",
        });
        let plant = plant_of_source(&source).unwrap();
        assert_eq!(plant.latitude, Some(14.97));
        // The longitude intent in stored locations is unreliable; leave it
        // unset rather than guess.
        assert_eq!(plant.longitude, None);
        assert_eq!(plant.owner, OWNER_TRUE);
    }

    #[test]
    fn nameless_sources_are_unusable() {
        assert!(plant_of_source(&json!({ "vendor_type": "HUAWEI" })).is_none());
    }
}
