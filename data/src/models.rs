// SPDX-License-Identifier: AGPL-3.0-or-later
//! Canonical documents shared across collectors, evaluators and the writer.
//!
//! Field names follow the search-index mapping: aggregations key on
//! `@timestamp`, `data_type`, `vendor_type.keyword`, `id.keyword`,
//! `daily_production` and `installed_capacity`, so the serde renames here
//! are load-bearing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SOLAR_INDEX: &str = "solarcell";
pub const ALARM_INDEX: &str = "solarcell-alarm";
pub const PERFORMANCE_ALARM_INDEX: &str = "solarcell-performance-alarm";
pub const SITE_STATION_INDEX: &str = "site-station";

pub const DATA_TYPE_PLANT: &str = "PLANT";
pub const DATA_TYPE_DEVICE: &str = "DEVICE";
pub const DATA_TYPE_ALARM: &str = "ALARM";

pub const VENDOR_TYPE_GROWATT: &str = "growatt";
pub const VENDOR_TYPE_HUAWEI: &str = "huawei";
pub const VENDOR_TYPE_KSTAR: &str = "kstar";
pub const VENDOR_TYPE_INVT: &str = "invt";
pub const VENDOR_TYPE_SOLARMAN: &str = "solarman";

pub const OWNER_TRUE: &str = "true";

/// Daily index name, e.g. `solarcell-2026.08.02`.
pub fn daily_index(base: &str, date: DateTime<Utc>) -> String {
    format!("{}-{}", base, date.format("%Y.%m.%d"))
}

/// Identity parsed out of a plant display name. An unparseable name yields
/// the empty identity and the poller proceeds with blank site metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlantIdentity {
    pub site_id: String,
    pub node_type: String,
    pub ac_phase: String,
    pub capacity: f64,
}

/// One row of `tbl_site_region_mapping`, keyed by SiteID.
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct SiteRegionMapping {
    pub id: i64,
    pub code: String,
    pub city_name: String,
    pub city_code: String,
    pub area: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantItem {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub month: String,
    pub year: String,
    pub month_year: String,
    pub vendor_type: String,
    pub data_type: String,
    pub area: String,
    pub site_id: String,
    pub site_city_name: String,
    pub site_city_code: String,
    pub node_type: String,
    pub ac_phase: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<String>,
    pub location_address: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub installed_capacity: Option<f64>,
    pub total_co2: Option<f64>,
    pub monthly_co2: Option<f64>,
    pub total_saving_price: Option<f64>,
    pub currency: Option<String>,
    pub current_power: Option<f64>,
    pub total_production: Option<f64>,
    pub daily_production: Option<f64>,
    pub monthly_production: Option<f64>,
    pub yearly_production: Option<f64>,
    pub plant_status: Option<String>,
    pub owner: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceItem {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub month: String,
    pub year: String,
    pub month_year: String,
    pub vendor_type: String,
    pub data_type: String,
    pub area: String,
    pub site_id: String,
    pub site_city_name: String,
    pub site_city_code: String,
    pub node_type: String,
    pub ac_phase: String,
    pub plant_id: Option<String>,
    pub plant_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<String>,
    pub id: Option<String>,
    pub sn: Option<String>,
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub status: Option<String>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub total_power_generation: Option<f64>,
    pub daily_power_generation: Option<f64>,
    pub monthly_power_generation: Option<f64>,
    pub yearly_power_generation: Option<f64>,
    pub owner: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmItem {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub month: String,
    pub year: String,
    pub month_year: String,
    pub vendor_type: String,
    pub data_type: String,
    pub area: String,
    pub site_id: String,
    pub site_city_name: String,
    pub site_city_code: String,
    pub node_type: String,
    pub ac_phase: String,
    pub plant_id: Option<String>,
    pub plant_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<String>,
    pub device_id: Option<String>,
    pub device_sn: Option<String>,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub device_status: Option<String>,
    pub id: Option<String>,
    pub message: Option<String>,
    pub alarm_time: Option<DateTime<Utc>>,
    pub owner: String,
}

/// Site-scoped projection of a PlantItem, upserted by SiteID into the
/// cross-time `site-station` index. Latest write wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteItem {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub vendor_type: String,
    pub area: String,
    pub site_id: String,
    pub node_type: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub plant_status: Option<String>,
    pub owner: String,
}

/// Payload that accompanies a device alarm trap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnmpAlarmItem {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub vendor_type: String,
    pub device_name: String,
    pub alarm_name: String,
    pub description: String,
    pub severity: String,
    pub last_update_time: String,
}

impl SnmpAlarmItem {
    pub fn new(
        vendor_type: &str,
        device_name: &str,
        alarm_name: &str,
        description: &str,
        severity: &str,
        last_update_time: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            vendor_type: vendor_type.to_string(),
            device_name: device_name.to_string(),
            alarm_name: alarm_name.to_string(),
            description: description.to_string(),
            severity: severity.to_string(),
            last_update_time: last_update_time.to_string(),
        }
    }
}

/// Payload that accompanies a performance alarm trap. Also read back by the
/// daily clear job, so it must round-trip through the index unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnmpPerformanceAlarmItem {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub plant_name: String,
    pub alarm_name: String,
    pub description: String,
    pub severity: String,
    pub last_update_time: String,
}

impl SnmpPerformanceAlarmItem {
    pub fn new(
        kind: &str,
        plant_name: &str,
        alarm_name: &str,
        description: &str,
        severity: &str,
        last_update_time: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            plant_name: plant_name.to_string(),
            alarm_name: alarm_name.to_string(),
            description: description.to_string(),
            severity: severity.to_string(),
            last_update_time: last_update_time.to_string(),
        }
    }
}

/// Singleton row of `tbl_installed_capacity`. Expected-energy thresholds are
/// `capacity * efficiency_factor * focus_hour`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstalledCapacity {
    pub efficiency_factor: f64,
    pub focus_hour: i32,
}

/// One row of `tbl_performance_alarm_config`, keyed by alarm name.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PerformanceAlarmConfig {
    pub name: String,
    pub interval: i32,
    pub hit_day: Option<i32>,
    pub percentage: f64,
    pub duration: Option<i32>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GrowattCredential {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub token: String,
    pub owner: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HuaweiCredential {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub owner: String,
    pub version: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KstarCredential {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub owner: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SolarmanCredential {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub app_secret: String,
    pub app_id: String,
    pub owner: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_index_formats_date() {
        let date = Utc.with_ymd_and_hms(2026, 8, 2, 10, 30, 0).unwrap();
        assert_eq!(daily_index(SOLAR_INDEX, date), "solarcell-2026.08.02");
        assert_eq!(daily_index(ALARM_INDEX, date), "solarcell-alarm-2026.08.02");
    }

    #[test]
    fn plant_item_round_trips_required_fields() {
        let item = PlantItem {
            timestamp: Utc.with_ymd_and_hms(2026, 8, 2, 7, 16, 0).unwrap(),
            month: "08".to_string(),
            year: "2026".to_string(),
            month_year: "08-2026".to_string(),
            vendor_type: "GROWATT".to_string(),
            data_type: DATA_TYPE_PLANT.to_string(),
            area: "North".to_string(),
            site_id: "NMA001".to_string(),
            site_city_name: "Nakhon Ratchasima".to_string(),
            site_city_code: "NMA".to_string(),
            node_type: "SS".to_string(),
            ac_phase: "3P".to_string(),
            id: Some("42".to_string()),
            name: Some("NMA001-SS-3P-10kW".to_string()),
            installed_capacity: Some(10.0),
            plant_status: Some("ONLINE".to_string()),
            owner: OWNER_TRUE.to_string(),
            ..Default::default()
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["data_type"], "PLANT");
        assert_eq!(json["vendor_type"], "GROWATT");
        assert!(json.get("@timestamp").is_some());

        let back: PlantItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.timestamp, item.timestamp);
        assert_eq!(back.vendor_type, item.vendor_type);
        assert_eq!(back.site_id, item.site_id);
        assert_eq!(back.month_year, item.month_year);
        assert_eq!(back.owner, item.owner);
    }

    #[test]
    fn performance_alarm_item_round_trips_kind() {
        let item = SnmpPerformanceAlarmItem::new(
            "low",
            "P1",
            "SolarCell-PerformanceLow",
            "desc",
            "5",
            "2026-08-02T08:00:00Z",
        );
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "low");

        let back: SnmpPerformanceAlarmItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, "low");
        assert_eq!(back.alarm_name, "SolarCell-PerformanceLow");
    }
}
