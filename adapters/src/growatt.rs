// SPDX-License-Identifier: AGPL-3.0-or-later
//! Growatt OpenAPI client.
//!
//! Authentication is a static `Token` header. List endpoints page until the
//! accumulated size reaches the reported total; realtime inverter reads are
//! batched in SN groups of 50 and merged into one map.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::info;

use crate::error::{AdapterError, Result};
use crate::http::{client_with_timeout, decode_json, send_with_retry, DEFAULT_RETRY_COUNT};

const AUTH_HEADER: &str = "Token";
pub const MAX_PAGE_SIZE: usize = 100;
pub const BATCH_SIZE: usize = 50;
const BASE_URL: &str = "https://openapi.growatt.com/v1";

pub const PLANT_STATUS_ONLINE: &str = "ONLINE";
pub const PLANT_STATUS_OFFLINE: &str = "OFFLINE";
pub const PLANT_STATUS_ALARM: &str = "ALARM";

pub const DEVICE_STATUS_ONLINE: &str = "ONLINE";
pub const DEVICE_STATUS_OFFLINE: &str = "OFFLINE";
pub const DEVICE_STATUS_STAND_BY: &str = "STAND BY";
pub const DEVICE_STATUS_FAILURE: &str = "FAILURE";
pub const DEVICE_STATUS_WAITING: &str = "WAITING";
pub const DEVICE_STATUS_SELF_CHECK: &str = "SELF CHECK";
pub const DEVICE_STATUS_UPGRADING: &str = "UPGRADING";

/// Growatt equipment kinds, by the `type` code of the device list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Inverter,
    EnergyStorageMachine,
    OtherEquipment,
    Max,
    Mix,
    Spa,
    Min,
    Pcs,
    Hps,
    Pbd,
}

impl DeviceType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Inverter),
            2 => Some(Self::EnergyStorageMachine),
            3 => Some(Self::OtherEquipment),
            4 => Some(Self::Max),
            5 => Some(Self::Mix),
            6 => Some(Self::Spa),
            7 => Some(Self::Min),
            8 => Some(Self::Pcs),
            9 => Some(Self::Hps),
            10 => Some(Self::Pbd),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Inverter => "INVERTER",
            Self::EnergyStorageMachine => "ENERGY STORAGE MACHINE",
            Self::OtherEquipment => "OTHER EQUIPMENT",
            Self::Max => "MAX",
            Self::Mix => "MIX",
            Self::Spa => "SPA",
            Self::Min => "MIN",
            Self::Pcs => "PCS",
            Self::Hps => "HPS",
            Self::Pbd => "PBD",
        }
    }

    /// Path segment and SN query parameter of the per-type alarm endpoint.
    fn alarm_endpoint(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Max => Some(("max", "max_sn")),
            Self::Mix => Some(("mix", "mix_sn")),
            Self::Spa => Some(("spa", "spa_sn")),
            Self::Min => Some(("min", "min_sn")),
            Self::Pcs => Some(("pcs", "pcs_sn")),
            Self::Hps => Some(("hps", "hps_sn")),
            Self::Pbd => Some(("pbd", "pbd_sn")),
            _ => None,
        }
    }
}

pub fn parse_device_type(code: i32) -> &'static str {
    DeviceType::from_code(code).map(|t| t.label()).unwrap_or("")
}

/// Status label used by the alarm evaluator's one-shot compare.
pub fn inverter_status_label(status: i32) -> &'static str {
    match status {
        -1 => "Disconnect",
        0 => "Offline",
        1 => "Online",
        2 => "StandBy",
        3 => "Failure",
        _ => "Unknown",
    }
}

pub struct GrowattClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    token: String,
    retries: usize,
}

impl GrowattClient {
    pub fn new(username: &str, token: &str) -> Result<Self> {
        Self::with_base_url(username, token, BASE_URL)
    }

    pub fn with_base_url(username: &str, token: &str, base_url: &str) -> Result<Self> {
        Ok(Self {
            http: client_with_timeout()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            token: token.to_string(),
            retries: DEFAULT_RETRY_COUNT,
        })
    }

    pub fn with_retry_count(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = send_with_retry(
            || {
                self.http
                    .get(&url)
                    .header(AUTH_HEADER, &self.token)
                    .query(query)
            },
            self.retries,
        )
        .await?;
        decode_json(resp, path).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = send_with_retry(
            || {
                self.http
                    .post(&url)
                    .header(AUTH_HEADER, &self.token)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .query(query)
            },
            self.retries,
        )
        .await?;
        decode_json(resp, path).await
    }

    pub async fn plant_list(&self) -> Result<Vec<Plant>> {
        let mut plants: Vec<Plant> = Vec::new();
        let mut page = 1;

        loop {
            let resp: PlantListResponse = self
                .post(
                    "/plant/user_plant_list",
                    &[
                        ("user_name", self.username.clone()),
                        ("page", page.to_string()),
                        ("perpage", MAX_PAGE_SIZE.to_string()),
                    ],
                )
                .await?;

            let data = resp.data.unwrap_or_default();
            let total = data.count.unwrap_or(0);
            let page_len = data.plants.len();
            plants.extend(data.plants);

            if page_len == 0 || plants.len() as i64 >= total {
                break;
            }
            page += 1;
        }

        Ok(plants)
    }

    pub async fn plant_overview_info(&self, plant_id: i64) -> Result<PlantOverviewResponse> {
        self.get("/plant/data", &[("plant_id", plant_id.to_string())])
            .await
    }

    pub async fn plant_data_logger_info(&self, plant_id: i64) -> Result<DataLoggerResponse> {
        self.get(
            "/device/datalogger/list",
            &[("plant_id", plant_id.to_string())],
        )
        .await
    }

    pub async fn plant_device_list(&self, plant_id: i64) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = Vec::new();
        let mut page = 1;

        loop {
            let resp: DeviceListResponse = self
                .get(
                    "/device/list",
                    &[
                        ("plant_id", plant_id.to_string()),
                        ("page", page.to_string()),
                        ("perpage", MAX_PAGE_SIZE.to_string()),
                    ],
                )
                .await?;

            let data = resp.data.unwrap_or_default();
            let total = data.count.unwrap_or(0);
            let page_len = data.devices.len();
            devices.extend(data.devices);

            if page_len == 0 || devices.len() as i64 >= total {
                break;
            }
            page += 1;
        }

        Ok(devices)
    }

    /// Batched realtime inverter read: SNs in groups of 50, results merged
    /// into one SN-keyed map.
    pub async fn realtime_device_batches(
        &self,
        device_sns: &[String],
    ) -> Result<HashMap<String, RealtimeDeviceData>> {
        let batches: Vec<&[String]> = device_sns.chunks(BATCH_SIZE).collect();
        info!(count = batches.len(), "splitting device SNs into batches");

        let mut merged = HashMap::new();
        for batch in batches {
            let resp: RealtimeDeviceBatchResponse = self
                .post(
                    "/device/inverter/invs_data",
                    &[
                        ("inverter", batch.join(",")),
                        ("pageNum", "1".to_string()),
                    ],
                )
                .await?;

            for (sn, inner) in resp.data {
                let Some(raw) = inner.get(&sn) else { continue };
                match serde_json::from_value::<RealtimeDeviceData>(raw.clone()) {
                    Ok(decoded) => {
                        merged.insert(sn, decoded);
                    }
                    Err(err) => {
                        tracing::warn!(sn, %err, "skipping undecodable realtime inverter entry")
                    }
                }
            }
        }

        Ok(merged)
    }

    pub async fn inverter_alert_list(&self, device_sn: &str) -> Result<Vec<Alarm>> {
        let mut alarms: Vec<Alarm> = Vec::new();
        let mut page = 1;

        loop {
            let resp: AlarmListResponse = self
                .get(
                    "/device/inverter/alarm",
                    &[
                        ("device_sn", device_sn.to_string()),
                        ("page", page.to_string()),
                        ("perpage", MAX_PAGE_SIZE.to_string()),
                    ],
                )
                .await?;

            let data = resp.data.unwrap_or_default();
            let total = data.count.unwrap_or(0);
            let page_len = data.alarms.len();
            alarms.extend(data.alarms);

            if page_len == 0 || alarms.len() as i64 >= total {
                break;
            }
            page += 1;
        }

        Ok(alarms)
    }

    /// Per-type alarm list for the storage families (max/mix/spa/min/pcs/
    /// hps/pbd), scoped to the given unix day.
    pub async fn device_alert_list(
        &self,
        device_type: DeviceType,
        device_sn: &str,
        timestamp: i64,
    ) -> Result<Vec<Alarm>> {
        let (segment, sn_param) = device_type.alarm_endpoint().ok_or_else(|| {
            AdapterError::ApiError(format!(
                "no alarm endpoint for device type {}",
                device_type.label()
            ))
        })?;

        let date = chrono::DateTime::from_timestamp(timestamp, 0)
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let path = format!("/device/{segment}/alarm_data");

        let mut alarms: Vec<Alarm> = Vec::new();
        let mut page = 1;

        loop {
            let resp: AlarmListResponse = self
                .get(
                    &path,
                    &[
                        (sn_param, device_sn.to_string()),
                        ("date", date.clone()),
                        ("page", page.to_string()),
                        ("perpage", MAX_PAGE_SIZE.to_string()),
                    ],
                )
                .await?;

            let data = resp.data.unwrap_or_default();
            let total = data.count.unwrap_or(0);
            let page_len = data.alarms.len();
            alarms.extend(data.alarms);

            if page_len == 0 || alarms.len() as i64 >= total {
                break;
            }
            page += 1;
        }

        Ok(alarms)
    }
}

// ---- Response types -----------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PlantListResponse {
    pub data: Option<PlantListData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlantListData {
    pub count: Option<i64>,
    #[serde(default)]
    pub plants: Vec<Plant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plant {
    pub plant_id: Option<i64>,
    pub name: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlantOverviewResponse {
    pub data: Option<PlantOverview>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantOverview {
    pub current_power: Option<f64>,
    pub today_energy: Option<String>,
    pub monthly_energy: Option<String>,
    pub yearly_energy: Option<String>,
    pub total_energy: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DataLoggerResponse {
    pub data: Option<DataLoggerData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataLoggerData {
    pub peak_power_actual: Option<PeakPowerActual>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeakPowerActual {
    pub nominal_power: Option<f64>,
    pub formula_money: Option<f64>,
    pub formula_co2: Option<f64>,
    pub formula_money_unit_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceListResponse {
    pub data: Option<DeviceListData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceListData {
    pub count: Option<i64>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub device_sn: Option<String>,
    pub device_id: Option<i64>,
    #[serde(rename = "type")]
    pub device_type: Option<i32>,
    pub status: Option<i32>,
    pub last_update_time: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RealtimeDeviceBatchResponse {
    #[serde(default)]
    pub inverters: Vec<String>,
    #[serde(default)]
    pub data: HashMap<String, HashMap<String, serde_json::Value>>,
    #[serde(rename = "pageNum")]
    pub page_num: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeDeviceData {
    #[serde(rename = "e_today")]
    pub power_today: Option<f64>,
    #[serde(rename = "e_total")]
    pub power_total: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct AlarmListResponse {
    pub data: Option<AlarmListData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlarmListData {
    pub count: Option<i64>,
    #[serde(default)]
    pub alarms: Vec<Alarm>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alarm {
    pub alarm_code: Option<i64>,
    pub alarm_message: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_codes_round_trip() {
        assert_eq!(parse_device_type(1), "INVERTER");
        assert_eq!(parse_device_type(5), "MIX");
        assert_eq!(parse_device_type(10), "PBD");
        assert_eq!(parse_device_type(99), "");
    }

    #[test]
    fn alarm_endpoints_exist_for_storage_families_only() {
        assert_eq!(DeviceType::Max.alarm_endpoint(), Some(("max", "max_sn")));
        assert_eq!(DeviceType::Pbd.alarm_endpoint(), Some(("pbd", "pbd_sn")));
        assert!(DeviceType::Inverter.alarm_endpoint().is_none());
    }

    #[test]
    fn inverter_status_labels() {
        assert_eq!(inverter_status_label(1), "Online");
        assert_eq!(inverter_status_label(-1), "Disconnect");
        assert_eq!(inverter_status_label(3), "Failure");
        assert_eq!(inverter_status_label(42), "Unknown");
    }

    #[test]
    fn batch_sizes_split_at_fifty() {
        let sns: Vec<String> = (0..120).map(|i| format!("SN{i}")).collect();
        let chunks: Vec<usize> = sns.chunks(BATCH_SIZE).map(<[String]>::len).collect();
        assert_eq!(chunks, vec![50, 50, 20]);
    }

    #[test]
    fn plant_list_response_decodes() {
        let raw = r#"{
            "data": {
                "count": 2,
                "plants": [
                    {"plant_id": 42, "name": "NMA001-SS-3P-10kW", "latitude": "14.97", "longitude": "102.1", "city": "Korat", "country": "Thailand"},
                    {"plant_id": 43, "name": "BKK002-PEA-1P-5kW"}
                ]
            }
        }"#;
        let resp: PlantListResponse = serde_json::from_str(raw).unwrap();
        let data = resp.data.unwrap();
        assert_eq!(data.count, Some(2));
        assert_eq!(data.plants.len(), 2);
        assert_eq!(data.plants[0].plant_id, Some(42));
        assert_eq!(data.plants[1].latitude, None);
    }

    #[test]
    fn realtime_batch_inner_entry_decodes() {
        let raw = r#"{
            "inverters": ["SN1"],
            "data": {"SN1": {"SN1": {"e_today": 12.5, "e_total": 3400.0, "power": 2.2}}},
            "pageNum": 1
        }"#;
        let resp: RealtimeDeviceBatchResponse = serde_json::from_str(raw).unwrap();
        let inner = resp.data["SN1"]["SN1"].clone();
        let decoded: RealtimeDeviceData = serde_json::from_value(inner).unwrap();
        assert_eq!(decoded.power_today, Some(12.5));
        assert_eq!(decoded.power_total, Some(3400.0));
    }
}
