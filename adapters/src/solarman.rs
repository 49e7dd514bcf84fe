// SPDX-License-Identifier: AGPL-3.0-or-later
//! Solarman (INVT) business API client.
//!
//! Auth is two-step: a basic token from (username, SHA256(password),
//! appSecret, appId), then a per-organization business token. Both travel
//! as `Authorization: Bearer`.

use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest as _, Sha256};

use crate::error::{AdapterError, Result};
use crate::http::{client_with_timeout, decode_json, send_with_retry, DEFAULT_RETRY_COUNT};

pub const MAX_PAGE_SIZE: usize = 200;
const BASE_URL: &str = "https://globalapi.solarmanpv.com";

pub const DATA_LIST_KEY_CUMULATIVE_PRODUCTION: &str = "Et_ge0";
pub const DATA_LIST_KEY_GENERATION: &str = "generation";

pub const PLANT_STATUS_ONLINE: &str = "ONLINE";
pub const PLANT_STATUS_OFFLINE: &str = "OFFLINE";
pub const PLANT_STATUS_ALARM: &str = "ALARM";

pub const DEVICE_STATUS_ONLINE: &str = "ONLINE";
pub const DEVICE_STATUS_OFFLINE: &str = "OFFLINE";
pub const DEVICE_STATUS_FAILURE: &str = "FAILURE";

/// History granularity selector; also decides the date format sent along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeType {
    Timeframe,
    Day,
    Month,
    Year,
}

impl TimeType {
    pub fn code(&self) -> i32 {
        match self {
            TimeType::Timeframe => 1,
            TimeType::Day => 2,
            TimeType::Month => 3,
            TimeType::Year => 4,
        }
    }

    pub fn build(&self, timestamp: i64) -> String {
        let time = chrono::DateTime::from_timestamp(timestamp, 0).unwrap_or_default();
        match self {
            TimeType::Year => time.format("%Y").to_string(),
            TimeType::Month => time.format("%Y-%m").to_string(),
            _ => time.format("%Y-%m-%d").to_string(),
        }
    }
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

pub struct SolarmanClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    app_id: String,
    app_secret: String,
    token: RwLock<Option<String>>,
}

impl SolarmanClient {
    pub fn new(username: &str, password: &str, app_id: &str, app_secret: &str) -> Result<Self> {
        Self::with_base_url(username, password, app_id, app_secret, BASE_URL)
    }

    pub fn with_base_url(
        username: &str,
        password: &str,
        app_id: &str,
        app_secret: &str,
        base_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            http: client_with_timeout()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: hash_password(password),
            app_id: app_id.to_string(),
            app_secret: app_secret.to_string(),
            token: RwLock::new(None),
        })
    }

    pub fn set_access_token(&self, token: &str) {
        let mut guard = self
            .token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(token.to_string());
    }

    fn bearer(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|t| format!("Bearer {t}"))
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let bearer = self.bearer();

        let resp = send_with_retry(
            || {
                let mut req = self.http.post(&url).query(&[("language", "en")]).json(&body);
                if let Some(bearer) = &bearer {
                    req = req.header(reqwest::header::AUTHORIZATION, bearer);
                }
                req
            },
            DEFAULT_RETRY_COUNT,
        )
        .await?;

        decode_json(resp, path).await
    }

    async fn token_request(&self, org_id: Option<i64>) -> Result<TokenResponse> {
        let mut body = json!({
            "username": self.username,
            "password": self.password,
            "appSecret": self.app_secret,
        });
        if let Some(org_id) = org_id {
            body["orgId"] = json!(org_id);
        }

        let url = format!("{}/account/v1.0/token", self.base_url);
        let resp = send_with_retry(
            || {
                self.http
                    .post(&url)
                    .query(&[("appId", self.app_id.clone())])
                    .json(&body)
            },
            DEFAULT_RETRY_COUNT,
        )
        .await?;

        decode_json(resp, "/account/v1.0/token").await
    }

    pub async fn basic_token(&self) -> Result<String> {
        let resp = self.token_request(None).await?;
        resp.access_token
            .ok_or_else(|| AdapterError::AuthError("empty basic token".to_string()))
    }

    pub async fn business_token(&self, org_id: i64) -> Result<String> {
        let resp = self.token_request(Some(org_id)).await?;
        resp.access_token
            .ok_or_else(|| AdapterError::AuthError(format!("empty business token for org {org_id}")))
    }

    pub async fn user_info(&self) -> Result<UserInfoResponse> {
        self.post("/account/v1.0/info", json!({})).await
    }

    pub async fn plant_list(&self) -> Result<Vec<PlantInfo>> {
        let mut plants: Vec<PlantInfo> = Vec::new();
        let mut page = 1;

        loop {
            let resp: PlantListResponse = self
                .post(
                    "/station/v1.0/list",
                    json!({ "page": page, "size": MAX_PAGE_SIZE }),
                )
                .await?;

            let total = resp.total.unwrap_or(0);
            let page_len = resp.station_list.len();
            plants.extend(resp.station_list);

            if page_len == 0 || plants.len() as i64 >= total {
                break;
            }
            page += 1;
        }

        Ok(plants)
    }

    pub async fn plant_base_info(&self, station_id: i64) -> Result<PlantBaseInfo> {
        self.post("/station/v1.0/base", json!({ "stationId": station_id }))
            .await
    }

    pub async fn plant_realtime_data(&self, station_id: i64) -> Result<PlantRealtimeData> {
        self.post("/station/v1.0/realTime", json!({ "stationId": station_id }))
            .await
    }

    pub async fn historical_plant_data(
        &self,
        station_id: i64,
        time_type: TimeType,
        from: i64,
        to: i64,
    ) -> Result<HistoricalPlantData> {
        self.post(
            "/station/v1.0/history",
            json!({
                "stationId": station_id,
                "startTime": time_type.build(from),
                "endTime": time_type.build(to),
                "timeType": time_type.code(),
            }),
        )
        .await
    }

    pub async fn plant_device_list(&self, station_id: i64) -> Result<Vec<PlantDevice>> {
        let mut devices: Vec<PlantDevice> = Vec::new();
        let mut page = 1;

        loop {
            let resp: PlantDeviceListResponse = self
                .post(
                    "/station/v1.0/device",
                    json!({ "stationId": station_id, "page": page, "size": MAX_PAGE_SIZE }),
                )
                .await?;

            let total = resp.total.unwrap_or(0);
            let page_len = resp.device_list_items.len();
            devices.extend(resp.device_list_items);

            if page_len == 0 || devices.len() as i64 >= total {
                break;
            }
            page += 1;
        }

        Ok(devices)
    }

    pub async fn device_realtime_data(&self, device_sn: &str) -> Result<DeviceRealtimeData> {
        self.post("/device/v1.0/currentData", json!({ "deviceSn": device_sn }))
            .await
    }

    pub async fn historical_device_data(
        &self,
        device_sn: &str,
        time_type: TimeType,
        from: i64,
        to: i64,
    ) -> Result<HistoricalDeviceData> {
        self.post(
            "/device/v1.0/historical",
            json!({
                "deviceSn": device_sn,
                "startTime": time_type.build(from),
                "endTime": time_type.build(to),
                "timeType": time_type.code(),
            }),
        )
        .await
    }

    pub async fn device_alert_list(
        &self,
        device_sn: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<DeviceAlert>> {
        let mut alerts: Vec<DeviceAlert> = Vec::new();
        let mut page = 1;

        loop {
            let resp: DeviceAlertListResponse = self
                .post(
                    "/device/v1.0/alertList",
                    json!({
                        "deviceSn": device_sn,
                        "startTimestamp": from,
                        "endTimestamp": to,
                        "page": page,
                        "size": MAX_PAGE_SIZE,
                    }),
                )
                .await?;

            let total = resp.total.unwrap_or(0);
            let page_len = resp.alert_list.len();
            alerts.extend(resp.alert_list);

            if page_len == 0 || alerts.len() as i64 >= total {
                break;
            }
            page += 1;
        }

        Ok(alerts)
    }
}

// ---- Response types -----------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(rename = "access_token")]
    pub access_token: Option<String>,
    pub uid: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UserInfoResponse {
    #[serde(default, rename = "orgInfoList")]
    pub org_info_list: Vec<OrgInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrgInfo {
    #[serde(rename = "companyId")]
    pub company_id: Option<i64>,
    #[serde(rename = "companyName")]
    pub company_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlantListResponse {
    pub total: Option<i64>,
    #[serde(default, rename = "stationList")]
    pub station_list: Vec<PlantInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantInfo {
    pub id: Option<i64>,
    pub name: Option<String>,
    #[serde(rename = "locationLat")]
    pub location_lat: Option<f64>,
    #[serde(rename = "locationLng")]
    pub location_lng: Option<f64>,
    #[serde(rename = "locationAddress")]
    pub location_address: Option<String>,
    #[serde(rename = "installedCapacity")]
    pub installed_capacity: Option<f64>,
    #[serde(rename = "createdDate")]
    pub created_date: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantBaseInfo {
    pub currency: Option<String>,
    #[serde(rename = "mergeElectricPrice")]
    pub merge_electric_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantRealtimeData {
    #[serde(rename = "generationPower")]
    pub generation_power: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalPlantData {
    #[serde(default, rename = "stationDataItems")]
    pub station_data_items: Vec<StationDataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationDataItem {
    #[serde(rename = "generationValue")]
    pub generation_value: Option<f64>,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub day: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct PlantDeviceListResponse {
    pub total: Option<i64>,
    #[serde(default, rename = "deviceListItems")]
    pub device_list_items: Vec<PlantDevice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantDevice {
    #[serde(rename = "deviceSn")]
    pub device_sn: Option<String>,
    #[serde(rename = "deviceId")]
    pub device_id: Option<i64>,
    #[serde(rename = "deviceType")]
    pub device_type: Option<String>,
    #[serde(rename = "connectStatus")]
    pub connect_status: Option<i32>,
    #[serde(rename = "collectionTime")]
    pub collection_time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRealtimeData {
    #[serde(default, rename = "dataList")]
    pub data_list: Vec<DataPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataPoint {
    pub key: Option<String>,
    pub value: Option<String>,
    pub name: Option<String>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalDeviceData {
    #[serde(default, rename = "paramDataList")]
    pub param_data_list: Vec<ParamData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamData {
    #[serde(rename = "collectTime")]
    pub collect_time: Option<String>,
    #[serde(default, rename = "dataList")]
    pub data_list: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceAlertListResponse {
    pub total: Option<i64>,
    #[serde(default, rename = "alertList")]
    pub alert_list: Vec<DeviceAlert>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAlert {
    #[serde(rename = "alertId")]
    pub alert_id: Option<i64>,
    #[serde(rename = "alertNameInPAAS")]
    pub alert_name_in_paas: Option<String>,
    #[serde(rename = "alertTime")]
    pub alert_time: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hashes_to_lowercase_sha256() {
        assert_eq!(
            hash_password("password"),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }

    #[test]
    fn time_type_formats_match_granularity() {
        // 2026-08-02T00:00:00Z
        let ts = 1_785_628_800;
        assert_eq!(TimeType::Day.build(ts), "2026-08-02");
        assert_eq!(TimeType::Month.build(ts), "2026-08");
        assert_eq!(TimeType::Year.build(ts), "2026");
        assert_eq!(TimeType::Year.code(), 4);
    }

    #[test]
    fn realtime_data_list_decodes() {
        let raw = r#"{
            "dataList": [
                {"key": "Et_ge0", "value": "10543.2", "name": "Cumulative Production", "unit": "kWh"},
                {"key": "APo_t1", "value": "3.1"}
            ]
        }"#;
        let data: DeviceRealtimeData = serde_json::from_str(raw).unwrap();
        assert_eq!(data.data_list.len(), 2);
        assert_eq!(
            data.data_list[0].key.as_deref(),
            Some(DATA_LIST_KEY_CUMULATIVE_PRODUCTION)
        );
    }

    #[test]
    fn alert_list_decodes() {
        let raw = r#"{
            "total": 1,
            "alertList": [
                {"alertId": 19, "alertNameInPAAS": "Grid Overvoltage", "alertTime": 1690101234}
            ]
        }"#;
        let resp: DeviceAlertListResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.total, Some(1));
        assert_eq!(
            resp.alert_list[0].alert_name_in_paas.as_deref(),
            Some("Grid Overvoltage")
        );
    }
}
