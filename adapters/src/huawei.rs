// SPDX-License-Identifier: AGPL-3.0-or-later
//! Huawei FusionSolar (thirdData) client, v1 interface.
//!
//! Login yields an XSRF token cookie that every call carries as a header.
//! A 401-equivalent answer (HTTP 401 or the vendor's relogin fail code)
//! triggers exactly one re-login followed by one retry.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{AdapterError, Result};
use crate::http::{client_without_timeout, send_with_retry, DEFAULT_RETRY_COUNT};

pub const AUTH_HEADER: &str = "XSRF-TOKEN";
pub const CURRENCY_USD: &str = "USD";
pub const LANGUAGE_ENGLISH: &str = "en_UK";
const BASE_URL: &str = "https://sg5.fusionsolar.huawei.com";
const RELOGIN_FAIL_CODE: i64 = 305;

pub const STATUS_ONLINE: &str = "ONLINE";
pub const STATUS_OFFLINE: &str = "OFFLINE";
pub const STATUS_ALARM: &str = "ALARM";

pub fn plant_status_label(code: i64) -> &'static str {
    match code {
        1 => STATUS_OFFLINE,
        2 => STATUS_ALARM,
        3 => STATUS_ONLINE,
        _ => "",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Day,
    Month,
    Year,
}

impl Interval {
    fn station_path(&self) -> &'static str {
        match self {
            Interval::Day => "/thirdData/getKpiStationDay",
            Interval::Month => "/thirdData/getKpiStationMonth",
            Interval::Year => "/thirdData/getKpiStationYear",
        }
    }

    fn device_path(&self) -> &'static str {
        match self {
            Interval::Day => "/thirdData/getDevKpiDay",
            Interval::Month => "/thirdData/getDevKpiMonth",
            Interval::Year => "/thirdData/getDevKpiYear",
        }
    }
}

pub struct HuaweiClientBuilder {
    username: String,
    password: String,
    base_url: String,
    retries: usize,
}

impl HuaweiClientBuilder {
    pub fn retry_count(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub async fn login(self) -> Result<HuaweiClient> {
        let client = HuaweiClient {
            // The vendor takes its time on KPI batches; leave the transport
            // timeout to reqwest defaults as deployment experience dictates.
            http: client_without_timeout()?,
            base_url: self.base_url,
            username: self.username,
            password: self.password,
            retries: self.retries,
            token: RwLock::new(String::new()),
        };

        let token = client.fetch_token().await?;
        *client.token.write().await = token;
        Ok(client)
    }
}

pub struct HuaweiClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    retries: usize,
    token: RwLock<String>,
}

impl HuaweiClient {
    pub fn builder(username: &str, password: &str) -> HuaweiClientBuilder {
        HuaweiClientBuilder {
            username: username.to_string(),
            password: password.to_string(),
            base_url: BASE_URL.to_string(),
            retries: DEFAULT_RETRY_COUNT,
        }
    }

    pub async fn login(username: &str, password: &str) -> Result<Self> {
        Self::builder(username, password).login().await
    }

    async fn fetch_token(&self) -> Result<String> {
        let url = format!("{}/thirdData/login", self.base_url);
        let body = json!({
            "userName": self.username,
            "systemCode": self.password,
        });

        let resp = send_with_retry(|| self.http.post(&url).json(&body), self.retries).await?;

        let mut token = String::new();
        for cookie in resp.headers().get_all(reqwest::header::SET_COOKIE) {
            let Ok(raw) = cookie.to_str() else { continue };
            if let Some(rest) = raw.strip_prefix(&format!("{AUTH_HEADER}=")) {
                token = rest.split(';').next().unwrap_or_default().to_string();
                break;
            }
        }

        let envelope: Envelope<Value> = resp.json().await?;
        if !envelope.success || token.is_empty() {
            return Err(AdapterError::AuthError(format!(
                "huawei login failed (failCode {})",
                envelope.fail_code
            )));
        }

        info!(username = %self.username, "huawei login succeeded");
        Ok(token)
    }

    async fn relogin(&self) -> Result<()> {
        warn!(username = %self.username, "huawei session expired, re-logging in");
        let token = self.fetch_token().await?;
        *self.token.write().await = token;
        Ok(())
    }

    async fn attempt<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<Envelope<T>> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.token.read().await.clone();

        let resp = send_with_retry(
            || self.http.post(&url).header(AUTH_HEADER, &token).json(body),
            self.retries,
        )
        .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AdapterError::AuthError(format!("{path}: HTTP 401")));
        }
        if !status.is_success() {
            return Err(AdapterError::HttpStatus {
                context: path.to_string(),
                status: status.as_u16(),
            });
        }

        let envelope: Envelope<T> = resp.json().await?;
        if !envelope.success && envelope.fail_code == RELOGIN_FAIL_CODE {
            return Err(AdapterError::AuthError(format!(
                "{path}: relogin required (failCode {RELOGIN_FAIL_CODE})"
            )));
        }

        Ok(envelope)
    }

    pub(crate) async fn post_data<T: DeserializeOwned + Default>(
        &self,
        path: &str,
        body: Value,
    ) -> Result<T> {
        let envelope = match self.attempt::<T>(path, &body).await {
            Err(AdapterError::AuthError(_)) => {
                self.relogin().await?;
                self.attempt::<T>(path, &body).await?
            }
            other => other?,
        };

        if !envelope.success {
            return Err(AdapterError::ApiError(format!(
                "{path} failed (failCode {}{})",
                envelope.fail_code,
                envelope
                    .message
                    .map(|m| format!(": {m}"))
                    .unwrap_or_default(),
            )));
        }

        Ok(envelope.data.unwrap_or_default())
    }

    pub async fn plant_list(&self) -> Result<Vec<Plant>> {
        self.post_data("/thirdData/getStationList", json!({})).await
    }

    pub async fn realtime_plant_data(&self, station_codes: &str) -> Result<Vec<RealtimePlantData>> {
        self.post_data(
            "/thirdData/getStationRealKpi",
            json!({ "stationCodes": station_codes }),
        )
        .await
    }

    pub async fn historical_plant_data(
        &self,
        interval: Interval,
        station_codes: &str,
        collect_time: i64,
    ) -> Result<Vec<HistoricalPlantData>> {
        self.post_data(
            interval.station_path(),
            json!({ "stationCodes": station_codes, "collectTime": collect_time }),
        )
        .await
    }

    pub async fn device_list(&self, station_codes: &str) -> Result<Vec<Device>> {
        self.post_data(
            "/thirdData/getDevList",
            json!({ "stationCodes": station_codes }),
        )
        .await
    }

    pub async fn realtime_device_data(
        &self,
        device_ids: &str,
        device_type_id: &str,
    ) -> Result<Vec<RealtimeDeviceData>> {
        self.post_data(
            "/thirdData/getDevRealKpi",
            json!({ "devIds": device_ids, "devTypeId": device_type_id }),
        )
        .await
    }

    pub async fn historical_device_data(
        &self,
        interval: Interval,
        device_ids: &str,
        device_type_id: &str,
        collect_time: i64,
    ) -> Result<Vec<HistoricalDeviceData>> {
        self.post_data(
            interval.device_path(),
            json!({
                "devIds": device_ids,
                "devTypeId": device_type_id,
                "collectTime": collect_time,
            }),
        )
        .await
    }

    pub async fn device_alarms(
        &self,
        station_codes: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<DeviceAlarm>> {
        self.post_data(
            "/thirdData/getAlarmList",
            json!({
                "stationCodes": station_codes,
                "from": from,
                "to": to,
                "language": LANGUAGE_ENGLISH,
            }),
        )
        .await
    }
}

// ---- Response types -----------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default, rename = "failCode")]
    pub fail_code: i64,
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plant {
    #[serde(rename = "stationCode")]
    pub code: Option<String>,
    #[serde(rename = "stationName")]
    pub name: Option<String>,
    #[serde(rename = "stationAddr")]
    pub address: Option<String>,
    pub capacity: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimePlantData {
    pub code: Option<String>,
    #[serde(rename = "dataItemMap")]
    pub data: Option<RealtimePlantItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RealtimePlantItem {
    pub total_income: Option<f64>,
    pub total_power: Option<f64>,
    pub day_power: Option<f64>,
    pub day_income: Option<f64>,
    pub real_health_state: Option<i64>,
    pub month_power: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalPlantData {
    #[serde(rename = "stationCode")]
    pub code: Option<String>,
    #[serde(rename = "collectTime")]
    pub collect_time: Option<i64>,
    #[serde(rename = "dataItemMap")]
    pub data_item_map: Option<HistoricalPlantItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoricalPlantItem {
    pub radiation_intensity: Option<f64>,
    pub installed_capacity: Option<f64>,
    pub inverter_power: Option<f64>,
    pub power_profit: Option<f64>,
    pub perpower_ratio: Option<f64>,
    pub reduction_total_co2: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub id: Option<i64>,
    #[serde(rename = "esnCode")]
    pub sn: Option<String>,
    #[serde(rename = "devName")]
    pub name: Option<String>,
    #[serde(rename = "devTypeId")]
    pub type_id: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(rename = "stationCode")]
    pub plant_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeDeviceData {
    #[serde(rename = "devId")]
    pub id: Option<i64>,
    #[serde(rename = "dataItemMap")]
    pub data_item_map: Option<RealtimeDeviceDataItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RealtimeDeviceDataItem {
    #[serde(rename = "total_cap")]
    pub total_energy: Option<f64>,
    pub active_power: Option<f64>,
    #[serde(rename = "run_state")]
    pub status: Option<i64>,
    // Occasionally a float, occasionally the string "N/A".
    pub inverter_shutdown: Option<serde_json::Value>,
}

impl RealtimeDeviceDataItem {
    pub fn inverter_shutdown_value(&self) -> Option<f64> {
        self.inverter_shutdown.as_ref().and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalDeviceData {
    #[serde(rename = "devId")]
    pub id: Option<serde_json::Value>,
    #[serde(rename = "collectTime")]
    pub collect_time: Option<i64>,
    #[serde(rename = "dataItemMap")]
    pub data_item_map: Option<HistoricalDeviceDataItem>,
}

impl HistoricalDeviceData {
    /// The vendor reports device ids as JSON numbers here; anything else is
    /// dropped by the caller.
    pub fn id_value(&self) -> Option<i64> {
        self.id.as_ref().and_then(Value::as_f64).map(|v| v as i64)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoricalDeviceDataItem {
    pub installed_capacity: Option<f64>,
    pub product_power: Option<f64>,
    pub perpower_ratio: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAlarm {
    #[serde(rename = "stationCode")]
    pub plant_code: Option<String>,
    #[serde(rename = "stationName")]
    pub plant_name: Option<String>,
    #[serde(rename = "esnCode")]
    pub device_sn: Option<String>,
    #[serde(rename = "devName")]
    pub device_name: Option<String>,
    #[serde(rename = "devTypeId")]
    pub device_type_id: Option<i64>,
    #[serde(rename = "alarmId")]
    pub alarm_id: Option<i64>,
    #[serde(rename = "alarmName")]
    pub alarm_name: Option<String>,
    #[serde(rename = "alarmCause")]
    pub alarm_cause: Option<String>,
    #[serde(rename = "raiseTime")]
    pub raise_time: Option<i64>,
    #[serde(rename = "lev")]
    pub level: Option<i64>,
    pub status: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plant_status_codes_map_to_labels() {
        assert_eq!(plant_status_label(1), STATUS_OFFLINE);
        assert_eq!(plant_status_label(2), STATUS_ALARM);
        assert_eq!(plant_status_label(3), STATUS_ONLINE);
        assert_eq!(plant_status_label(0), "");
    }

    #[test]
    fn realtime_device_payload_decodes() {
        let raw = r#"{
            "success": true,
            "failCode": 0,
            "data": [
                {"devId": 9, "dataItemMap": {"total_cap": 120.5, "active_power": 3.2, "run_state": 1}},
                {"devId": 10, "dataItemMap": {"run_state": 0, "inverter_shutdown": 1690100000.0}}
            ]
        }"#;
        let envelope: Envelope<Vec<RealtimeDeviceData>> = serde_json::from_str(raw).unwrap();
        assert!(envelope.success);
        let data = envelope.data.unwrap();
        assert_eq!(data[0].data_item_map.as_ref().unwrap().status, Some(1));
        assert_eq!(
            data[1]
                .data_item_map
                .as_ref()
                .unwrap()
                .inverter_shutdown_value(),
            Some(1_690_100_000.0)
        );
    }

    #[test]
    fn alarm_payload_decodes_with_raise_time() {
        let raw = r#"{
            "success": true,
            "data": [{
                "stationCode": "NE=101", "stationName": "P1", "esnCode": "SN1",
                "devName": "INV-01", "alarmId": 2064, "alarmName": "String Abnormal",
                "alarmCause": "String reversed", "raiseTime": 1690101234000, "lev": 2
            }]
        }"#;
        let envelope: Envelope<Vec<DeviceAlarm>> = serde_json::from_str(raw).unwrap();
        let alarm = &envelope.data.unwrap()[0];
        assert_eq!(alarm.raise_time, Some(1_690_101_234_000));
        assert_eq!(alarm.alarm_name.as_deref(), Some("String Abnormal"));
    }

    #[test]
    fn historical_device_id_tolerates_numbers_only() {
        let with_number: HistoricalDeviceData =
            serde_json::from_str(r#"{"devId": 7.0, "collectTime": 1}"#).unwrap();
        assert_eq!(with_number.id_value(), Some(7));

        let with_string: HistoricalDeviceData =
            serde_json::from_str(r#"{"devId": "7", "collectTime": 1}"#).unwrap();
        assert_eq!(with_string.id_value(), None);
    }
}
