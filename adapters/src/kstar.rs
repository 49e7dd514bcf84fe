// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kstar cloud client.
//!
//! The password travels as uppercase MD5; every request carries
//! `sign = SHA1(urlencode(query ∪ {userCode, password}))` computed over the
//! key-sorted query string.

use std::collections::BTreeMap;

use md5::{Digest as _, Md5};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha1::{Digest as _, Sha1};

use crate::error::{AdapterError, Result};
use crate::http::{client_with_timeout, decode_json, send_with_retry, DEFAULT_RETRY_COUNT};

pub const MAX_PAGE_SIZE: usize = 100;
const BASE_URL: &str = "http://solar.kstar.com:9000/public";

pub const DEVICE_TYPE_INVERTER: &str = "INVERTER";

pub const DEVICE_STATUS_ONLINE: &str = "ONLINE";
pub const DEVICE_STATUS_OFFLINE: &str = "OFFLINE";
pub const DEVICE_STATUS_ALARM: &str = "ALARM";

pub struct KstarClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    retries: usize,
}

impl KstarClient {
    pub fn new(username: &str, password: &str) -> Result<Self> {
        Self::with_base_url(username, password, BASE_URL)
    }

    pub fn with_base_url(username: &str, password: &str, base_url: &str) -> Result<Self> {
        Ok(Self {
            http: client_with_timeout()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: encode_password(password),
            retries: DEFAULT_RETRY_COUNT,
        })
    }

    pub fn with_retry_count(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let mut signed = params.clone();
        signed.insert("userCode".to_string(), self.username.clone());
        signed.insert("password".to_string(), self.password.clone());

        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &signed {
            serializer.append_pair(key, value);
        }

        hex::encode(Sha1::digest(serializer.finish().as_bytes()))
    }

    /// `data` may legitimately come back null (e.g. a device with no
    /// realtime reading), so callers see an Option.
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: BTreeMap<String, String>,
    ) -> Result<Option<T>> {
        let sign = self.sign(&params);
        let mut query: Vec<(String, String)> = params.into_iter().collect();
        query.push(("userCode".to_string(), self.username.clone()));
        query.push(("password".to_string(), self.password.clone()));
        query.push(("sign".to_string(), sign));

        let url = format!("{}{}", self.base_url, path);
        let resp = send_with_retry(|| self.http.get(&url).query(&query), self.retries).await?;
        let result: Response<T> = decode_json(resp, path).await?;

        if let Some(meta) = &result.meta {
            if !meta.success {
                return Err(AdapterError::ApiError(format!(
                    "{path} failed with code {}",
                    meta.code.as_deref().unwrap_or("unknown")
                )));
            }
        }

        Ok(result.data)
    }

    pub async fn plant_list(&self) -> Result<Vec<Plant>> {
        Ok(self
            .get("/power/info", BTreeMap::new())
            .await?
            .unwrap_or_default())
    }

    pub async fn device_list(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = Vec::new();
        let mut page = 1;

        loop {
            let data: DeviceListData = self
                .get(
                    "/inverter/list",
                    BTreeMap::from([
                        ("PageNum".to_string(), page.to_string()),
                        ("PageSize".to_string(), MAX_PAGE_SIZE.to_string()),
                    ]),
                )
                .await?
                .unwrap_or_default();

            if data.list.is_empty() {
                break;
            }

            let total = data.count.unwrap_or(0);
            devices.extend(data.list);
            if devices.len() as i64 >= total {
                break;
            }
            page += 1;
        }

        Ok(devices)
    }

    pub async fn realtime_device_data(&self, device_id: &str) -> Result<Option<RealtimeDeviceData>> {
        self.get(
            "/device/real",
            BTreeMap::from([("deviceId".to_string(), device_id.to_string())]),
        )
        .await
    }

    pub async fn realtime_alarm_list(&self, device_id: &str) -> Result<Vec<DeviceAlarm>> {
        Ok(self
            .get(
                "/alarm/device/list",
                BTreeMap::from([("deviceId".to_string(), device_id.to_string())]),
            )
            .await?
            .unwrap_or_default())
    }
}

pub fn encode_password(password: &str) -> String {
    hex::encode_upper(Md5::digest(password.as_bytes()))
}

// ---- Response types -----------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Response<T> {
    pub meta: Option<Meta>,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub success: bool,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plant {
    #[serde(rename = "powerId")]
    pub id: Option<String>,
    #[serde(rename = "powerName")]
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    #[serde(rename = "installCapacity")]
    pub installed_capacity: Option<f64>,
    #[serde(rename = "electricPrice")]
    pub electric_price: Option<f64>,
    #[serde(rename = "electricUnit")]
    pub electric_unit: Option<String>,
    #[serde(rename = "createTime")]
    pub created_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceListData {
    pub count: Option<i64>,
    #[serde(default)]
    pub list: Vec<Device>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    #[serde(rename = "deviceId")]
    pub id: Option<String>,
    #[serde(rename = "deviceName")]
    pub name: Option<String>,
    #[serde(rename = "deviceSn")]
    pub sn: Option<String>,
    #[serde(rename = "powerId")]
    pub plant_id: Option<String>,
    #[serde(rename = "powerName")]
    pub plant_name: Option<String>,
    pub status: Option<i32>,
    #[serde(rename = "saveTime")]
    pub save_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeDeviceData {
    #[serde(rename = "saveTime")]
    pub save_time: Option<String>,
    #[serde(rename = "powerInter")]
    pub power_inter: Option<f64>,
    #[serde(rename = "totalGeneration")]
    pub total_generation: Option<f64>,
    #[serde(rename = "dayGeneration")]
    pub day_generation: Option<f64>,
    #[serde(rename = "monthGeneration")]
    pub month_generation: Option<f64>,
    #[serde(rename = "yearGeneration")]
    pub year_generation: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAlarm {
    #[serde(rename = "powerId")]
    pub plant_id: Option<String>,
    #[serde(rename = "powerName")]
    pub plant_name: Option<String>,
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    #[serde(rename = "deviceName")]
    pub device_name: Option<String>,
    #[serde(rename = "warnMessage")]
    pub message: Option<String>,
    #[serde(rename = "saveTime")]
    pub save_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_uppercase_md5() {
        assert_eq!(
            encode_password("password"),
            "5F4DCC3B5AA765D61D8327DEB882CF99"
        );
        assert_eq!(encode_password("password").len(), 32);
    }

    #[test]
    fn sign_is_stable_across_param_order() {
        let client = KstarClient::new("operator", "secret").unwrap();

        let forward = BTreeMap::from([
            ("PageNum".to_string(), "1".to_string()),
            ("PageSize".to_string(), "100".to_string()),
        ]);
        let reversed = BTreeMap::from([
            ("PageSize".to_string(), "100".to_string()),
            ("PageNum".to_string(), "1".to_string()),
        ]);

        assert_eq!(client.sign(&forward), client.sign(&reversed));
        assert_eq!(client.sign(&forward).len(), 40);
    }

    #[test]
    fn sign_covers_the_parameters() {
        let client = KstarClient::new("operator", "secret").unwrap();
        let one = client.sign(&BTreeMap::from([("deviceId".to_string(), "1".to_string())]));
        let two = client.sign(&BTreeMap::from([("deviceId".to_string(), "2".to_string())]));
        assert_ne!(one, two);
    }

    #[test]
    fn device_list_page_decodes() {
        let raw = r#"{
            "meta": {"success": true, "code": "0"},
            "data": {
                "count": 1,
                "list": [{
                    "deviceId": "77", "deviceName": "INV-A", "deviceSn": "KS123",
                    "powerId": "12", "powerName": "STN001-PEA-3P-25kW",
                    "status": 1, "saveTime": "2026-08-02 09:41:00"
                }]
            }
        }"#;
        let resp: Response<DeviceListData> = serde_json::from_str(raw).unwrap();
        assert!(resp.meta.unwrap().success);
        let data = resp.data.unwrap();
        assert_eq!(data.list[0].id.as_deref(), Some("77"));
        assert_eq!(data.list[0].status, Some(1));
    }
}
