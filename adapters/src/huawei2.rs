// SPDX-License-Identifier: AGPL-3.0-or-later
//! Huawei FusionSolar client, v2 interface.
//!
//! Same host and KPI endpoints as v1; the difference is the plant listing,
//! which pages through `/thirdData/stations`, and the absence of ambient
//! request retries. Response types are shared with the v1 module.

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::Result;
use crate::huawei::{
    Device, DeviceAlarm, HistoricalDeviceData, HistoricalPlantData, HuaweiClient, Interval,
    RealtimeDeviceData, RealtimePlantData,
};

pub struct Huawei2Client {
    inner: HuaweiClient,
}

impl Huawei2Client {
    pub async fn login(username: &str, password: &str) -> Result<Self> {
        let inner = HuaweiClient::builder(username, password)
            .retry_count(0)
            .login()
            .await?;
        Ok(Self { inner })
    }

    pub async fn login_with_base_url(
        username: &str,
        password: &str,
        base_url: &str,
    ) -> Result<Self> {
        let inner = HuaweiClient::builder(username, password)
            .retry_count(0)
            .base_url(base_url)
            .login()
            .await?;
        Ok(Self { inner })
    }

    pub async fn plant_list(&self) -> Result<Vec<Station>> {
        let mut stations: Vec<Station> = Vec::new();
        let mut page = 1;

        loop {
            let data: StationPage = self
                .inner
                .post_data("/thirdData/stations", json!({ "pageNo": page }))
                .await?;

            let total = data.total.unwrap_or(0);
            let page_len = data.list.len();
            stations.extend(data.list);
            info!(page, collected = stations.len(), total, "fetched station page");

            if page_len == 0 || stations.len() as i64 >= total {
                break;
            }
            page += 1;
        }

        Ok(stations)
    }

    pub async fn realtime_plant_data(&self, station_codes: &str) -> Result<Vec<RealtimePlantData>> {
        self.inner.realtime_plant_data(station_codes).await
    }

    pub async fn historical_plant_data(
        &self,
        interval: Interval,
        station_codes: &str,
        collect_time: i64,
    ) -> Result<Vec<HistoricalPlantData>> {
        self.inner
            .historical_plant_data(interval, station_codes, collect_time)
            .await
    }

    pub async fn device_list(&self, station_codes: &str) -> Result<Vec<Device>> {
        self.inner.device_list(station_codes).await
    }

    pub async fn realtime_device_data(
        &self,
        device_ids: &str,
        device_type_id: &str,
    ) -> Result<Vec<RealtimeDeviceData>> {
        self.inner
            .realtime_device_data(device_ids, device_type_id)
            .await
    }

    pub async fn historical_device_data(
        &self,
        interval: Interval,
        device_ids: &str,
        device_type_id: &str,
        collect_time: i64,
    ) -> Result<Vec<HistoricalDeviceData>> {
        self.inner
            .historical_device_data(interval, device_ids, device_type_id, collect_time)
            .await
    }

    pub async fn device_alarms(
        &self,
        station_codes: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<DeviceAlarm>> {
        self.inner.device_alarms(station_codes, from, to).await
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StationPage {
    #[serde(default)]
    pub list: Vec<Station>,
    pub total: Option<i64>,
    #[serde(rename = "pageNo")]
    pub page_no: Option<i64>,
    #[serde(rename = "pageCount")]
    pub page_count: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Station {
    #[serde(rename = "plantCode")]
    pub code: Option<String>,
    #[serde(rename = "plantName")]
    pub name: Option<String>,
    #[serde(rename = "plantAddress")]
    pub address: Option<String>,
    pub capacity: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_page_decodes() {
        let raw = r#"{
            "list": [
                {"plantCode": "NE=201", "plantName": "STN001-PEA-3P-25kW", "capacity": 0.025},
                {"plantCode": "NE=202", "plantName": "STN002-MEA-1P-5kW"}
            ],
            "total": 2,
            "pageCount": 1,
            "pageNo": 1
        }"#;
        let page: StationPage = serde_json::from_str(raw).unwrap();
        assert_eq!(page.total, Some(2));
        assert_eq!(page.list.len(), 2);
        assert_eq!(page.list[0].code.as_deref(), Some("NE=201"));
        assert!(page.list[1].capacity.is_none());
    }
}
