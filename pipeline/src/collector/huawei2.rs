// SPDX-License-Identifier: AGPL-3.0-or-later
//! Huawei FusionSolar collector over the v2 (paged stations) interface.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use solarwatch_adapters::error::Result as AdapterResult;
use solarwatch_adapters::huawei::{
    self, DeviceAlarm, HistoricalDeviceData, HistoricalPlantData, Interval, RealtimeDeviceData,
    RealtimePlantData,
};
use solarwatch_adapters::huawei2::Huawei2Client;
use solarwatch_data::models::{HuaweiCredential, SiteRegionMapping, VENDOR_TYPE_HUAWEI};
use solarwatch_data::SolarStore;

use crate::collector::huawei::{collect_fusionsolar, run_to_index, FusionSolarApi, StationRef};
use crate::event::event_channel;

#[async_trait]
impl FusionSolarApi for Huawei2Client {
    async fn stations(&self) -> AdapterResult<Vec<StationRef>> {
        Ok(self
            .plant_list()
            .await?
            .into_iter()
            .map(|s| StationRef {
                code: s.code.unwrap_or_default(),
                name: s.name.unwrap_or_default(),
                address: s.address,
                capacity: s.capacity,
            })
            .collect())
    }

    async fn realtime_plant_data(&self, codes: &str) -> AdapterResult<Vec<RealtimePlantData>> {
        Huawei2Client::realtime_plant_data(self, codes).await
    }

    async fn historical_plant_data(
        &self,
        interval: Interval,
        codes: &str,
        collect_time: i64,
    ) -> AdapterResult<Vec<HistoricalPlantData>> {
        Huawei2Client::historical_plant_data(self, interval, codes, collect_time).await
    }

    async fn device_list(&self, codes: &str) -> AdapterResult<Vec<huawei::Device>> {
        Huawei2Client::device_list(self, codes).await
    }

    async fn realtime_device_data(
        &self,
        ids: &str,
        type_id: &str,
    ) -> AdapterResult<Vec<RealtimeDeviceData>> {
        Huawei2Client::realtime_device_data(self, ids, type_id).await
    }

    async fn historical_device_data(
        &self,
        interval: Interval,
        ids: &str,
        type_id: &str,
        collect_time: i64,
    ) -> AdapterResult<Vec<HistoricalDeviceData>> {
        Huawei2Client::historical_device_data(self, interval, ids, type_id, collect_time).await
    }

    async fn device_alarms(
        &self,
        codes: &str,
        from: i64,
        to: i64,
    ) -> AdapterResult<Vec<DeviceAlarm>> {
        Huawei2Client::device_alarms(self, codes, from, to).await
    }
}

pub struct Huawei2Collector {
    vendor_type: String,
    solar: Arc<dyn SolarStore>,
    site_regions: Arc<Vec<SiteRegionMapping>>,
}

impl Huawei2Collector {
    pub fn new(solar: Arc<dyn SolarStore>, site_regions: Vec<SiteRegionMapping>) -> Self {
        Self {
            vendor_type: VENDOR_TYPE_HUAWEI.to_uppercase(),
            solar,
            site_regions: Arc::new(site_regions),
        }
    }

    pub async fn execute(&self, credential: &HuaweiCredential) -> anyhow::Result<()> {
        let now = Utc::now();
        let vendor_type = self.vendor_type.clone();
        let site_regions = self.site_regions.clone();
        let credential_owned = credential.clone();

        let (tx, rx) = event_channel();
        let producer = tokio::spawn(async move {
            let client =
                Huawei2Client::login(&credential_owned.username, &credential_owned.password)
                    .await
                    .context("huawei2 login")?;
            collect_fusionsolar(
                vendor_type,
                site_regions,
                credential_owned,
                now,
                Arc::new(client),
                tx,
            )
            .await
        });

        run_to_index(&self.solar, "huawei2", now, credential, rx, producer).await
    }
}
