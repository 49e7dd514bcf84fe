// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-vendor pollers.
//!
//! Shared shape: a producer walks one credential's plants and devices
//! sequentially (vendor rate limits) and emits events; the consumer drains,
//! derives the per-plant rollup, and bulk-indexes into today's index. A
//! failing sub-resource is a warning; a failing plant list aborts the
//! credential; a producer panic is recovered and reported.

mod growatt;
pub(crate) mod huawei;
mod huawei2;
mod kstar;
mod solarman;

pub use growatt::GrowattCollector;
pub use huawei::HuaweiCollector;
pub use huawei2::Huawei2Collector;
pub use kstar::KstarCollector;
pub use solarman::SolarmanCollector;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use solarwatch_data::models::{
    daily_index, AlarmItem, DeviceItem, PlantIdentity, PlantItem, SiteItem, SiteRegionMapping,
    DATA_TYPE_ALARM, DATA_TYPE_DEVICE, DATA_TYPE_PLANT, SOLAR_INDEX,
};
use solarwatch_data::SolarStore;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::event::{CollectEvent, Document};
use crate::plant_name::parse_site_id;

/// Plant-scoped context stamped onto every document the plant produces.
pub(crate) struct DocScope {
    pub now: DateTime<Utc>,
    pub vendor_type: String,
    pub owner: String,
    pub identity: PlantIdentity,
    pub city_name: String,
    pub city_code: String,
    pub area: String,
}

impl DocScope {
    pub fn new(
        now: DateTime<Utc>,
        vendor_type: &str,
        owner: &str,
        identity: PlantIdentity,
        regions: &[SiteRegionMapping],
    ) -> Self {
        let (city_name, city_code, area) = parse_site_id(regions, &identity.site_id);
        Self {
            now,
            vendor_type: vendor_type.to_string(),
            owner: owner.to_string(),
            identity,
            city_name,
            city_code,
            area,
        }
    }

    pub fn plant_item(&self) -> PlantItem {
        PlantItem {
            timestamp: self.now,
            month: self.now.format("%m").to_string(),
            year: self.now.format("%Y").to_string(),
            month_year: self.now.format("%m-%Y").to_string(),
            vendor_type: self.vendor_type.clone(),
            data_type: DATA_TYPE_PLANT.to_string(),
            area: self.area.clone(),
            site_id: self.identity.site_id.clone(),
            site_city_name: self.city_name.clone(),
            site_city_code: self.city_code.clone(),
            node_type: self.identity.node_type.clone(),
            ac_phase: self.identity.ac_phase.clone(),
            owner: self.owner.clone(),
            ..Default::default()
        }
    }

    pub fn device_item(&self) -> DeviceItem {
        DeviceItem {
            timestamp: self.now,
            month: self.now.format("%m").to_string(),
            year: self.now.format("%Y").to_string(),
            month_year: self.now.format("%m-%Y").to_string(),
            vendor_type: self.vendor_type.clone(),
            data_type: DATA_TYPE_DEVICE.to_string(),
            area: self.area.clone(),
            site_id: self.identity.site_id.clone(),
            site_city_name: self.city_name.clone(),
            site_city_code: self.city_code.clone(),
            node_type: self.identity.node_type.clone(),
            ac_phase: self.identity.ac_phase.clone(),
            owner: self.owner.clone(),
            ..Default::default()
        }
    }

    pub fn alarm_item(&self) -> AlarmItem {
        AlarmItem {
            timestamp: self.now,
            month: self.now.format("%m").to_string(),
            year: self.now.format("%Y").to_string(),
            month_year: self.now.format("%m-%Y").to_string(),
            vendor_type: self.vendor_type.clone(),
            data_type: DATA_TYPE_ALARM.to_string(),
            area: self.area.clone(),
            site_id: self.identity.site_id.clone(),
            site_city_name: self.city_name.clone(),
            site_city_code: self.city_code.clone(),
            node_type: self.identity.node_type.clone(),
            ac_phase: self.identity.ac_phase.clone(),
            owner: self.owner.clone(),
            ..Default::default()
        }
    }
}

/// Everything a producer emitted, in traversal order.
#[derive(Default)]
pub(crate) struct Drained {
    pub documents: Vec<Document>,
    pub inverter_sns: Vec<String>,
    pub plant_status: HashMap<String, String>,
}

pub(crate) async fn drain(mut rx: mpsc::Receiver<CollectEvent>) -> Drained {
    let mut drained = Drained::default();
    while let Some(event) = rx.recv().await {
        match event {
            CollectEvent::Document(doc) => drained.documents.push(doc),
            CollectEvent::InverterSn(sn) => drained.inverter_sns.push(sn),
            CollectEvent::PlantStatus { plant_id, status } => {
                drained.plant_status.insert(plant_id, status);
            }
        }
    }
    drained
}

/// Awaits the producer, recovering panics. Returns whether the walk
/// finished cleanly.
pub(crate) async fn join_producer(
    vendor: &str,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
) -> bool {
    match handle.await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!(vendor, %err, "collector producer failed");
            false
        }
        Err(join_err) => {
            error!(vendor, %join_err, "collector producer panicked");
            false
        }
    }
}

pub(crate) async fn index_documents(
    solar: &Arc<dyn SolarStore>,
    vendor: &str,
    now: DateTime<Utc>,
    documents: &[Document],
    site_documents: Vec<SiteItem>,
) -> anyhow::Result<()> {
    let index = daily_index(SOLAR_INDEX, now);
    let values = documents
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;

    solar.bulk_index(&index, values).await?;
    info!(vendor, index, count = documents.len(), "bulk indexed documents");

    let site_count = site_documents.len();
    solar.upsert_site_station(site_documents).await?;
    info!(vendor, count = site_count, "upserted site stations");

    Ok(())
}
