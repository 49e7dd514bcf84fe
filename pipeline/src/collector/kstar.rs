// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kstar collector.
//!
//! Devices are listed account-wide and grouped by plant. Every device gets
//! a realtime-alarm check (any hit forces ALARM) and a realtime read whose
//! scalars roll up into the plant totals; readings older than twelve hours
//! are considered stale and skipped.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use solarwatch_adapters::kstar::{self, KstarClient};
use solarwatch_data::models::{KstarCredential, SiteRegionMapping, VENDOR_TYPE_KSTAR};
use solarwatch_data::SolarStore;
use tracing::{info, warn};

use crate::collector::{drain, index_documents, join_producer, DocScope};
use crate::event::{emit, event_channel, site_item_of, CollectEvent, Document, EventSender, StatusRollup};
use crate::plant_name::parse_plant_id;

const STALE_AFTER_HOURS: i64 = 12;

pub struct KstarCollector {
    vendor_type: String,
    solar: Arc<dyn SolarStore>,
    site_regions: Arc<Vec<SiteRegionMapping>>,
}

impl KstarCollector {
    pub fn new(solar: Arc<dyn SolarStore>, site_regions: Vec<SiteRegionMapping>) -> Self {
        Self {
            vendor_type: VENDOR_TYPE_KSTAR.to_uppercase(),
            solar,
            site_regions: Arc::new(site_regions),
        }
    }

    pub async fn execute(&self, credential: &KstarCredential) -> anyhow::Result<()> {
        let now = Utc::now();
        let (tx, rx) = event_channel();
        let producer = tokio::spawn(collect(
            self.vendor_type.clone(),
            self.site_regions.clone(),
            credential.clone(),
            now,
            tx,
        ));

        let drained = drain(rx).await;
        let finished = join_producer("kstar", producer).await;

        let site_documents = drained
            .documents
            .iter()
            .filter_map(|doc| match doc {
                Document::Plant(plant) => Some(site_item_of(plant, &credential.owner)),
                _ => None,
            })
            .collect();

        index_documents(&self.solar, "kstar", now, &drained.documents, site_documents).await?;

        if !finished {
            anyhow::bail!("kstar collect aborted for {}", credential.username);
        }
        Ok(())
    }
}

async fn collect(
    vendor_type: String,
    site_regions: Arc<Vec<SiteRegionMapping>>,
    credential: KstarCredential,
    now: DateTime<Utc>,
    tx: EventSender,
) -> anyhow::Result<()> {
    let client = KstarClient::new(&credential.username, &credential.password)?;

    let devices = client.device_list().await.context("get device list")?;
    if devices.is_empty() {
        anyhow::bail!("no devices found for {}", credential.username);
    }

    let mut devices_by_plant: HashMap<String, Vec<kstar::Device>> = HashMap::new();
    for device in devices {
        if let Some(plant_id) = device.plant_id.clone().filter(|id| !id.is_empty()) {
            devices_by_plant.entry(plant_id).or_default().push(device);
        }
    }

    let plants = client.plant_list().await.context("get plant list")?;
    if plants.is_empty() {
        anyhow::bail!("no plants found for {}", credential.username);
    }

    let plant_size = plants.len();
    for (i, plant) in plants.into_iter().enumerate() {
        let plant_id = plant.id.clone().unwrap_or_default();
        let plant_name = plant.name.clone().unwrap_or_default();
        let identity = parse_plant_id(&plant_name);
        let scope = DocScope::new(
            now,
            &vendor_type,
            &credential.owner,
            identity,
            &site_regions,
        );

        let location = match (plant.latitude, plant.longitude) {
            (Some(lat), Some(lon)) => Some(format!("{lat:.6},{lon:.6}")),
            _ => None,
        };

        let mut rollup = StatusRollup::new();
        let mut current_power = 0.0;
        let mut total_production = 0.0;
        let mut daily_production = 0.0;
        let mut monthly_production = 0.0;
        let mut yearly_production = 0.0;

        let plant_devices = devices_by_plant.remove(&plant_id).unwrap_or_default();
        let device_size = plant_devices.len();
        for (j, device) in plant_devices.into_iter().enumerate() {
            let device_id = device.id.clone().unwrap_or_default();

            let alarms = match client.realtime_alarm_list(&device_id).await {
                Ok(alarms) => alarms,
                Err(err) => {
                    warn!(
                        plant_id = %plant_id,
                        device_id = %device_id,
                        device_count = format!("{}/{}", j + 1, device_size),
                        %err,
                        "failed to get realtime alarm list"
                    );
                    continue;
                }
            };

            let mut device_status = device.status;
            if !alarms.is_empty() {
                device_status = Some(2);
                for alarm in &alarms {
                    let mut alarm_item = scope.alarm_item();
                    alarm_item.plant_id = alarm.plant_id.clone();
                    alarm_item.plant_name = alarm.plant_name.clone();
                    alarm_item.latitude = plant.latitude;
                    alarm_item.longitude = plant.longitude;
                    alarm_item.location = location.clone();
                    alarm_item.device_id = alarm.device_id.clone();
                    alarm_item.device_sn = device.sn.clone();
                    alarm_item.device_name = alarm.device_name.clone();
                    alarm_item.device_status = Some(kstar::DEVICE_STATUS_ALARM.to_string());
                    alarm_item.message = alarm.message.clone();

                    if let Some(save_time) = alarm.save_time.as_deref().and_then(parse_save_time) {
                        alarm_item.timestamp = save_time;
                    }

                    emit(&tx, CollectEvent::Document(Document::Alarm(alarm_item))).await?;
                }
            }

            let mut device_item = scope.device_item();
            device_item.plant_id = device.plant_id.clone();
            device_item.plant_name = device.plant_name.clone();
            device_item.latitude = plant.latitude;
            device_item.longitude = plant.longitude;
            device_item.location = location.clone();
            device_item.id = device.id.clone();
            device_item.sn = device.sn.clone();
            device_item.name = device.name.clone();
            device_item.device_type = Some(kstar::DEVICE_TYPE_INVERTER.to_string());

            let realtime = match client.realtime_device_data(&device_id).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    warn!(plant_id = %plant_id, device_id = %device_id, "no realtime device data");
                    continue;
                }
                Err(err) => {
                    warn!(plant_id = %plant_id, device_id = %device_id, %err, "failed to get realtime device data");
                    continue;
                }
            };

            if let Some(save_time) = realtime.save_time.as_deref().and_then(parse_save_time) {
                device_item.timestamp = save_time;
                if now.signed_duration_since(save_time).num_hours() < STALE_AFTER_HOURS {
                    current_power += realtime.power_inter.unwrap_or(0.0);
                    total_production += realtime.total_generation.unwrap_or(0.0);
                    daily_production += realtime.day_generation.unwrap_or(0.0);
                    monthly_production += realtime.month_generation.unwrap_or(0.0);
                    yearly_production += realtime.year_generation.unwrap_or(0.0);
                } else {
                    warn!(
                        plant_id = %plant_id,
                        device_id = %device_id,
                        save_time = realtime.save_time.as_deref().unwrap_or("-"),
                        "device data is outdated"
                    );
                    continue;
                }
            }

            if let Some(status) = device_status {
                let label = match status {
                    0 => kstar::DEVICE_STATUS_OFFLINE,
                    1 => kstar::DEVICE_STATUS_ONLINE,
                    2 => kstar::DEVICE_STATUS_ALARM,
                    _ => "",
                };
                if !label.is_empty() {
                    device_item.status = Some(label.to_string());
                    rollup.observe(label);
                }
            }

            emit(&tx, CollectEvent::Document(Document::Device(device_item))).await?;
        }

        let mut plant_item = scope.plant_item();
        plant_item.id = Some(plant_id.clone());
        plant_item.name = Some(plant_name.clone());
        plant_item.latitude = plant.latitude;
        plant_item.longitude = plant.longitude;
        plant_item.location = location;
        plant_item.location_address = plant.address.clone();
        plant_item.installed_capacity = plant.installed_capacity;
        plant_item.total_saving_price =
            Some(total_production * plant.electric_price.unwrap_or(0.0));
        plant_item.currency = plant.electric_unit.clone();
        // Realtime power arrives in watts.
        plant_item.current_power = Some(current_power / 1000.0);
        plant_item.total_production = Some(total_production);
        plant_item.daily_production = Some(daily_production);
        plant_item.monthly_production = Some(monthly_production);
        plant_item.yearly_production = Some(yearly_production);
        plant_item.plant_status = Some(rollup.finish());
        plant_item.created_date = plant.created_time.as_deref().and_then(parse_save_time);

        emit(&tx, CollectEvent::Document(Document::Plant(plant_item))).await?;
        info!(
            username = %credential.username,
            plant_count = format!("{}/{}", i + 1, plant_size),
            plant_id = %plant_id,
            "kstar plant item added"
        );
    }

    Ok(())
}

fn parse_save_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_time_parses_vendor_format() {
        let parsed = parse_save_time("2026-08-02 09:41:00").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d %H:%M:%S").to_string(), "2026-08-02 09:41:00");
        assert!(parse_save_time("02/08/2026").is_none());
    }
}
