// SPDX-License-Identifier: AGPL-3.0-or-later
//! Growatt collector.
//!
//! The walk emits plant, device and alarm documents plus the inverter SNs;
//! after the walk one batched realtime call fills per-inverter production
//! and the rollup statuses are applied to the plant documents.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use solarwatch_adapters::growatt::{self, DeviceType, GrowattClient};
use solarwatch_data::models::{GrowattCredential, SiteRegionMapping, VENDOR_TYPE_GROWATT};
use solarwatch_data::SolarStore;
use tracing::{info, warn};

use crate::collector::{drain, index_documents, join_producer, DocScope, Drained};
use crate::event::{emit, event_channel, site_item_of, CollectEvent, Document, EventSender};
use crate::plant_name::parse_plant_id;

pub struct GrowattCollector {
    vendor_type: String,
    solar: Arc<dyn SolarStore>,
    site_regions: Arc<Vec<SiteRegionMapping>>,
}

impl GrowattCollector {
    pub fn new(solar: Arc<dyn SolarStore>, site_regions: Vec<SiteRegionMapping>) -> Self {
        Self {
            vendor_type: VENDOR_TYPE_GROWATT.to_uppercase(),
            solar,
            site_regions: Arc::new(site_regions),
        }
    }

    pub async fn execute(
        &self,
        now: DateTime<Utc>,
        credential: &GrowattCredential,
    ) -> anyhow::Result<()> {
        let (tx, rx) = event_channel();
        let producer = tokio::spawn(collect(
            self.vendor_type.clone(),
            self.site_regions.clone(),
            credential.clone(),
            now,
            tx,
        ));

        let drained = drain(rx).await;
        if !join_producer("growatt", producer).await {
            anyhow::bail!("growatt collect aborted for {}", credential.username);
        }

        let realtime = match inverter_productions(credential, &drained.inverter_sns).await {
            Ok(map) => map,
            Err(err) => {
                warn!(%err, "failed to calculate inverter productions");
                HashMap::new()
            }
        };

        let Drained {
            mut documents,
            plant_status,
            ..
        } = drained;

        let mut site_documents = Vec::new();
        for doc in &mut documents {
            match doc {
                Document::Plant(plant) => {
                    if let Some(id) = &plant.id {
                        if let Some(status) = plant_status.get(id) {
                            plant.plant_status = Some(status.clone());
                        }
                    }
                    site_documents.push(site_item_of(plant, &credential.owner));
                }
                Document::Device(device) => {
                    if let Some(data) = device.sn.as_ref().and_then(|sn| realtime.get(sn)) {
                        device.total_power_generation = data.power_total;
                        device.daily_power_generation = data.power_today;
                    }
                }
                Document::Alarm(_) => {}
            }
        }

        index_documents(&self.solar, "growatt", now, &documents, site_documents).await
    }
}

async fn collect(
    vendor_type: String,
    site_regions: Arc<Vec<SiteRegionMapping>>,
    credential: GrowattCredential,
    now: DateTime<Utc>,
    tx: EventSender,
) -> anyhow::Result<()> {
    let client = GrowattClient::new(&credential.username, &credential.token)?;
    let plants = client.plant_list().await.context("get plant list")?;
    info!(username = %credential.username, count = plants.len(), "fetched growatt plant list");

    let plant_size = plants.len();
    for (i, station) in plants.into_iter().enumerate() {
        let station_id = station.plant_id.unwrap_or(0);
        let station_id_str = station_id.to_string();
        let identity = parse_plant_id(station.name.as_deref().unwrap_or_default());
        let scope = DocScope::new(
            now,
            &vendor_type,
            &credential.owner,
            identity,
            &site_regions,
        );

        let mut plant_item = scope.plant_item();
        plant_item.id = Some(station_id_str.clone());
        plant_item.name = station.name.clone();
        plant_item.plant_status = Some(growatt::PLANT_STATUS_OFFLINE.to_string());

        plant_item.latitude = station.latitude.as_deref().and_then(|s| s.parse().ok());
        plant_item.longitude = station.longitude.as_deref().and_then(|s| s.parse().ok());
        if let (Some(lat), Some(lon)) = (plant_item.latitude, plant_item.longitude) {
            plant_item.location = Some(format!("{lat:.6},{lon:.6}"));
        }

        plant_item.location_address = match (
            station.city.filter(|c| !c.is_empty()),
            station.country.filter(|c| !c.is_empty()),
        ) {
            (Some(city), Some(country)) => Some(format!("{city}, {country}")),
            (Some(city), None) => Some(city),
            (None, Some(country)) => Some(country),
            (None, None) => None,
        };

        let mut electric_price_per_kwh = None;
        let mut co2_weight_per_kwh = None;

        match client.plant_data_logger_info(station_id).await {
            Ok(resp) => {
                if let Some(actual) = resp.data.and_then(|d| d.peak_power_actual) {
                    electric_price_per_kwh = actual.formula_money;
                    co2_weight_per_kwh = actual.formula_co2;

                    if let Some(nominal) = actual.nominal_power {
                        plant_item.installed_capacity = Some(nominal / 1000.0);
                    } else if scope.identity.capacity != 0.0 {
                        plant_item.installed_capacity = Some(scope.identity.capacity);
                    }

                    if let Some(unit) = actual.formula_money_unit_id {
                        plant_item.currency = Some(unit.to_uppercase());
                    }
                }
            }
            Err(err) => warn!(plant_id = station_id, %err, "failed to get data logger info"),
        }

        match client.plant_overview_info(station_id).await {
            Ok(resp) => {
                if let Some(overview) = resp.data {
                    plant_item.current_power = overview.current_power;
                    plant_item.daily_production =
                        overview.today_energy.as_deref().and_then(|s| s.parse().ok());

                    if let Some(monthly) =
                        overview.monthly_energy.as_deref().and_then(|s| s.parse::<f64>().ok())
                    {
                        plant_item.monthly_production = Some(monthly);
                        if let Some(co2) = co2_weight_per_kwh {
                            plant_item.monthly_co2 = Some(monthly * co2);
                        }
                    }

                    plant_item.yearly_production =
                        overview.yearly_energy.as_deref().and_then(|s| s.parse().ok());

                    if let Some(total) =
                        overview.total_energy.as_deref().and_then(|s| s.parse::<f64>().ok())
                    {
                        plant_item.total_production = Some(total);
                        if let Some(price) = electric_price_per_kwh {
                            plant_item.total_saving_price = Some(total * price);
                        }
                        if let Some(co2) = co2_weight_per_kwh {
                            plant_item.total_co2 = Some(total * co2);
                        }
                    }
                }
            }
            Err(err) => warn!(plant_id = station_id, %err, "failed to get plant overview"),
        }

        let latitude = plant_item.latitude;
        let longitude = plant_item.longitude;
        let location = plant_item.location.clone();
        emit(&tx, CollectEvent::Document(Document::Plant(plant_item))).await?;
        info!(
            plant_count = format!("{}/{}", i + 1, plant_size),
            username = %credential.username,
            plant_id = %station_id_str,
            "growatt plant item added"
        );

        let devices = match client.plant_device_list(station_id).await {
            Ok(devices) => devices,
            Err(err) => {
                warn!(plant_id = station_id, %err, "failed to get plant device list");
                continue;
            }
        };

        let mut device_statuses = Vec::new();
        for device in devices {
            let device_sn = device.device_sn.clone().unwrap_or_default();
            let device_id = device.device_id.unwrap_or(0);
            let kind = device.device_type.and_then(DeviceType::from_code);

            let mut device_item = scope.device_item();
            device_item.plant_id = Some(station_id_str.clone());
            device_item.plant_name = station.name.clone();
            device_item.latitude = latitude;
            device_item.longitude = longitude;
            device_item.location = location.clone();
            device_item.id = Some(device_id.to_string());
            device_item.sn = device.device_sn.clone();
            device_item.name = device.device_sn.clone();
            device_item.device_type = kind.map(|k| k.label().to_string());

            if let Some(raw) = &device.last_update_time {
                if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
                    device_item.last_update_time = Some(parsed.and_utc());
                }
            }

            if let (Some(kind), Some(code)) = (kind, device.status) {
                if let Some(mapped) = device_status(kind, code) {
                    device_item.status = Some(mapped.label.to_string());

                    if !mapped.steady {
                        if let Some(alarm) = latest_alarm(&client, kind, &device_sn, now).await {
                            if same_day(device.last_update_time.as_deref(), alarm.start_time.as_deref())
                            {
                                let mut alarm_item = scope.alarm_item();
                                alarm_item.plant_id = Some(station_id_str.clone());
                                alarm_item.plant_name = station.name.clone();
                                alarm_item.latitude = latitude;
                                alarm_item.longitude = longitude;
                                alarm_item.location = location.clone();
                                alarm_item.device_id = Some(device_id.to_string());
                                alarm_item.device_sn = device.device_sn.clone();
                                alarm_item.device_name = device.device_sn.clone();
                                alarm_item.device_type = Some(kind.label().to_string());
                                alarm_item.device_status = device_item.status.clone();
                                alarm_item.id =
                                    Some(alarm.alarm_code.unwrap_or(0).to_string());
                                alarm_item.message = alarm.alarm_message.clone();
                                alarm_item.alarm_time = alarm.start_time.as_deref().and_then(|s| {
                                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                                        .ok()
                                        .map(|n| n.and_utc())
                                });

                                emit(&tx, CollectEvent::Document(Document::Alarm(alarm_item)))
                                    .await?;
                            }
                        }
                    }
                }
            }

            if let Some(status) = &device_item.status {
                device_statuses.push(status.clone());
            }

            emit(&tx, CollectEvent::Document(Document::Device(device_item))).await?;

            if kind == Some(DeviceType::Inverter) {
                emit(&tx, CollectEvent::InverterSn(device_sn)).await?;
            }
        }

        emit(
            &tx,
            CollectEvent::PlantStatus {
                plant_id: station_id_str.clone(),
                status: crate::event::rollup_status(&device_statuses).to_string(),
            },
        )
        .await?;
    }

    Ok(())
}

struct MappedStatus {
    label: &'static str,
    /// Steady states (plain online/offline) skip the alarm-list lookup.
    steady: bool,
}

fn device_status(kind: DeviceType, code: i32) -> Option<MappedStatus> {
    let mapped = match kind {
        DeviceType::Mix | DeviceType::Spa => MappedStatus {
            label: match code {
                5..=8 => growatt::DEVICE_STATUS_ONLINE,
                0 => growatt::DEVICE_STATUS_WAITING,
                1 => growatt::DEVICE_STATUS_SELF_CHECK,
                3 => growatt::DEVICE_STATUS_FAILURE,
                4 => growatt::DEVICE_STATUS_UPGRADING,
                _ => growatt::DEVICE_STATUS_OFFLINE,
            },
            steady: (5..=8).contains(&code),
        },
        DeviceType::Inverter
        | DeviceType::Max
        | DeviceType::Min
        | DeviceType::Pcs
        | DeviceType::Hps
        | DeviceType::Pbd => MappedStatus {
            label: match code {
                0 => growatt::DEVICE_STATUS_OFFLINE,
                1 => growatt::DEVICE_STATUS_ONLINE,
                2 => growatt::DEVICE_STATUS_STAND_BY,
                3 => growatt::DEVICE_STATUS_FAILURE,
                4 => growatt::DEVICE_STATUS_UPGRADING,
                _ => growatt::DEVICE_STATUS_OFFLINE,
            },
            steady: code == 0 || code == 1,
        },
        DeviceType::EnergyStorageMachine | DeviceType::OtherEquipment => return None,
    };

    Some(mapped)
}

async fn latest_alarm(
    client: &GrowattClient,
    kind: DeviceType,
    device_sn: &str,
    now: DateTime<Utc>,
) -> Option<growatt::Alarm> {
    let alarms = match kind {
        DeviceType::Inverter => client.inverter_alert_list(device_sn).await,
        DeviceType::Max
        | DeviceType::Mix
        | DeviceType::Spa
        | DeviceType::Min
        | DeviceType::Pcs
        | DeviceType::Hps
        | DeviceType::Pbd => client.device_alert_list(kind, device_sn, now.timestamp()).await,
        _ => return None,
    };

    match alarms {
        Ok(alarms) => alarms.into_iter().next(),
        Err(err) => {
            warn!(device_sn, %err, "failed to get device alert list");
            None
        }
    }
}

fn same_day(last_update: Option<&str>, start_time: Option<&str>) -> bool {
    match (
        last_update.and_then(|s| s.get(0..10)),
        start_time.and_then(|s| s.get(0..10)),
    ) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

async fn inverter_productions(
    credential: &GrowattCredential,
    inverter_sns: &[String],
) -> anyhow::Result<HashMap<String, growatt::RealtimeDeviceData>> {
    if inverter_sns.is_empty() {
        return Ok(HashMap::new());
    }

    let client = GrowattClient::new(&credential.username, &credential.token)?;
    info!(count = inverter_sns.len(), "fetching realtime inverter batches");
    Ok(client.realtime_device_batches(inverter_sns).await?)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverter_statuses_map_and_flag_alarm_lookup() {
        let online = device_status(DeviceType::Inverter, 1).unwrap();
        assert_eq!(online.label, "ONLINE");
        assert!(online.steady);

        let failure = device_status(DeviceType::Inverter, 3).unwrap();
        assert_eq!(failure.label, "FAILURE");
        assert!(!failure.steady);

        let unknown = device_status(DeviceType::Min, 9).unwrap();
        assert_eq!(unknown.label, "OFFLINE");
        assert!(!unknown.steady);
    }

    #[test]
    fn mix_family_statuses_treat_five_to_eight_as_online() {
        for code in 5..=8 {
            let mapped = device_status(DeviceType::Mix, code).unwrap();
            assert_eq!(mapped.label, "ONLINE");
            assert!(mapped.steady);
        }

        let waiting = device_status(DeviceType::Spa, 0).unwrap();
        assert_eq!(waiting.label, "WAITING");
        assert!(!waiting.steady);

        let upgrading = device_status(DeviceType::Mix, 4).unwrap();
        assert_eq!(upgrading.label, "UPGRADING");
    }

    #[test]
    fn storage_machines_carry_no_status() {
        assert!(device_status(DeviceType::EnergyStorageMachine, 1).is_none());
    }

    #[test]
    fn alarm_day_matching_compares_date_prefixes() {
        assert!(same_day(
            Some("2026-08-02 10:00:00"),
            Some("2026-08-02 06:12:00.0")
        ));
        assert!(!same_day(
            Some("2026-08-02 10:00:00"),
            Some("2026-08-01 23:59:00.0")
        ));
        assert!(!same_day(None, Some("2026-08-02 06:12:00.0")));
        assert!(!same_day(Some("short"), Some("2026-08-02 06:12:00.0")));
    }
}
