// SPDX-License-Identifier: AGPL-3.0-or-later
//! Huawei FusionSolar collector, shared by the v1 and v2 interfaces.
//!
//! Station codes and device ids go out in comma-joined batches of 100.
//! Realtime, daily, monthly and yearly KPIs are gathered up front into
//! per-code maps; alarms over [today 06:00 UTC, now] are deduplicated per
//! (SN, alarm name) keeping the newest raise time; the per-station pass
//! then assembles alarm, device and plant documents.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use solarwatch_adapters::error::Result as AdapterResult;
use solarwatch_adapters::huawei::{
    self, DeviceAlarm, HistoricalDeviceData, HistoricalPlantData, HuaweiClient, Interval,
    RealtimeDeviceData, RealtimePlantData,
};
use solarwatch_data::models::{HuaweiCredential, SiteRegionMapping, VENDOR_TYPE_HUAWEI};
use solarwatch_data::SolarStore;
use tracing::{info, warn};

use crate::collector::{drain, index_documents, join_producer, DocScope};
use crate::event::{emit, event_channel, site_item_of, CollectEvent, Document, EventSender, StatusRollup};
use crate::plant_name::parse_plant_id;

pub(crate) const CODE_BATCH_SIZE: usize = 100;
const INVERTER_TYPE_ID: i64 = 1;

/// Comma-joined batches for the list-style FusionSolar endpoints.
pub(crate) fn join_batches<I: IntoIterator<Item = String>>(items: I, size: usize) -> Vec<String> {
    let collected: Vec<String> = items.into_iter().collect();
    if collected.is_empty() {
        return vec![String::new()];
    }
    collected.chunks(size).map(|chunk| chunk.join(",")).collect()
}

/// Plant listing entry common to both interface versions.
pub(crate) struct StationRef {
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub capacity: Option<f64>,
}

/// The FusionSolar surface the walk needs; v1 and v2 differ only in how the
/// station list is fetched.
#[async_trait]
pub(crate) trait FusionSolarApi: Send + Sync {
    async fn stations(&self) -> AdapterResult<Vec<StationRef>>;
    async fn realtime_plant_data(&self, codes: &str) -> AdapterResult<Vec<RealtimePlantData>>;
    async fn historical_plant_data(
        &self,
        interval: Interval,
        codes: &str,
        collect_time: i64,
    ) -> AdapterResult<Vec<HistoricalPlantData>>;
    async fn device_list(&self, codes: &str) -> AdapterResult<Vec<huawei::Device>>;
    async fn realtime_device_data(
        &self,
        ids: &str,
        type_id: &str,
    ) -> AdapterResult<Vec<RealtimeDeviceData>>;
    async fn historical_device_data(
        &self,
        interval: Interval,
        ids: &str,
        type_id: &str,
        collect_time: i64,
    ) -> AdapterResult<Vec<HistoricalDeviceData>>;
    async fn device_alarms(&self, codes: &str, from: i64, to: i64)
        -> AdapterResult<Vec<DeviceAlarm>>;
}

#[async_trait]
impl FusionSolarApi for HuaweiClient {
    async fn stations(&self) -> AdapterResult<Vec<StationRef>> {
        Ok(self
            .plant_list()
            .await?
            .into_iter()
            .map(|p| StationRef {
                code: p.code.unwrap_or_default(),
                name: p.name.unwrap_or_default(),
                address: p.address,
                capacity: p.capacity,
            })
            .collect())
    }

    async fn realtime_plant_data(&self, codes: &str) -> AdapterResult<Vec<RealtimePlantData>> {
        HuaweiClient::realtime_plant_data(self, codes).await
    }

    async fn historical_plant_data(
        &self,
        interval: Interval,
        codes: &str,
        collect_time: i64,
    ) -> AdapterResult<Vec<HistoricalPlantData>> {
        HuaweiClient::historical_plant_data(self, interval, codes, collect_time).await
    }

    async fn device_list(&self, codes: &str) -> AdapterResult<Vec<huawei::Device>> {
        HuaweiClient::device_list(self, codes).await
    }

    async fn realtime_device_data(
        &self,
        ids: &str,
        type_id: &str,
    ) -> AdapterResult<Vec<RealtimeDeviceData>> {
        HuaweiClient::realtime_device_data(self, ids, type_id).await
    }

    async fn historical_device_data(
        &self,
        interval: Interval,
        ids: &str,
        type_id: &str,
        collect_time: i64,
    ) -> AdapterResult<Vec<HistoricalDeviceData>> {
        HuaweiClient::historical_device_data(self, interval, ids, type_id, collect_time).await
    }

    async fn device_alarms(
        &self,
        codes: &str,
        from: i64,
        to: i64,
    ) -> AdapterResult<Vec<DeviceAlarm>> {
        HuaweiClient::device_alarms(self, codes, from, to).await
    }
}

pub struct HuaweiCollector {
    vendor_type: String,
    solar: Arc<dyn SolarStore>,
    site_regions: Arc<Vec<SiteRegionMapping>>,
}

impl HuaweiCollector {
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
            let client = HuaweiClient::login(&credential_owned.username, &credential_owned.password)
                .await
                .context("huawei login")?;
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

        run_to_index(&self.solar, "huawei", now, credential, rx, producer).await
    }
}

/// Shared consumer: drain, project site items, index what was collected
/// even when the producer failed part-way.
pub(crate) async fn run_to_index(
    solar: &Arc<dyn SolarStore>,
    vendor: &'static str,
    now: DateTime<Utc>,
    credential: &HuaweiCredential,
    rx: tokio::sync::mpsc::Receiver<CollectEvent>,
    producer: tokio::task::JoinHandle<anyhow::Result<()>>,
) -> anyhow::Result<()> {
    let drained = drain(rx).await;
    let finished = join_producer(vendor, producer).await;

    let site_documents = drained
        .documents
        .iter()
        .filter_map(|doc| match doc {
            Document::Plant(plant) => Some(site_item_of(plant, &credential.owner)),
            _ => None,
        })
        .collect();

    index_documents(solar, vendor, now, &drained.documents, site_documents).await?;

    if !finished {
        anyhow::bail!("{vendor} collect aborted for {}", credential.username);
    }
    Ok(())
}

pub(crate) async fn collect_fusionsolar(
    vendor_type: String,
    site_regions: Arc<Vec<SiteRegionMapping>>,
    credential: HuaweiCredential,
    now: DateTime<Utc>,
    client: Arc<dyn FusionSolarApi>,
    tx: EventSender,
) -> anyhow::Result<()> {
    let begin_time = now
        .date_naive()
        .and_hms_opt(6, 0, 0)
        .map(|t| t.and_utc().timestamp_millis())
        .unwrap_or_default();
    let collect_time = now.timestamp_millis();

    let stations = client.stations().await.context("get plant list")?;
    if stations.is_empty() {
        anyhow::bail!("no plant list for {}", credential.username);
    }
    info!(username = %credential.username, count = stations.len(), "fetched huawei plant list");

    let code_batches = join_batches(
        stations.iter().map(|s| s.code.clone()),
        CODE_BATCH_SIZE,
    );

    let mut inverters: Vec<huawei::Device> = Vec::new();
    let mut realtime_by_code: HashMap<String, RealtimePlantData> = HashMap::new();
    let mut daily_by_code: HashMap<String, HistoricalPlantData> = HashMap::new();
    let mut monthly_by_code: HashMap<String, HistoricalPlantData> = HashMap::new();
    let mut yearly_power_by_code: HashMap<String, f64> = HashMap::new();
    let mut total_power_by_code: HashMap<String, f64> = HashMap::new();
    let mut total_co2_by_code: HashMap<String, f64> = HashMap::new();
    let mut devices_by_code: HashMap<String, Vec<huawei::Device>> = HashMap::new();
    let mut alarms_by_sn: HashMap<String, Vec<DeviceAlarm>> = HashMap::new();

    for codes in &code_batches {
        let realtime = client
            .realtime_plant_data(codes)
            .await
            .context("get realtime plant data")?;

        // Some firmwares drop stations from the batched answer; fall back to
        // per-code requests so the rest of the batch still lands.
        let code_list: Vec<&str> = codes.split(',').collect();
        if code_list.len() != realtime.len() {
            for code in &code_list {
                match client.realtime_plant_data(code).await {
                    Ok(mut single) => {
                        if let Some(data) = single.pop() {
                            realtime_by_code.insert((*code).to_string(), data);
                        } else {
                            warn!(%code, "no realtime data for station");
                        }
                    }
                    Err(err) => warn!(%code, %err, "failed to get realtime plant data"),
                }
            }
        } else {
            for (code, data) in code_list.iter().zip(realtime) {
                realtime_by_code.insert((*code).to_string(), data);
            }
        }

        let daily = client
            .historical_plant_data(Interval::Day, codes, collect_time)
            .await
            .context("get daily plant data")?;
        for item in daily {
            let Some(code) = item.code.clone().filter(|c| !c.is_empty()) else { continue };
            if collected_on(&item, now, "%Y-%m-%d") {
                daily_by_code.insert(code, item);
            }
        }

        let monthly = client
            .historical_plant_data(Interval::Month, codes, collect_time)
            .await
            .context("get monthly plant data")?;
        for item in monthly {
            let Some(code) = item.code.clone().filter(|c| !c.is_empty()) else { continue };
            let inverter_power = item
                .data_item_map
                .as_ref()
                .and_then(|d| d.inverter_power)
                .unwrap_or(0.0);
            *yearly_power_by_code.entry(code.clone()).or_default() += inverter_power;

            if collected_on(&item, now, "%Y-%m") {
                monthly_by_code.insert(code, item);
            }
        }

        let yearly = client
            .historical_plant_data(Interval::Year, codes, collect_time)
            .await
            .context("get yearly plant data")?;
        for item in yearly {
            let Some(code) = item.code.clone().filter(|c| !c.is_empty()) else { continue };
            let data = item.data_item_map.as_ref();
            *total_power_by_code.entry(code.clone()).or_default() +=
                data.and_then(|d| d.inverter_power).unwrap_or(0.0);
            *total_co2_by_code.entry(code).or_default() +=
                data.and_then(|d| d.reduction_total_co2).unwrap_or(0.0);
        }

        let devices = client.device_list(codes).await.context("get device list")?;
        for device in devices {
            if let Some(code) = device.plant_code.clone().filter(|c| !c.is_empty()) {
                devices_by_code.entry(code).or_default().push(device.clone());
            }
            if device.type_id == Some(INVERTER_TYPE_ID) {
                inverters.push(device);
            }
        }

        let alarms = client
            .device_alarms(codes, begin_time, collect_time)
            .await
            .context("get device alarms")?;
        for alarm in alarms {
            let Some(sn) = alarm.device_sn.clone().filter(|s| !s.is_empty()) else { continue };
            merge_alarm(alarms_by_sn.entry(sn).or_default(), alarm);
        }
    }

    info!(
        username = %credential.username,
        devices = inverters.len(),
        realtime = realtime_by_code.len(),
        alarmed_sns = alarms_by_sn.len(),
        "huawei batch reads complete"
    );

    let id_batches = join_batches(
        inverters
            .iter()
            .filter_map(|d| d.id.filter(|id| *id > 0).map(|id| id.to_string())),
        CODE_BATCH_SIZE,
    );

    let mut device_realtime: HashMap<i64, RealtimeDeviceData> = HashMap::new();
    let mut device_daily: HashMap<i64, HistoricalDeviceData> = HashMap::new();
    let mut device_monthly: HashMap<i64, HistoricalDeviceData> = HashMap::new();
    let mut device_yearly_power: HashMap<i64, f64> = HashMap::new();

    for ids in &id_batches {
        if ids.is_empty() {
            continue;
        }

        let realtime = client
            .realtime_device_data(ids, "1")
            .await
            .context("get realtime device data")?;
        for item in realtime {
            if let Some(id) = item.id.filter(|id| *id > 0) {
                device_realtime.insert(id, item);
            }
        }

        let daily = client
            .historical_device_data(Interval::Day, ids, "1", collect_time)
            .await
            .context("get daily device data")?;
        for item in daily {
            if device_collected_on(&item, now, "%Y-%m-%d") {
                if let Some(id) = item.id_value() {
                    device_daily.insert(id, item);
                }
            }
        }

        let monthly = client
            .historical_device_data(Interval::Month, ids, "1", collect_time)
            .await
            .context("get monthly device data")?;
        for item in monthly {
            let Some(id) = item.id_value() else { continue };
            *device_yearly_power.entry(id).or_default() += item
                .data_item_map
                .as_ref()
                .and_then(|d| d.product_power)
                .unwrap_or(0.0);
            if device_collected_on(&item, now, "%Y-%m") {
                device_monthly.insert(id, item);
            }
        }
    }

    let station_size = stations.len();
    for (i, station) in stations.iter().enumerate() {
        let identity = parse_plant_id(&station.name);
        let scope = DocScope::new(
            now,
            &vendor_type,
            &credential.owner,
            identity,
            &site_regions,
        );

        let health_state = realtime_by_code
            .get(&station.code)
            .and_then(|r| r.data.as_ref())
            .and_then(|d| d.real_health_state)
            .unwrap_or(0);
        let mut rollup = StatusRollup::seeded(huawei::plant_status_label(health_state));

        let mut latitude = None;
        let mut longitude = None;
        let mut location: Option<String> = None;
        let mut current_power = 0.0;

        for device in devices_by_code.get(&station.code).map(Vec::as_slice).unwrap_or(&[]) {
            let device_id = device.id.unwrap_or(0);
            let device_sn = device.sn.clone().unwrap_or_default();

            latitude = device.latitude;
            longitude = device.longitude;
            if let (Some(lat), Some(lon)) = (latitude, longitude) {
                location = Some(format!("{lat:.6},{lon:.6}"));
            }

            let mut device_status = device_realtime
                .get(&device_id)
                .and_then(|r| r.data_item_map.as_ref())
                .and_then(|d| d.status);

            if let Some(alarms) = alarms_by_sn.get(&device_sn).filter(|a| !a.is_empty()) {
                device_status = Some(2);
                for alarm in alarms {
                    let mut alarm_item = scope.alarm_item();
                    alarm_item.plant_id = Some(station.code.clone());
                    alarm_item.plant_name = Some(station.name.clone());
                    alarm_item.latitude = latitude;
                    alarm_item.longitude = longitude;
                    alarm_item.location = location.clone();
                    alarm_item.device_id = Some(device_id.to_string());
                    alarm_item.device_sn = alarm.device_sn.clone();
                    alarm_item.device_name = alarm.device_name.clone();
                    alarm_item.device_status = Some(huawei::STATUS_ALARM.to_string());
                    alarm_item.id = Some(alarm.alarm_id.unwrap_or(0).to_string());
                    alarm_item.message = alarm.alarm_name.clone();
                    alarm_item.alarm_time = alarm
                        .raise_time
                        .and_then(|ms| DateTime::from_timestamp_millis(ms));

                    emit(&tx, CollectEvent::Document(Document::Alarm(alarm_item))).await?;
                }
            }

            let mut device_item = scope.device_item();
            device_item.plant_id = Some(station.code.clone());
            device_item.plant_name = Some(station.name.clone());
            device_item.latitude = latitude;
            device_item.longitude = longitude;
            device_item.location = location.clone();
            device_item.id = Some(device_id.to_string());
            device_item.sn = Some(device_sn.clone());
            device_item.name = device.name.clone();

            if let Some(status) = device_status {
                let label = match status {
                    0 => huawei::STATUS_OFFLINE,
                    1 => huawei::STATUS_ONLINE,
                    2 => huawei::STATUS_ALARM,
                    _ => "",
                };
                if !label.is_empty() {
                    device_item.status = Some(label.to_string());
                    rollup.observe(label);
                }
            }

            if device.type_id == Some(INVERTER_TYPE_ID) {
                device_item.total_power_generation = device_realtime
                    .get(&device_id)
                    .and_then(|r| r.data_item_map.as_ref())
                    .and_then(|d| d.total_energy);
                device_item.daily_power_generation = device_daily
                    .get(&device_id)
                    .and_then(|r| r.data_item_map.as_ref())
                    .and_then(|d| d.product_power);
                device_item.monthly_power_generation = device_monthly
                    .get(&device_id)
                    .and_then(|r| r.data_item_map.as_ref())
                    .and_then(|d| d.product_power);
                device_item.yearly_power_generation =
                    Some(device_yearly_power.get(&device_id).copied().unwrap_or(0.0));

                if let Some(power) = device_realtime
                    .get(&device_id)
                    .and_then(|r| r.data_item_map.as_ref())
                    .and_then(|d| d.active_power)
                {
                    current_power += power;
                }
            }

            emit(&tx, CollectEvent::Document(Document::Device(device_item))).await?;
        }

        let daily_production = daily_by_code
            .get(&station.code)
            .and_then(|d| d.data_item_map.as_ref())
            .and_then(|d| d.inverter_power)
            .unwrap_or(0.0);

        let (monthly_production, monthly_co2) = monthly_by_code
            .get(&station.code)
            .and_then(|d| d.data_item_map.as_ref())
            .map(|d| {
                (
                    d.inverter_power.unwrap_or(0.0),
                    // Reported in tonnes; the document carries kilograms.
                    d.reduction_total_co2.unwrap_or(0.0) * 1000.0,
                )
            })
            .unwrap_or((0.0, 0.0));

        let realtime = realtime_by_code
            .get(&station.code)
            .and_then(|r| r.data.as_ref());
        let mut total_production = realtime.and_then(|d| d.total_power).unwrap_or(0.0);
        let total_saving_price = realtime.and_then(|d| d.total_income).unwrap_or(0.0);

        let yearly_production = yearly_power_by_code
            .get(&station.code)
            .copied()
            .unwrap_or(0.0);
        // A raw lifetime total below the accumulated yearly sum is a vendor
        // reporting artifact; prefer the accumulated number.
        if total_production < yearly_production {
            total_production = total_power_by_code
                .get(&station.code)
                .copied()
                .unwrap_or(0.0);
        }

        let mut plant_item = scope.plant_item();
        plant_item.id = Some(station.code.clone());
        plant_item.name = Some(station.name.clone());
        plant_item.latitude = latitude;
        plant_item.longitude = longitude;
        plant_item.location = location;
        plant_item.location_address = station.address.clone();
        plant_item.installed_capacity = Some(station.capacity.unwrap_or(0.0));
        plant_item.total_co2 = Some(total_co2_by_code.get(&station.code).copied().unwrap_or(0.0));
        plant_item.monthly_co2 = Some(monthly_co2);
        plant_item.total_saving_price = Some(total_saving_price);
        plant_item.currency = Some(huawei::CURRENCY_USD.to_string());
        plant_item.current_power = Some(current_power);
        plant_item.daily_production = Some(daily_production);
        plant_item.monthly_production = Some(monthly_production);
        plant_item.yearly_production = Some(yearly_production);
        plant_item.total_production = Some(total_production);
        plant_item.plant_status = Some(rollup.finish());

        emit(&tx, CollectEvent::Document(Document::Plant(plant_item))).await?;
        info!(
            username = %credential.username,
            station_code = %station.code,
            count = i + 1,
            total = station_size,
            "huawei plant document collected"
        );
    }

    Ok(())
}

fn collected_on(item: &HistoricalPlantData, now: DateTime<Utc>, format: &str) -> bool {
    item.collect_time
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.format(format).to_string() == now.format(format).to_string())
        .unwrap_or(false)
}

fn device_collected_on(item: &HistoricalDeviceData, now: DateTime<Utc>, format: &str) -> bool {
    item.collect_time
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.format(format).to_string() == now.format(format).to_string())
        .unwrap_or(false)
}

/// Keeps at most one alarm per name, preferring the newest raise time.
pub(crate) fn merge_alarm(existing: &mut Vec<DeviceAlarm>, alarm: DeviceAlarm) {
    for slot in existing.iter_mut() {
        if slot.alarm_name == alarm.alarm_name {
            if slot.raise_time.unwrap_or(0) < alarm.raise_time.unwrap_or(0) {
                *slot = alarm;
            }
            return;
        }
    }
    existing.push(alarm);
}


#[cfg(test)]
mod tests {
    use super::*;

    fn alarm(name: &str, raise_time: i64) -> DeviceAlarm {
        DeviceAlarm {
            plant_code: None,
            plant_name: None,
            device_sn: Some("SN1".to_string()),
            device_name: None,
            device_type_id: None,
            alarm_id: Some(1),
            alarm_name: Some(name.to_string()),
            alarm_cause: None,
            raise_time: Some(raise_time),
            level: None,
            status: None,
        }
    }

    #[test]
    fn join_batches_splits_and_joins() {
        let codes: Vec<String> = (0..250).map(|i| format!("NE={i}")).collect();
        let batches = join_batches(codes, CODE_BATCH_SIZE);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].split(',').count(), 100);
        assert_eq!(batches[2].split(',').count(), 50);

        assert_eq!(join_batches(Vec::new(), CODE_BATCH_SIZE), vec![String::new()]);
    }

    #[test]
    fn duplicate_alarms_keep_the_newest_raise_time() {
        let mut alarms = Vec::new();
        merge_alarm(&mut alarms, alarm("String Abnormal", 100));
        merge_alarm(&mut alarms, alarm("String Abnormal", 300));
        merge_alarm(&mut alarms, alarm("String Abnormal", 200));
        merge_alarm(&mut alarms, alarm("Grid Fault", 50));

        assert_eq!(alarms.len(), 2);
        assert_eq!(alarms[0].raise_time, Some(300));
        assert_eq!(alarms[1].alarm_name.as_deref(), Some("Grid Fault"));
    }
}
