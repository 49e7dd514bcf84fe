// SPDX-License-Identifier: AGPL-3.0-or-later
//! Solarman (INVT) collector.
//!
//! One credential may span several organizations: each gets its own client
//! holding that organization's business token, and the per-organization
//! walks run concurrently. Documents still flow through the single
//! consumer, so emission order within an organization mirrors traversal.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Datelike, Utc};
use solarwatch_adapters::solarman::{self, SolarmanClient, TimeType};
use solarwatch_data::models::{SiteRegionMapping, SolarmanCredential, VENDOR_TYPE_INVT};
use solarwatch_data::SolarStore;
use tracing::{info, warn};

use crate::collector::{drain, index_documents, join_producer, DocScope};
use crate::event::{
    emit, event_channel, rollup_status, site_item_of, CollectEvent, Document, EventSender,
};
use crate::plant_name::parse_plant_id;

pub struct SolarmanCollector {
    vendor_type: String,
    solar: Arc<dyn SolarStore>,
    site_regions: Arc<Vec<SiteRegionMapping>>,
}

impl SolarmanCollector {
    pub fn new(solar: Arc<dyn SolarStore>, site_regions: Vec<SiteRegionMapping>) -> Self {
        Self {
            vendor_type: VENDOR_TYPE_INVT.to_uppercase(),
            solar,
            site_regions: Arc::new(site_regions),
        }
    }

    pub async fn execute(
        &self,
        now: DateTime<Utc>,
        credential: &SolarmanCredential,
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
        let finished = join_producer("solarman", producer).await;

        let site_documents = drained
            .documents
            .iter()
            .filter_map(|doc| match doc {
                Document::Plant(plant) => Some(site_item_of(plant, &credential.owner)),
                _ => None,
            })
            .collect();

        index_documents(&self.solar, "solarman", now, &drained.documents, site_documents).await?;

        if !finished {
            anyhow::bail!("solarman collect aborted for {}", credential.username);
        }
        Ok(())
    }
}

async fn collect(
    vendor_type: String,
    site_regions: Arc<Vec<SiteRegionMapping>>,
    credential: SolarmanCredential,
    now: DateTime<Utc>,
    tx: EventSender,
) -> anyhow::Result<()> {
    let client = SolarmanClient::new(
        &credential.username,
        &credential.password,
        &credential.app_id,
        &credential.app_secret,
    )?;

    let basic_token = client.basic_token().await.context("get basic token")?;
    client.set_access_token(&basic_token);

    let user_info = client.user_info().await.context("get user info")?;
    if user_info.org_info_list.is_empty() {
        anyhow::bail!("no organizations for {}", credential.username);
    }

    let mut workers = tokio::task::JoinSet::new();
    for company in user_info.org_info_list {
        let company_id = company.company_id.unwrap_or(0);
        workers.spawn(collect_company(
            vendor_type.clone(),
            site_regions.clone(),
            credential.clone(),
            basic_token.clone(),
            company_id,
            now,
            tx.clone(),
        ));
    }
    drop(tx);

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "solarman organization walk failed"),
            Err(join_err) => warn!(%join_err, "solarman organization walk panicked"),
        }
    }

    Ok(())
}

async fn collect_company(
    vendor_type: String,
    site_regions: Arc<Vec<SiteRegionMapping>>,
    credential: SolarmanCredential,
    basic_token: String,
    company_id: i64,
    now: DateTime<Utc>,
    tx: EventSender,
) -> anyhow::Result<()> {
    let client = SolarmanClient::new(
        &credential.username,
        &credential.password,
        &credential.app_id,
        &credential.app_secret,
    )?;
    client.set_access_token(&basic_token);

    let business_token = client
        .business_token(company_id)
        .await
        .with_context(|| format!("get business token for org {company_id}"))?;
    client.set_access_token(&business_token);

    let begin_of_day = now
        .date_naive()
        .and_hms_opt(6, 0, 0)
        .map(|t| t.and_utc().timestamp())
        .unwrap_or_default();
    let year_start = now
        .date_naive()
        .with_year(2015)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc().timestamp())
        .unwrap_or_default();

    let plants = client.plant_list().await.context("get plant list")?;
    let plant_size = plants.len();

    for (i, station) in plants.into_iter().enumerate() {
        let station_id = station.id.unwrap_or(0);
        let identity = parse_plant_id(station.name.as_deref().unwrap_or_default());
        let scope = DocScope::new(
            now,
            &vendor_type,
            &credential.owner,
            identity,
            &site_regions,
        );

        let mut plant_item = scope.plant_item();
        plant_item.id = Some(station_id.to_string());
        plant_item.name = station.name.clone();
        plant_item.latitude = station.location_lat;
        plant_item.longitude = station.location_lng;
        plant_item.location_address = station.location_address.clone();
        plant_item.installed_capacity = station.installed_capacity;
        if let (Some(lat), Some(lon)) = (plant_item.latitude, plant_item.longitude) {
            plant_item.location = Some(format!("{lat:.6},{lon:.6}"));
        }
        if let Some(created) = station.created_date {
            plant_item.created_date = DateTime::from_timestamp(created as i64, 0);
        }

        let mut merged_electric_price = None;
        let mut cumulative_production: Option<f64> = None;
        let mut yearly_sum: Option<f64> = None;

        match client.plant_base_info(station_id).await {
            Ok(info) => {
                plant_item.currency = info.currency;
                merged_electric_price = info.merge_electric_price;
            }
            Err(err) => warn!(station_id, %err, "failed to get plant base info"),
        }

        match client.plant_realtime_data(station_id).await {
            Ok(realtime) => {
                let generation_power = realtime.generation_power.unwrap_or(0.0);
                plant_item.current_power = Some(generation_power / 1000.0);
            }
            Err(err) => warn!(station_id, %err, "failed to get plant realtime data"),
        }

        match client
            .historical_plant_data(station_id, TimeType::Day, now.timestamp(), now.timestamp())
            .await
        {
            Ok(resp) => {
                if let Some(item) = resp.station_data_items.first() {
                    plant_item.daily_production = item.generation_value;
                }
            }
            Err(err) => warn!(station_id, %err, "failed to get daily plant history"),
        }

        match client
            .historical_plant_data(station_id, TimeType::Month, now.timestamp(), now.timestamp())
            .await
        {
            Ok(resp) => {
                if let Some(item) = resp.station_data_items.first() {
                    plant_item.monthly_production = item.generation_value;
                }
            }
            Err(err) => warn!(station_id, %err, "failed to get monthly plant history"),
        }

        match client
            .historical_plant_data(station_id, TimeType::Year, year_start, now.timestamp())
            .await
        {
            Ok(resp) => {
                for item in &resp.station_data_items {
                    if item.year == Some(now.year()) {
                        plant_item.yearly_production = item.generation_value;
                    }
                    yearly_sum = Some(
                        yearly_sum.unwrap_or(0.0) + item.generation_value.unwrap_or(0.0),
                    );
                }
            }
            Err(err) => warn!(station_id, %err, "failed to get yearly plant history"),
        }

        let devices = match client.plant_device_list(station_id).await {
            Ok(devices) => devices,
            Err(err) => {
                warn!(station_id, %err, "failed to get plant device list");
                continue;
            }
        };

        let device_size = devices.len();
        let mut device_statuses = Vec::new();
        for (j, device) in devices.into_iter().enumerate() {
            let device_sn = device.device_sn.clone().unwrap_or_default();
            let device_id = device.device_id.unwrap_or(0);

            let mut device_item = scope.device_item();
            device_item.plant_id = Some(station_id.to_string());
            device_item.plant_name = station.name.clone();
            device_item.latitude = plant_item.latitude;
            device_item.longitude = plant_item.longitude;
            device_item.location = plant_item.location.clone();
            device_item.id = Some(device_id.to_string());
            device_item.sn = device.device_sn.clone();
            device_item.name = device.device_sn.clone();
            device_item.device_type = device.device_type.clone();

            if let Ok(realtime) = client.device_realtime_data(&device_sn).await {
                for point in &realtime.data_list {
                    if point.key.as_deref() == Some(solarman::DATA_LIST_KEY_CUMULATIVE_PRODUCTION) {
                        if let Some(value) = point.value.as_deref().and_then(|v| v.parse::<f64>().ok())
                        {
                            cumulative_production =
                                Some(cumulative_production.unwrap_or(0.0) + value);
                        }
                    }
                }
            }

            device_item.daily_power_generation =
                device_generation(&client, &device_sn, TimeType::Day, now).await;
            device_item.monthly_power_generation =
                device_generation(&client, &device_sn, TimeType::Month, now).await;
            device_item.yearly_power_generation =
                device_generation(&client, &device_sn, TimeType::Year, now).await;

            if let Some(collected) = device.collection_time {
                device_item.last_update_time = DateTime::from_timestamp(collected, 0);
            }

            if let Some(connect_status) = device.connect_status {
                match connect_status {
                    0 => device_item.status = Some(solarman::DEVICE_STATUS_OFFLINE.to_string()),
                    1 => device_item.status = Some(solarman::DEVICE_STATUS_ONLINE.to_string()),
                    2 => {
                        device_item.status = Some(solarman::DEVICE_STATUS_FAILURE.to_string());

                        match client
                            .device_alert_list(&device_sn, begin_of_day, now.timestamp())
                            .await
                        {
                            Ok(alerts) => {
                                for alert in dedup_alerts(alerts).into_values() {
                                    let mut alarm_item = scope.alarm_item();
                                    alarm_item.plant_id = Some(station_id.to_string());
                                    alarm_item.plant_name = station.name.clone();
                                    alarm_item.latitude = plant_item.latitude;
                                    alarm_item.longitude = plant_item.longitude;
                                    alarm_item.location = plant_item.location.clone();
                                    alarm_item.device_id = Some(device_id.to_string());
                                    alarm_item.device_sn = device.device_sn.clone();
                                    alarm_item.device_name = device.device_sn.clone();
                                    alarm_item.device_type = device.device_type.clone();
                                    alarm_item.device_status = device_item.status.clone();
                                    alarm_item.id =
                                        Some(alert.alert_id.unwrap_or(0).to_string());
                                    alarm_item.message = alert.alert_name_in_paas.clone();
                                    alarm_item.alarm_time = alert
                                        .alert_time
                                        .and_then(|t| DateTime::from_timestamp(t, 0));

                                    emit(&tx, CollectEvent::Document(Document::Alarm(alarm_item)))
                                        .await?;
                                }
                            }
                            Err(err) => {
                                warn!(station_id, device_sn, %err, "failed to get device alert list")
                            }
                        }
                    }
                    _ => {}
                }
            }

            if let Some(status) = &device_item.status {
                device_statuses.push(status.clone());
            }

            emit(&tx, CollectEvent::Document(Document::Device(device_item))).await?;
            info!(
                username = %credential.username,
                company_id,
                station_id,
                device_count = format!("{}/{}", j + 1, device_size),
                "solarman device item added"
            );
        }

        plant_item.plant_status = Some(rollup_status(&device_statuses).to_string());
        plant_item.total_production = cumulative_production;
        if plant_item.total_production.unwrap_or(0.0) < plant_item.yearly_production.unwrap_or(0.0)
        {
            plant_item.total_production = plant_item.yearly_production;
        }
        plant_item.total_saving_price = Some(
            merged_electric_price.unwrap_or(0.0) * cumulative_production.unwrap_or(0.0),
        );

        emit(&tx, CollectEvent::Document(Document::Plant(plant_item))).await?;
        info!(
            username = %credential.username,
            company_id,
            plant_count = format!("{}/{}", i + 1, plant_size),
            station_id,
            "solarman plant item added"
        );
    }

    Ok(())
}

/// Sum of `generation` data points over the device history at the given
/// granularity; `None` when the endpoint fails or reports nothing.
async fn device_generation(
    client: &SolarmanClient,
    device_sn: &str,
    time_type: TimeType,
    now: DateTime<Utc>,
) -> Option<f64> {
    let resp = match client
        .historical_device_data(device_sn, time_type, now.timestamp(), now.timestamp())
        .await
    {
        Ok(resp) => resp,
        Err(err) => {
            warn!(device_sn, %err, "failed to get device history");
            return None;
        }
    };

    let mut sum = None;
    for param in &resp.param_data_list {
        for point in &param.data_list {
            if point.key.as_deref() == Some(solarman::DATA_LIST_KEY_GENERATION) {
                if let Some(value) = point.value.as_deref().and_then(|v| v.parse::<f64>().ok()) {
                    sum = Some(sum.unwrap_or(0.0) + value);
                }
            }
        }
    }
    sum
}

/// Keeps one alert per name, preferring the largest alert time.
fn dedup_alerts(alerts: Vec<solarman::DeviceAlert>) -> BTreeMap<String, solarman::DeviceAlert> {
    let mut by_name: BTreeMap<String, solarman::DeviceAlert> = BTreeMap::new();
    for alert in alerts {
        let Some(name) = alert.alert_name_in_paas.clone() else { continue };
        match by_name.get(&name) {
            Some(existing) if existing.alert_time.unwrap_or(0) >= alert.alert_time.unwrap_or(0) => {}
            _ => {
                by_name.insert(name, alert);
            }
        }
    }
    by_name
}


#[cfg(test)]
mod tests {
    use super::*;

    fn alert(name: &str, time: i64) -> solarman::DeviceAlert {
        solarman::DeviceAlert {
            alert_id: Some(1),
            alert_name_in_paas: Some(name.to_string()),
            alert_time: Some(time),
        }
    }

    #[test]
    fn duplicate_alerts_keep_the_latest_instance() {
        let deduped = dedup_alerts(vec![
            alert("Grid Overvoltage", 100),
            alert("Grid Overvoltage", 300),
            alert("Grid Overvoltage", 200),
            alert("Fan Fault", 50),
        ]);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped["Grid Overvoltage"].alert_time, Some(300));
        assert_eq!(deduped["Fan Fault"].alert_time, Some(50));
    }

    #[test]
    fn alerts_without_names_are_dropped() {
        let nameless = solarman::DeviceAlert {
            alert_id: Some(9),
            alert_name_in_paas: None,
            alert_time: Some(10),
        };
        assert!(dedup_alerts(vec![nameless]).is_empty());
    }
}
