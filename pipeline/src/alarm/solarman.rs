// SPDX-License-Identifier: AGPL-3.0-or-later
//! Solarman (INVT) alarm evaluator.
//!
//! Connect status 0 raises a Disconnect record, 2 raises one record per
//! alert name in today's window (newest instance wins), and 1 scans the
//! device's key prefix to clear and delete residual records.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use solarwatch_adapters::solarman::{DeviceAlert, SolarmanClient};
use solarwatch_data::models::{SnmpAlarmItem, SolarmanCredential};
use solarwatch_data::snmp::{CLEAR_SEVERITY, MAJOR_SEVERITY};
use solarwatch_data::{KeyValueStore, SolarStore, TrapSink};
use tracing::{info, warn};

use crate::alarm::{dashed, index_alarm_documents};

const VENDOR_LABEL: &str = "INVT-Ipanda";

pub struct SolarmanAlarm {
    vendor_type: String,
    solar: Arc<dyn SolarStore>,
    snmp: Arc<dyn TrapSink>,
    tracker: Arc<dyn KeyValueStore>,
}

impl SolarmanAlarm {
    pub fn new(
        solar: Arc<dyn SolarStore>,
        snmp: Arc<dyn TrapSink>,
        tracker: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            vendor_type: VENDOR_LABEL.to_string(),
            solar,
            snmp,
            tracker,
        }
    }

    pub async fn run(&self, credential: &SolarmanCredential) -> anyhow::Result<()> {
        let now = Utc::now();
        let begin_of_day = now
            .date_naive()
            .and_hms_opt(6, 0, 0)
            .map(|t| t.and_utc().timestamp())
            .unwrap_or_default();

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

        let mut documents = Vec::new();
        let company_total = user_info.org_info_list.len();
        for (c, company) in user_info.org_info_list.iter().enumerate() {
            let company_id = company.company_id.unwrap_or(0);
            info!(
                username = %credential.username,
                company_count = format!("{}/{}", c + 1, company_total),
                "solarman alarm walk: organization"
            );

            let business_token = client
                .business_token(company_id)
                .await
                .context("get business token")?;
            client.set_access_token(&business_token);

            let plants = client.plant_list().await.context("get plant list")?;
            for plant in plants {
                let station_id = plant.id.unwrap_or(0);
                let station_name = plant.name.clone().unwrap_or_default();

                let devices = match client.plant_device_list(station_id).await {
                    Ok(devices) => devices,
                    Err(err) => {
                        warn!(station_id, %err, "failed to get plant device list");
                        continue;
                    }
                };

                for device in devices {
                    let Some(connect_status) = device.connect_status else { continue };
                    let device_sn = device.device_sn.clone().unwrap_or_default();
                    let device_id = device.device_id.unwrap_or(0);
                    let device_type = device.device_type.clone().unwrap_or_default();
                    let collection_time = device.collection_time.unwrap_or(0).to_string();

                    let alerts = if connect_status == 2 {
                        match client
                            .device_alert_list(&device_sn, begin_of_day, now.timestamp())
                            .await
                        {
                            Ok(alerts) => alerts,
                            Err(err) => {
                                warn!(station_id, device_sn, %err, "failed to get device alert list");
                                continue;
                            }
                        }
                    } else {
                        Vec::new()
                    };

                    self.evaluate_device(
                        &mut documents,
                        station_id,
                        &station_name,
                        &device_type,
                        &device_sn,
                        device_id,
                        &collection_time,
                        connect_status,
                        &alerts,
                    )
                    .await?;
                }
            }
        }

        index_alarm_documents(&self.solar, "solarman", now, documents).await
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn evaluate_device(
        &self,
        documents: &mut Vec<SnmpAlarmItem>,
        station_id: i64,
        station_name: &str,
        device_type: &str,
        device_sn: &str,
        device_id: i64,
        collection_time: &str,
        connect_status: i32,
        alerts: &[DeviceAlert],
    ) -> anyhow::Result<()> {
        let name = format!("{station_name}-{device_sn}");
        let description = format!("{},{station_id},{device_sn},{device_id}", self.vendor_type);

        match connect_status {
            0 => {
                let key = format!(
                    "{},{station_id},{device_type},{device_sn},{device_id},Disconnect",
                    self.vendor_type
                );
                let value = format!("{station_name},{collection_time}");
                self.tracker.mark_active(&key, &value).await?;

                let alert = dashed(&format!("{device_type}-Disconnect"));
                documents.push(SnmpAlarmItem::new(
                    &self.vendor_type,
                    &name,
                    &alert,
                    &description,
                    MAJOR_SEVERITY,
                    collection_time,
                ));
                self.snmp
                    .send_trap(&name, &alert, &description, MAJOR_SEVERITY, collection_time)
                    .await;
            }
            1 => {
                let pattern = format!(
                    "{},{station_id},{device_type},{device_sn},{device_id},*",
                    self.vendor_type
                );
                for key in self.tracker.scan(&pattern).await? {
                    if let Some(value) = self.tracker.get(&key).await? {
                        if !value.trim().is_empty() {
                            let key_parts: Vec<&str> = key.split(',').collect();
                            let value_parts: Vec<&str> = value.split(',').collect();
                            let stored_time = value_parts.get(1).copied().unwrap_or_default();

                            let alert = dashed(&format!(
                                "{device_type}-{}",
                                key_parts.get(5).copied().unwrap_or_default()
                            ));
                            documents.push(SnmpAlarmItem::new(
                                &self.vendor_type,
                                &name,
                                &alert,
                                &description,
                                CLEAR_SEVERITY,
                                stored_time,
                            ));
                            self.snmp
                                .send_trap(&name, &alert, &description, CLEAR_SEVERITY, stored_time)
                                .await;
                        }
                    }

                    self.tracker.forget(&key).await?;
                }
            }
            2 => {
                for alert in dedup_alerts(alerts).into_values() {
                    let (Some(alert_name), Some(alert_time)) =
                        (alert.alert_name_in_paas.clone(), alert.alert_time)
                    else {
                        continue;
                    };
                    let alert_time = alert_time.to_string();

                    let key = format!(
                        "{},{station_id},{device_type},{device_sn},{device_id},{alert_name}",
                        self.vendor_type
                    );
                    let value = format!("{station_name},{alert_time}");
                    self.tracker.mark_active(&key, &value).await?;

                    let trap_alert = dashed(&format!("{device_type}-{alert_name}"));
                    documents.push(SnmpAlarmItem::new(
                        &self.vendor_type,
                        &name,
                        &trap_alert,
                        &description,
                        MAJOR_SEVERITY,
                        &alert_time,
                    ));
                    self.snmp
                        .send_trap(&name, &trap_alert, &description, MAJOR_SEVERITY, &alert_time)
                        .await;
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// Newest instance per alert name wins.
fn dedup_alerts(alerts: &[DeviceAlert]) -> BTreeMap<String, DeviceAlert> {
    let mut by_name: BTreeMap<String, DeviceAlert> = BTreeMap::new();
    for alert in alerts {
        let Some(name) = alert.alert_name_in_paas.clone() else { continue };
        match by_name.get(&name) {
            Some(existing) if existing.alert_time.unwrap_or(0) >= alert.alert_time.unwrap_or(0) => {}
            _ => {
                by_name.insert(name, alert.clone());
            }
        }
    }
    by_name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSolarStore;
    use solarwatch_data::{MemoryStore, RecordingTrapSink};

    fn evaluator() -> (SolarmanAlarm, Arc<RecordingTrapSink>, Arc<MemoryStore>) {
        let sink = Arc::new(RecordingTrapSink::new());
        let store = Arc::new(MemoryStore::new());
        let alarm = SolarmanAlarm::new(
            Arc::new(RecordingSolarStore::new()),
            sink.clone(),
            store.clone(),
        );
        (alarm, sink, store)
    }

    fn vendor_alert(name: &str, time: i64) -> DeviceAlert {
        DeviceAlert {
            alert_id: Some(19),
            alert_name_in_paas: Some(name.to_string()),
            alert_time: Some(time),
        }
    }

    #[tokio::test]
    async fn duplicate_alerts_keep_only_the_newest_instance() {
        let (alarm, sink, store) = evaluator();
        let mut documents = Vec::new();

        alarm
            .evaluate_device(
                &mut documents,
                7,
                "STN007-PEA-3P-40kW",
                "INVERTER",
                "SN9",
                900,
                "1690100000",
                2,
                &[
                    vendor_alert("Grid Overvoltage", 100),
                    vendor_alert("Grid Overvoltage", 300),
                ],
            )
            .await
            .unwrap();

        // One record and one document, carrying the t2 instance.
        assert_eq!(
            store
                .get("INVT-Ipanda,7,INVERTER,SN9,900,Grid Overvoltage")
                .await
                .unwrap()
                .as_deref(),
            Some("STN007-PEA-3P-40kW,300")
        );
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].last_update_time, "300");

        let traps = sink.take().await;
        assert_eq!(traps.len(), 1);
        assert_eq!(traps[0].severity, MAJOR_SEVERITY);
        assert_eq!(traps[0].device_name, "STN007-PEA-3P-40kW-SN9");
        assert_eq!(traps[0].alert_name, "INVERTER-Grid-Overvoltage");
        assert_eq!(traps[0].description, "INVT-Ipanda,7,SN9,900");
    }

    #[tokio::test]
    async fn reconnect_clears_and_deletes_the_disconnect_record() {
        let (alarm, sink, store) = evaluator();
        let mut documents = Vec::new();

        alarm
            .evaluate_device(
                &mut documents,
                7,
                "STN007-PEA-3P-40kW",
                "INVERTER",
                "SN9",
                900,
                "1690100000",
                0,
                &[],
            )
            .await
            .unwrap();

        assert!(store
            .get("INVT-Ipanda,7,INVERTER,SN9,900,Disconnect")
            .await
            .unwrap()
            .is_some());
        assert_eq!(sink.take().await.len(), 1);

        alarm
            .evaluate_device(
                &mut documents,
                7,
                "STN007-PEA-3P-40kW",
                "INVERTER",
                "SN9",
                900,
                "1690200000",
                1,
                &[],
            )
            .await
            .unwrap();

        let cleared = sink.take().await;
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].severity, CLEAR_SEVERITY);
        assert_eq!(cleared[0].alert_name, "INVERTER-Disconnect");
        assert_eq!(cleared[0].last_update_time, "1690100000");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_connect_status_is_ignored() {
        let (alarm, sink, store) = evaluator();
        let mut documents = Vec::new();

        alarm
            .evaluate_device(
                &mut documents,
                7,
                "STN007-PEA-3P-40kW",
                "INVERTER",
                "SN9",
                900,
                "1690100000",
                9,
                &[],
            )
            .await
            .unwrap();

        assert!(documents.is_empty());
        assert!(sink.take().await.is_empty());
        assert!(store.is_empty().await);
    }
}
