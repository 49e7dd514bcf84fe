// SPDX-License-Identifier: AGPL-3.0-or-later
//! Growatt alarm evaluator.
//!
//! One-shot compare per device: Online with a tracker record means the
//! fault cleared; Disconnect writes a fixed `0,Disconnect` record; any
//! other state records the newest vendor alarm. The walk sleeps ten
//! seconds between plants to respect the vendor rate limit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use solarwatch_adapters::growatt::{self, GrowattClient};
use solarwatch_data::models::{GrowattCredential, SnmpAlarmItem, VENDOR_TYPE_GROWATT};
use solarwatch_data::snmp::{CLEAR_SEVERITY, MAJOR_SEVERITY};
use solarwatch_data::{KeyValueStore, SolarStore, TrapSink};
use tracing::{info, warn};

use crate::alarm::index_alarm_documents;

const PLANT_PACING: Duration = Duration::from_secs(10);

/// Inputs of the one-shot compare for a single device.
pub(crate) struct DeviceObservation {
    pub plant_id: i64,
    pub plant_name: String,
    pub device_sn: String,
    pub device_model: String,
    pub device_type: String,
    pub last_update_time: String,
    pub status_label: String,
    /// Newest vendor alarm (code, message), fetched only for fault states.
    pub latest_alarm: Option<(i64, String)>,
}

pub struct GrowattAlarm {
    vendor_type: String,
    solar: Arc<dyn SolarStore>,
    snmp: Arc<dyn TrapSink>,
    tracker: Arc<dyn KeyValueStore>,
}

impl GrowattAlarm {
    pub fn new(
        solar: Arc<dyn SolarStore>,
        snmp: Arc<dyn TrapSink>,
        tracker: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            vendor_type: VENDOR_TYPE_GROWATT.to_uppercase(),
            solar,
            snmp,
            tracker,
        }
    }

    pub async fn run(&self, credential: &GrowattCredential) -> anyhow::Result<()> {
        let now = Utc::now();
        let client = GrowattClient::new(&credential.username, &credential.token)?;
        let plants = client.plant_list().await.context("get plant list")?;
        info!(username = %credential.username, count = plants.len(), "growatt alarm walk started");

        let mut documents = Vec::new();
        for plant in plants {
            let plant_id = plant.plant_id.unwrap_or(0);
            let plant_name = plant.name.clone().unwrap_or_default();

            let devices = match client.plant_device_list(plant_id).await {
                Ok(devices) => devices,
                Err(err) => {
                    warn!(plant_id, %err, "failed to get plant device list");
                    continue;
                }
            };

            for device in devices {
                let status_label =
                    growatt::inverter_status_label(device.status.unwrap_or(0)).to_string();

                let latest_alarm = if status_label != "Online" && status_label != "Disconnect" {
                    match client
                        .inverter_alert_list(device.device_sn.as_deref().unwrap_or_default())
                        .await
                    {
                        Ok(alarms) => alarms.into_iter().next().map(|a| {
                            (a.alarm_code.unwrap_or(0), a.alarm_message.unwrap_or_default())
                        }),
                        Err(err) => {
                            warn!(plant_id, %err, "failed to get inverter alert list");
                            None
                        }
                    }
                } else {
                    None
                };

                let observation = DeviceObservation {
                    plant_id,
                    plant_name: plant_name.clone(),
                    device_sn: device.device_sn.clone().unwrap_or_default(),
                    device_model: device.model.clone().unwrap_or_default(),
                    device_type: growatt::parse_device_type(device.device_type.unwrap_or(0))
                        .to_string(),
                    last_update_time: device.last_update_time.clone().unwrap_or_default(),
                    status_label,
                    latest_alarm,
                };

                if let Some(document) = self.evaluate_device(&observation).await? {
                    documents.push(document);
                }
            }

            tokio::time::sleep(PLANT_PACING).await;
        }

        index_alarm_documents(&self.solar, "growatt", now, documents).await
    }

    pub(crate) async fn evaluate_device(
        &self,
        obs: &DeviceObservation,
    ) -> anyhow::Result<Option<SnmpAlarmItem>> {
        let key = format!(
            "{},{},{},{}",
            obs.plant_id, obs.plant_name, obs.device_type, obs.device_sn
        );
        let device_name = format!("{}_{}_{}", obs.plant_name, obs.plant_id, obs.device_sn);

        match obs.status_label.as_str() {
            "Online" => {
                let Some(value) = self.tracker.get(&key).await? else {
                    return Ok(None);
                };
                if value.trim().is_empty() {
                    self.tracker.forget(&key).await?;
                    return Ok(None);
                }

                let parts: Vec<&str> = value.split(',').collect();
                let code = parts.first().copied().unwrap_or_default();
                let message = parts.get(1).copied().unwrap_or_default();

                let alarm_name = format!("Growatt,{},{}", message, obs.device_model);
                let payload = format!("{alarm_name}-Error-{code}");

                let document = SnmpAlarmItem::new(
                    &self.vendor_type,
                    &device_name,
                    &alarm_name,
                    &payload,
                    CLEAR_SEVERITY,
                    &obs.last_update_time,
                );
                self.snmp
                    .send_trap(
                        &device_name,
                        &alarm_name,
                        &payload,
                        CLEAR_SEVERITY,
                        &obs.last_update_time,
                    )
                    .await;
                self.tracker.forget(&key).await?;

                Ok(Some(document))
            }
            "Disconnect" => {
                self.tracker.mark_active(&key, "0,Disconnect").await?;

                let alarm_name = format!("Growatt,Disconnect,{}", obs.device_model);
                let payload = format!("{}-Error-0", obs.device_type);

                let document = SnmpAlarmItem::new(
                    &self.vendor_type,
                    &device_name,
                    &alarm_name,
                    &payload,
                    MAJOR_SEVERITY,
                    &obs.last_update_time,
                );
                self.snmp
                    .send_trap(
                        &device_name,
                        &alarm_name,
                        &payload,
                        MAJOR_SEVERITY,
                        &obs.last_update_time,
                    )
                    .await;

                Ok(Some(document))
            }
            _ => {
                let Some((code, message)) = &obs.latest_alarm else {
                    return Ok(None);
                };

                self.tracker
                    .mark_active(&key, &format!("{code},{message}"))
                    .await?;

                let alarm_name = format!("Growatt,{},{}", message, obs.device_model);
                let payload = format!("{}-Error-{}", obs.device_type, code);

                let document = SnmpAlarmItem::new(
                    &self.vendor_type,
                    &device_name,
                    &alarm_name,
                    &payload,
                    MAJOR_SEVERITY,
                    &obs.last_update_time,
                );
                self.snmp
                    .send_trap(
                        &device_name,
                        &alarm_name,
                        &payload,
                        MAJOR_SEVERITY,
                        &obs.last_update_time,
                    )
                    .await;

                Ok(Some(document))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSolarStore;
    use solarwatch_data::{MemoryStore, RecordingTrapSink};

    fn evaluator() -> (GrowattAlarm, Arc<RecordingTrapSink>, Arc<MemoryStore>) {
        let sink = Arc::new(RecordingTrapSink::new());
        let store = Arc::new(MemoryStore::new());
        let alarm = GrowattAlarm::new(
            Arc::new(RecordingSolarStore::new()),
            sink.clone(),
            store.clone(),
        );
        (alarm, sink, store)
    }

    fn observation(status: &str, latest_alarm: Option<(i64, String)>) -> DeviceObservation {
        DeviceObservation {
            plant_id: 42,
            plant_name: "PlantA".to_string(),
            device_sn: "SN123".to_string(),
            device_model: "MAX-50KTL".to_string(),
            device_type: "INVERTER".to_string(),
            last_update_time: "2026-08-02 10:00:00".to_string(),
            status_label: status.to_string(),
            latest_alarm,
        }
    }

    #[tokio::test]
    async fn disconnect_then_online_raises_and_clears_once() {
        let (alarm, sink, store) = evaluator();

        // Run 1: the device disconnects.
        let document = alarm
            .evaluate_device(&observation("Disconnect", None))
            .await
            .unwrap()
            .expect("disconnect emits a document");
        assert_eq!(document.severity, MAJOR_SEVERITY);
        assert_eq!(
            store.get("42,PlantA,INVERTER,SN123").await.unwrap().as_deref(),
            Some("0,Disconnect")
        );

        let raised = sink.take().await;
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].severity, MAJOR_SEVERITY);
        assert_eq!(raised[0].device_name, "PlantA_42_SN123");
        assert_eq!(raised[0].alert_name, "Growatt,Disconnect,MAX-50KTL");

        // Run 2: the device is back online.
        let document = alarm
            .evaluate_device(&observation("Online", None))
            .await
            .unwrap()
            .expect("clear emits a document");
        assert_eq!(document.severity, CLEAR_SEVERITY);

        let cleared = sink.take().await;
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].severity, CLEAR_SEVERITY);
        assert_eq!(cleared[0].alert_name, "Growatt,Disconnect,MAX-50KTL");
        assert_eq!(cleared[0].description, "Growatt,Disconnect,MAX-50KTL-Error-0");

        // The record is gone; a third online pass is silent.
        assert!(store.is_empty().await);
        assert!(alarm
            .evaluate_device(&observation("Online", None))
            .await
            .unwrap()
            .is_none());
        assert!(sink.take().await.is_empty());
    }

    #[tokio::test]
    async fn fault_records_the_newest_alarm_with_a_major_trap() {
        let (alarm, sink, store) = evaluator();

        let document = alarm
            .evaluate_device(&observation(
                "Failure",
                Some((507, "PV overvoltage".to_string())),
            ))
            .await
            .unwrap()
            .expect("fault emits a document");
        assert_eq!(document.severity, MAJOR_SEVERITY);

        // The tracker record only exists after a MAJOR trap went out.
        assert_eq!(
            store.get("42,PlantA,INVERTER,SN123").await.unwrap().as_deref(),
            Some("507,PV overvoltage")
        );
        let traps = sink.take().await;
        assert_eq!(traps.len(), 1);
        assert_eq!(traps[0].severity, MAJOR_SEVERITY);
        assert_eq!(traps[0].alert_name, "Growatt,PV overvoltage,MAX-50KTL");
        assert_eq!(traps[0].description, "INVERTER-Error-507");
    }

    #[tokio::test]
    async fn fault_without_vendor_alarms_stays_silent() {
        let (alarm, sink, store) = evaluator();
        assert!(alarm
            .evaluate_device(&observation("Failure", None))
            .await
            .unwrap()
            .is_none());
        assert!(store.is_empty().await);
        assert!(sink.take().await.is_empty());
    }
}
