// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kstar alarm evaluator.
//!
//! Status 0 raises a Disconnect record; an online or alarming device with
//! realtime alarms raises one record per alarm message; an online device
//! with none gets its residual records scanned, cleared and deleted.

use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use solarwatch_adapters::kstar::{self, KstarClient};
use solarwatch_data::models::{KstarCredential, SnmpAlarmItem, VENDOR_TYPE_KSTAR};
use solarwatch_data::snmp::{CLEAR_SEVERITY, MAJOR_SEVERITY};
use solarwatch_data::{KeyValueStore, SolarStore, TrapSink};
use tracing::{info, warn};

use crate::alarm::{dashed, index_alarm_documents};

const DISCONNECT_ALARM: &str = "Kstar-Disconnect";

pub struct KstarAlarm {
    vendor_type: String,
    solar: Arc<dyn SolarStore>,
    snmp: Arc<dyn TrapSink>,
    tracker: Arc<dyn KeyValueStore>,
}

impl KstarAlarm {
    pub fn new(
        solar: Arc<dyn SolarStore>,
        snmp: Arc<dyn TrapSink>,
        tracker: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            vendor_type: VENDOR_TYPE_KSTAR.to_uppercase(),
            solar,
            snmp,
            tracker,
        }
    }

    pub async fn run(&self, credential: &KstarCredential) -> anyhow::Result<()> {
        let now = Utc::now();
        let client =
            KstarClient::new(&credential.username, &credential.password)?.with_retry_count(0);

        let devices = client.device_list().await.context("get device list")?;
        if devices.is_empty() {
            anyhow::bail!("empty device list for {}", credential.username);
        }
        info!(username = %credential.username, count = devices.len(), "kstar alarm walk started");

        let mut documents = Vec::new();
        for device in devices {
            let device_id = device.id.clone().unwrap_or_default();
            let device_name = device.name.clone().unwrap_or_default();
            let plant_id = device.plant_id.clone().unwrap_or_default();
            let plant_name = device.plant_name.clone().unwrap_or_default();
            let mut save_time = device.save_time.clone().unwrap_or_default();

            match client.realtime_device_data(&device_id).await {
                Ok(Some(realtime)) => {
                    if let Some(time) = realtime.save_time {
                        save_time = time;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(device_id = %device_id, %err, "failed to get realtime device data");
                    continue;
                }
            }

            let Some(status) = device.status else { continue };

            let alarms = if status == 1 || status == 2 {
                match client.realtime_alarm_list(&device_id).await {
                    Ok(alarms) => alarms,
                    Err(err) => {
                        warn!(device_id = %device_id, %err, "failed to get realtime alarm list");
                        continue;
                    }
                }
            } else {
                Vec::new()
            };

            self.evaluate_device(
                &mut documents,
                &plant_id,
                &plant_name,
                &device_id,
                &device_name,
                &save_time,
                status,
                &alarms,
            )
            .await?;
        }

        index_alarm_documents(&self.solar, "kstar", now, documents).await
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn evaluate_device(
        &self,
        documents: &mut Vec<SnmpAlarmItem>,
        plant_id: &str,
        plant_name: &str,
        device_id: &str,
        device_name: &str,
        save_time: &str,
        status: i32,
        alarms: &[kstar::DeviceAlarm],
    ) -> anyhow::Result<()> {
        let payload = format!("Kstar,{plant_id},{device_id},{device_name}");

        match status {
            0 => {
                let key =
                    format!("Kstar,{plant_id},{device_id},{device_name},{DISCONNECT_ALARM}");
                let value = format!("{plant_name},{save_time}");
                self.tracker.mark_active(&key, &value).await?;

                documents.push(SnmpAlarmItem::new(
                    &self.vendor_type,
                    plant_name,
                    DISCONNECT_ALARM,
                    &payload,
                    MAJOR_SEVERITY,
                    save_time,
                ));
                self.snmp
                    .send_trap(plant_name, DISCONNECT_ALARM, &payload, MAJOR_SEVERITY, save_time)
                    .await;
            }
            1 if alarms.is_empty() => {
                let pattern = format!("Kstar,{plant_id},{device_id},{device_name},*");
                for key in self.tracker.scan(&pattern).await? {
                    let Some(value) = self.tracker.get(&key).await? else { continue };
                    if value.trim().is_empty() {
                        continue;
                    }

                    let key_parts: Vec<&str> = key.split(',').collect();
                    let value_parts: Vec<&str> = value.split(',').collect();
                    let stored_plant = value_parts.first().copied().unwrap_or_default();
                    let stored_time = value_parts.get(1).copied().unwrap_or_default();
                    let alarm_name = dashed(key_parts.get(4).copied().unwrap_or_default());

                    documents.push(SnmpAlarmItem::new(
                        &self.vendor_type,
                        stored_plant,
                        &alarm_name,
                        &payload,
                        CLEAR_SEVERITY,
                        stored_time,
                    ));
                    self.snmp
                        .send_trap(stored_plant, &alarm_name, &payload, CLEAR_SEVERITY, stored_time)
                        .await;

                    self.tracker.forget(&key).await?;
                }
            }
            1 | 2 => {
                for alarm in alarms {
                    let alarm_time = alarm.save_time.clone().unwrap_or_default();
                    let alarm_message = dashed(alarm.message.as_deref().unwrap_or_default());

                    let key =
                        format!("Kstar,{plant_id},{device_id},{device_name},{alarm_message}");
                    let value = format!("{plant_name},{alarm_time}");
                    self.tracker.mark_active(&key, &value).await?;

                    documents.push(SnmpAlarmItem::new(
                        &self.vendor_type,
                        plant_name,
                        &alarm_message,
                        &payload,
                        MAJOR_SEVERITY,
                        &alarm_time,
                    ));
                    self.snmp
                        .send_trap(plant_name, &alarm_message, &payload, MAJOR_SEVERITY, &alarm_time)
                        .await;
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSolarStore;
    use solarwatch_data::{MemoryStore, RecordingTrapSink};

    fn evaluator() -> (KstarAlarm, Arc<RecordingTrapSink>, Arc<MemoryStore>) {
        let sink = Arc::new(RecordingTrapSink::new());
        let store = Arc::new(MemoryStore::new());
        let alarm = KstarAlarm::new(
            Arc::new(RecordingSolarStore::new()),
            sink.clone(),
            store.clone(),
        );
        (alarm, sink, store)
    }

    fn vendor_alarm(message: &str, save_time: &str) -> kstar::DeviceAlarm {
        kstar::DeviceAlarm {
            plant_id: Some("12".to_string()),
            plant_name: Some("STN001-PEA-3P-25kW".to_string()),
            device_id: Some("77".to_string()),
            device_name: Some("INV-A".to_string()),
            message: Some(message.to_string()),
            save_time: Some(save_time.to_string()),
        }
    }

    #[tokio::test]
    async fn alarming_device_records_each_message_then_clears() {
        let (alarm, sink, store) = evaluator();
        let mut documents = Vec::new();

        alarm
            .evaluate_device(
                &mut documents,
                "12",
                "STN001-PEA-3P-25kW",
                "77",
                "INV-A",
                "2026-08-02 09:41:00",
                2,
                &[vendor_alarm("Grid Fault", "2026-08-02 09:40:00")],
            )
            .await
            .unwrap();

        assert_eq!(
            store
                .get("Kstar,12,77,INV-A,Grid-Fault")
                .await
                .unwrap()
                .as_deref(),
            Some("STN001-PEA-3P-25kW,2026-08-02 09:40:00")
        );
        let raised = sink.take().await;
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].severity, MAJOR_SEVERITY);
        assert_eq!(raised[0].alert_name, "Grid-Fault");
        assert_eq!(raised[0].description, "Kstar,12,77,INV-A");

        // Online with no realtime alarms clears the residual record.
        alarm
            .evaluate_device(
                &mut documents,
                "12",
                "STN001-PEA-3P-25kW",
                "77",
                "INV-A",
                "2026-08-02 09:55:00",
                1,
                &[],
            )
            .await
            .unwrap();

        let cleared = sink.take().await;
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].severity, CLEAR_SEVERITY);
        assert_eq!(cleared[0].device_name, "STN001-PEA-3P-25kW");
        assert_eq!(cleared[0].last_update_time, "2026-08-02 09:40:00");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn disconnect_writes_the_fixed_record() {
        let (alarm, sink, store) = evaluator();
        let mut documents = Vec::new();

        alarm
            .evaluate_device(
                &mut documents,
                "12",
                "STN001-PEA-3P-25kW",
                "77",
                "INV-A",
                "2026-08-02 09:41:00",
                0,
                &[],
            )
            .await
            .unwrap();

        assert!(store
            .get("Kstar,12,77,INV-A,Kstar-Disconnect")
            .await
            .unwrap()
            .is_some());
        let traps = sink.take().await;
        assert_eq!(traps.len(), 1);
        assert_eq!(traps[0].alert_name, DISCONNECT_ALARM);
        assert_eq!(traps[0].severity, MAJOR_SEVERITY);
    }

    #[tokio::test]
    async fn online_clear_does_not_touch_other_devices_records() {
        let (alarm, sink, store) = evaluator();
        let mut documents = Vec::new();

        store
            .mark_active("Kstar,12,78,INV-B,Grid-Fault", "STN001,2026-08-01 10:00:00")
            .await
            .unwrap();

        alarm
            .evaluate_device(
                &mut documents,
                "12",
                "STN001-PEA-3P-25kW",
                "77",
                "INV-A",
                "2026-08-02 09:41:00",
                1,
                &[],
            )
            .await
            .unwrap();

        assert!(sink.take().await.is_empty());
        assert!(store
            .get("Kstar,12,78,INV-B,Grid-Fault")
            .await
            .unwrap()
            .is_some());
    }
}
