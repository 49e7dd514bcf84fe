// SPDX-License-Identifier: AGPL-3.0-or-later
//! Huawei alarm evaluator.
//!
//! An inverter whose realtime run state reads 0 raises a Disconnect record
//! keyed by its shutdown time; a device with alarms in today's window
//! raises one record per alarm name; a device back to normal gets its
//! residual tracker records scanned, cleared and deleted.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use solarwatch_adapters::huawei::{DeviceAlarm, HuaweiClient, RealtimeDeviceData};
use solarwatch_data::models::{HuaweiCredential, SnmpAlarmItem, VENDOR_TYPE_HUAWEI};
use solarwatch_data::snmp::{CLEAR_SEVERITY, MAJOR_SEVERITY};
use solarwatch_data::{KeyValueStore, SolarStore, TrapSink};
use tracing::{info, warn};

use crate::alarm::{dashed, index_alarm_documents};
use crate::collector::huawei::{join_batches, merge_alarm, CODE_BATCH_SIZE};

const INVERTER_TYPE_ID: i64 = 1;

pub struct HuaweiAlarm {
    vendor_type: String,
    solar: Arc<dyn SolarStore>,
    snmp: Arc<dyn TrapSink>,
    tracker: Arc<dyn KeyValueStore>,
}

impl HuaweiAlarm {
    pub fn new(
        solar: Arc<dyn SolarStore>,
        snmp: Arc<dyn TrapSink>,
        tracker: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            vendor_type: VENDOR_TYPE_HUAWEI.to_uppercase(),
            solar,
            snmp,
            tracker,
        }
    }

    pub async fn run(&self, credential: &HuaweiCredential) -> anyhow::Result<()> {
        let now = Utc::now();
        let begin_time = now
            .date_naive()
            .and_hms_opt(6, 0, 0)
            .map(|t| t.and_utc().timestamp_millis())
            .unwrap_or_default();
        let end_time = now.timestamp_millis();

        let client = HuaweiClient::builder(&credential.username, &credential.password)
            .retry_count(0)
            .login()
            .await
            .context("huawei login")?;

        let plants = client.plant_list().await.context("get plant list")?;
        info!(username = %credential.username, count = plants.len(), "huawei alarm walk started");

        let code_batches = join_batches(
            plants.iter().filter_map(|p| p.code.clone()),
            CODE_BATCH_SIZE,
        );

        let mut inverters = Vec::new();
        let mut devices_by_code: HashMap<String, Vec<solarwatch_adapters::huawei::Device>> =
            HashMap::new();
        let mut alarms_by_sn: HashMap<String, Vec<DeviceAlarm>> = HashMap::new();

        for codes in &code_batches {
            let devices = client.device_list(codes).await.context("get device list")?;
            for device in devices {
                if let Some(code) = device.plant_code.clone() {
                    devices_by_code.entry(code).or_default().push(device.clone());
                }
                if device.type_id == Some(INVERTER_TYPE_ID) {
                    inverters.push(device);
                }
            }

            let alarms = client
                .device_alarms(codes, begin_time, end_time)
                .await
                .context("get device alarms")?;
            for alarm in alarms {
                let Some(sn) = alarm.device_sn.clone() else { continue };
                merge_alarm(alarms_by_sn.entry(sn).or_default(), alarm);
            }
        }

        let id_batches = join_batches(
            inverters
                .iter()
                .filter_map(|d| d.id.map(|id| id.to_string())),
            CODE_BATCH_SIZE,
        );

        let mut realtime_by_id: HashMap<i64, RealtimeDeviceData> = HashMap::new();
        for ids in &id_batches {
            if ids.is_empty() {
                continue;
            }
            let realtime = client
                .realtime_device_data(ids, "1")
                .await
                .context("get realtime device data")?;
            for item in realtime {
                if let Some(id) = item.id {
                    realtime_by_id.insert(id, item);
                }
            }
        }

        let mut documents = Vec::new();
        for plant in &plants {
            let plant_code = plant.code.clone().unwrap_or_default();
            let plant_name = plant.name.clone().unwrap_or_default();

            for device in devices_by_code.get(&plant_code).map(Vec::as_slice).unwrap_or(&[]) {
                let device_id = device.id.unwrap_or(0);
                let device_sn = device.sn.clone().unwrap_or_default();
                let device_name = device.name.clone().unwrap_or_default();

                let mut disconnected = None;
                if device.type_id == Some(INVERTER_TYPE_ID) {
                    let Some(realtime) = realtime_by_id
                        .get(&device_id)
                        .and_then(|r| r.data_item_map.as_ref())
                    else {
                        warn!(device_id, "no realtime data for inverter");
                        continue;
                    };

                    if realtime.status == Some(0) {
                        let shutdown = realtime
                            .inverter_shutdown_value()
                            .map(|v| (v as i64).to_string())
                            .unwrap_or_else(|| end_time.to_string());
                        disconnected = Some(shutdown);
                    }
                }

                let alarms = alarms_by_sn
                    .get(&device_sn)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);

                self.evaluate_device(
                    &mut documents,
                    &plant_code,
                    &plant_name,
                    &device_sn,
                    &device_name,
                    disconnected,
                    alarms,
                )
                .await?;
            }
        }

        index_alarm_documents(&self.solar, "huawei", now, documents).await
    }

    /// Raise/clear decision for one device against the tracker.
    pub(crate) async fn evaluate_device(
        &self,
        documents: &mut Vec<SnmpAlarmItem>,
        plant_code: &str,
        plant_name: &str,
        device_sn: &str,
        device_name: &str,
        disconnected: Option<String>,
        alarms: &[DeviceAlarm],
    ) -> anyhow::Result<()> {
        if let Some(shutdown_time) = disconnected {
            let key = format!("Huawei,{plant_code},{device_sn},{device_name},Disconnect");
            let value = format!("{plant_name},Disconnect,{shutdown_time}");
            self.tracker.mark_active(&key, &value).await?;

            let alarm_name = "HUW-Disconnect".to_string();
            let payload = format!("Huawei,{device_name},Disconnect");
            documents.push(SnmpAlarmItem::new(
                &self.vendor_type,
                plant_name,
                &alarm_name,
                &payload,
                MAJOR_SEVERITY,
                &shutdown_time,
            ));
            self.snmp
                .send_trap(plant_name, &alarm_name, &payload, MAJOR_SEVERITY, &shutdown_time)
                .await;
            return Ok(());
        }

        if !alarms.is_empty() {
            for alarm in alarms {
                let alarm_name = alarm.alarm_name.clone().unwrap_or_default();
                let alarm_cause = alarm.alarm_cause.clone().unwrap_or_default();
                let alarm_time = alarm.raise_time.unwrap_or(0).to_string();

                let key = format!("Huawei,{plant_code},{device_sn},{device_name},{alarm_name}");
                let value = format!("{plant_name},{alarm_cause},{alarm_time}");
                self.tracker.mark_active(&key, &value).await?;

                let trap_name = dashed(&format!("HUW-{alarm_name}"));
                let payload = format!("Huawei,{device_name},{alarm_cause}");
                documents.push(SnmpAlarmItem::new(
                    &self.vendor_type,
                    plant_name,
                    &trap_name,
                    &payload,
                    MAJOR_SEVERITY,
                    &alarm_time,
                ));
                self.snmp
                    .send_trap(plant_name, &trap_name, &payload, MAJOR_SEVERITY, &alarm_time)
                    .await;
            }
            return Ok(());
        }

        // Back to normal: every residual record is a cleared fault.
        let pattern = format!("Huawei,{plant_code},{device_sn},{device_name},*");
        for key in self.tracker.scan(&pattern).await? {
            let Some(value) = self.tracker.get(&key).await? else { continue };
            if value.trim().is_empty() {
                continue;
            }

            let key_parts: Vec<&str> = key.split(',').collect();
            let value_parts: Vec<&str> = value.split(',').collect();
            let stored_plant = value_parts.first().copied().unwrap_or_default();
            let stored_cause = value_parts.get(1).copied().unwrap_or_default();
            let stored_time = value_parts.get(2).copied().unwrap_or_default();

            let trap_name = dashed(&format!(
                "HUW-{}",
                key_parts.get(4).copied().unwrap_or_default()
            ));
            let payload = format!("Huawei,{device_name},{stored_cause}");

            documents.push(SnmpAlarmItem::new(
                &self.vendor_type,
                plant_name,
                &trap_name,
                &payload,
                CLEAR_SEVERITY,
                stored_time,
            ));
            self.snmp
                .send_trap(stored_plant, &trap_name, &payload, CLEAR_SEVERITY, stored_time)
                .await;

            self.tracker.forget(&key).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSolarStore;
    use solarwatch_data::{MemoryStore, RecordingTrapSink};

    fn evaluator() -> (HuaweiAlarm, Arc<RecordingTrapSink>, Arc<MemoryStore>) {
        let sink = Arc::new(RecordingTrapSink::new());
        let store = Arc::new(MemoryStore::new());
        let alarm = HuaweiAlarm::new(
            Arc::new(RecordingSolarStore::new()),
            sink.clone(),
            store.clone(),
        );
        (alarm, sink, store)
    }

    fn vendor_alarm(name: &str, cause: &str, raise_time: i64) -> DeviceAlarm {
        DeviceAlarm {
            plant_code: Some("NE=101".to_string()),
            plant_name: Some("P1".to_string()),
            device_sn: Some("SN1".to_string()),
            device_name: Some("INV-01".to_string()),
            device_type_id: Some(1),
            alarm_id: Some(2064),
            alarm_name: Some(name.to_string()),
            alarm_cause: Some(cause.to_string()),
            raise_time: Some(raise_time),
            level: Some(2),
            status: Some(1),
        }
    }

    #[tokio::test]
    async fn raised_alarm_clears_exactly_once_when_device_recovers() {
        let (alarm, sink, store) = evaluator();
        let mut documents = Vec::new();

        alarm
            .evaluate_device(
                &mut documents,
                "NE=101",
                "P1",
                "SN1",
                "INV-01",
                None,
                &[vendor_alarm("String Abnormal", "String reversed", 1690101234)],
            )
            .await
            .unwrap();

        // The record exists and a MAJOR trap preceded it.
        assert_eq!(
            store
                .get("Huawei,NE=101,SN1,INV-01,String Abnormal")
                .await
                .unwrap()
                .as_deref(),
            Some("P1,String reversed,1690101234")
        );
        let raised = sink.take().await;
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].severity, MAJOR_SEVERITY);
        assert_eq!(raised[0].alert_name, "HUW-String-Abnormal");
        assert_eq!(raised[0].description, "Huawei,INV-01,String reversed");

        // Device back to normal: the residual record produces one CLEAR and
        // is deleted.
        alarm
            .evaluate_device(&mut documents, "NE=101", "P1", "SN1", "INV-01", None, &[])
            .await
            .unwrap();

        let cleared = sink.take().await;
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].severity, CLEAR_SEVERITY);
        assert_eq!(cleared[0].device_name, "P1");
        assert_eq!(cleared[0].last_update_time, "1690101234");
        assert!(store.is_empty().await);

        // Nothing left to clear on the next pass.
        alarm
            .evaluate_device(&mut documents, "NE=101", "P1", "SN1", "INV-01", None, &[])
            .await
            .unwrap();
        assert!(sink.take().await.is_empty());
        assert_eq!(documents.len(), 2);
    }

    #[tokio::test]
    async fn inverter_shutdown_raises_a_disconnect_record() {
        let (alarm, sink, store) = evaluator();
        let mut documents = Vec::new();

        alarm
            .evaluate_device(
                &mut documents,
                "NE=101",
                "P1",
                "SN1",
                "INV-01",
                Some("1690100000".to_string()),
                &[],
            )
            .await
            .unwrap();

        assert_eq!(
            store
                .get("Huawei,NE=101,SN1,INV-01,Disconnect")
                .await
                .unwrap()
                .as_deref(),
            Some("P1,Disconnect,1690100000")
        );
        let traps = sink.take().await;
        assert_eq!(traps.len(), 1);
        assert_eq!(traps[0].alert_name, "HUW-Disconnect");
        assert_eq!(traps[0].severity, MAJOR_SEVERITY);
    }

    #[tokio::test]
    async fn clearing_is_scoped_to_the_device_prefix() {
        let (alarm, sink, store) = evaluator();
        let mut documents = Vec::new();

        store
            .mark_active("Huawei,NE=101,SN1,INV-01,Fault", "P1,cause,1")
            .await
            .unwrap();
        store
            .mark_active("Huawei,NE=101,SN2,INV-02,Fault", "P1,cause,2")
            .await
            .unwrap();

        alarm
            .evaluate_device(&mut documents, "NE=101", "P1", "SN1", "INV-01", None, &[])
            .await
            .unwrap();

        assert_eq!(sink.take().await.len(), 1);
        assert!(store.get("Huawei,NE=101,SN1,INV-01,Fault").await.unwrap().is_none());
        assert!(store.get("Huawei,NE=101,SN2,INV-02,Fault").await.unwrap().is_some());
    }
}
