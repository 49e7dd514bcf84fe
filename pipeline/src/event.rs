// SPDX-License-Identifier: AGPL-3.0-or-later
//! Producer/consumer plumbing for the collectors.
//!
//! Each collector runs one producer task that walks the vendor API and
//! pushes typed events through a rendezvous channel; the single consumer
//! drains in traversal order. The channel is the only coupling between the
//! vendor-specific code and the writer.

use serde::Serialize;
use solarwatch_data::models::{AlarmItem, DeviceItem, PlantItem, SiteItem};
use tokio::sync::mpsc;

pub const STATUS_ONLINE: &str = "ONLINE";
pub const STATUS_OFFLINE: &str = "OFFLINE";
pub const STATUS_ALARM: &str = "ALARM";

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Document {
    Plant(PlantItem),
    Device(DeviceItem),
    Alarm(AlarmItem),
}

#[derive(Debug)]
pub enum CollectEvent {
    Document(Document),
    /// Inverter SN queued for the post-walk batched realtime read.
    InverterSn(String),
    /// Rollup status for one plant, applied before indexing.
    PlantStatus { plant_id: String, status: String },
}

pub type EventSender = mpsc::Sender<CollectEvent>;

/// Unbuffered-in-spirit channel: the producer blocks until the consumer
/// drains.
pub fn event_channel() -> (EventSender, mpsc::Receiver<CollectEvent>) {
    mpsc::channel(1)
}

/// Push one event, failing the producer if the consumer is gone.
pub(crate) async fn emit(tx: &EventSender, event: CollectEvent) -> anyhow::Result<()> {
    tx.send(event)
        .await
        .map_err(|_| anyhow::anyhow!("collector channel closed"))
}

/// Site projection emitted alongside every plant document.
pub fn site_item_of(plant: &PlantItem, owner: &str) -> SiteItem {
    SiteItem {
        timestamp: plant.timestamp,
        vendor_type: plant.vendor_type.clone(),
        area: plant.area.clone(),
        site_id: plant.site_id.clone(),
        node_type: plant.node_type.clone(),
        name: plant.name.clone(),
        location: plant.location.clone(),
        plant_status: plant.plant_status.clone(),
        owner: owner.to_string(),
    }
}

/// Counting rollup: any alerting device wins, then any offline device, else
/// online. An empty device set reads as offline.
pub fn rollup_status(statuses: &[String]) -> &'static str {
    if statuses.is_empty() {
        return STATUS_OFFLINE;
    }

    let mut offline = 0;
    let mut alerting = 0;
    for status in statuses {
        match status.as_str() {
            STATUS_OFFLINE => offline += 1,
            STATUS_ONLINE => {}
            _ => alerting += 1,
        }
    }

    if alerting > 0 {
        STATUS_ALARM
    } else if offline > 0 {
        STATUS_OFFLINE
    } else {
        STATUS_ONLINE
    }
}

/// Streaming rollup with the same precedence (ALARM > OFFLINE > ONLINE),
/// used where device statuses arrive one at a time and may be seeded from a
/// vendor-reported plant health state.
#[derive(Debug, Default)]
pub struct StatusRollup {
    status: Option<String>,
}

impl StatusRollup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(initial: &str) -> Self {
        Self {
            status: (!initial.is_empty()).then(|| initial.to_string()),
        }
    }

    pub fn observe(&mut self, device_status: &str) {
        match device_status {
            STATUS_ALARM => self.status = Some(STATUS_ALARM.to_string()),
            STATUS_OFFLINE => {
                if self.status.as_deref() != Some(STATUS_ALARM) {
                    self.status = Some(STATUS_OFFLINE.to_string());
                }
            }
            STATUS_ONLINE => {
                let current = self.status.as_deref();
                if current != Some(STATUS_ALARM) && current != Some(STATUS_OFFLINE) {
                    self.status = Some(STATUS_ONLINE.to_string());
                }
            }
            _ => {}
        }
    }

    pub fn finish(self) -> String {
        self.status.unwrap_or_else(|| STATUS_OFFLINE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn alarm_takes_precedence_over_offline() {
        assert_eq!(
            rollup_status(&statuses(&["ONLINE", "OFFLINE", "ALARM"])),
            STATUS_ALARM
        );
        assert_eq!(rollup_status(&statuses(&["ONLINE", "OFFLINE"])), STATUS_OFFLINE);
        assert_eq!(rollup_status(&statuses(&["ONLINE", "ONLINE"])), STATUS_ONLINE);
        assert_eq!(rollup_status(&[]), STATUS_OFFLINE);
    }

    #[test]
    fn any_non_online_non_offline_status_is_alerting() {
        assert_eq!(
            rollup_status(&statuses(&["ONLINE", "FAILURE"])),
            STATUS_ALARM
        );
        assert_eq!(
            rollup_status(&statuses(&["STAND BY", "OFFLINE"])),
            STATUS_ALARM
        );
    }

    #[test]
    fn streaming_rollup_matches_counting_rollup() {
        let cases: &[&[&str]] = &[
            &["ONLINE", "OFFLINE", "ALARM"],
            &["ONLINE", "OFFLINE"],
            &["ONLINE", "ONLINE"],
            &["ALARM", "ONLINE"],
            &[],
        ];

        for case in cases {
            let mut rollup = StatusRollup::new();
            for status in *case {
                rollup.observe(status);
            }
            assert_eq!(rollup.finish(), rollup_status(&statuses(case)), "{case:?}");
        }
    }

    #[test]
    fn seed_is_overridden_by_worse_device_state() {
        let mut rollup = StatusRollup::seeded(STATUS_ONLINE);
        rollup.observe(STATUS_OFFLINE);
        assert_eq!(rollup.finish(), STATUS_OFFLINE);

        let mut rollup = StatusRollup::seeded(STATUS_ALARM);
        rollup.observe(STATUS_ONLINE);
        assert_eq!(rollup.finish(), STATUS_ALARM);

        // With no observations the seed stands.
        assert_eq!(StatusRollup::seeded(STATUS_ALARM).finish(), STATUS_ALARM);
    }
}
