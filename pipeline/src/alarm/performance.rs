// SPDX-License-Identifier: AGPL-3.0-or-later
//! Performance alarm engine.
//!
//! Both kinds read the composite aggregation over the last `duration` days
//! ending yesterday, re-key the buckets by (vendor, plant id), and compare
//! against `capacity × efficiency factor × focus hour` thresholds:
//! PerformanceLow counts under-threshold days against the hit-day limit,
//! SumPerformanceLow compares the summed daily maxima against the whole
//! window's expectation. Traps go out in batches of 25 with a five-second
//! pause in between.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use solarwatch_data::elastic::PerformanceBucket;
use solarwatch_data::models::{
    daily_index, InstalledCapacity, PerformanceAlarmConfig, PlantItem, SnmpPerformanceAlarmItem,
    PERFORMANCE_ALARM_INDEX, VENDOR_TYPE_GROWATT, VENDOR_TYPE_HUAWEI, VENDOR_TYPE_INVT,
    VENDOR_TYPE_KSTAR, VENDOR_TYPE_SOLARMAN,
};
use solarwatch_data::settings::{
    PERFORMANCE_ALARM_SNMP_BATCH_DELAY, PERFORMANCE_ALARM_SNMP_BATCH_SIZE,
};
use solarwatch_data::snmp::MAJOR_SEVERITY;
use solarwatch_data::{SolarStore, TrapSink};
use tracing::{info, warn};

use crate::plant_name::add_space;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PerformanceAlarmKind {
    Low,
    Sum,
}

impl PerformanceAlarmKind {
    fn document_tag(&self) -> &'static str {
        match self {
            PerformanceAlarmKind::Low => "low",
            PerformanceAlarmKind::Sum => "sum",
        }
    }
}

/// Accumulated state for one (vendor, plant id) across the window.
#[derive(Debug, Default)]
pub(crate) struct PlantPerformance {
    pub count: i64,
    pub total_production: f64,
    pub installed_capacity: f64,
    pub plant: Option<PlantItem>,
    pub period: String,
}

fn bucket_key(bucket: &PerformanceBucket) -> Option<String> {
    let vendor = bucket.key_str("vendor_type")?;
    let id = bucket.key_str("id")?;
    Some(format!("{vendor}_{id}"))
}

fn bucket_plant(bucket: &PerformanceBucket) -> Option<PlantItem> {
    let source = bucket.top_hit_source()?;
    match serde_json::from_value(source.clone()) {
        Ok(plant) => Some(plant),
        Err(err) => {
            warn!(%err, "failed to recast plant item from top hit");
            None
        }
    }
}

/// PerformanceLow: every surviving bucket is one under-threshold day.
pub(crate) fn accumulate_low(
    buckets: &[PerformanceBucket],
    period: &str,
) -> BTreeMap<String, PlantPerformance> {
    let mut filtered: BTreeMap<String, PlantPerformance> = BTreeMap::new();
    for bucket in buckets {
        let Some(key) = bucket_key(bucket) else { continue };
        let entry = filtered.entry(key).or_insert_with(|| PlantPerformance {
            installed_capacity: bucket.avg_capacity_value(),
            plant: bucket_plant(bucket),
            period: period.to_string(),
            ..Default::default()
        });
        entry.count += 1;
    }
    filtered
}

/// SumPerformanceLow: per-plant sum of the daily maxima.
pub(crate) fn accumulate_sum(
    buckets: &[PerformanceBucket],
    period: &str,
) -> BTreeMap<String, PlantPerformance> {
    let mut filtered: BTreeMap<String, PlantPerformance> = BTreeMap::new();
    for bucket in buckets {
        let Some(key) = bucket_key(bucket) else { continue };
        let entry = filtered.entry(key).or_insert_with(|| PlantPerformance {
            installed_capacity: bucket.avg_capacity_value(),
            plant: bucket_plant(bucket),
            period: period.to_string(),
            ..Default::default()
        });
        entry.total_production += bucket.max_daily_value();
    }
    filtered
}

pub(crate) fn period_label(now: DateTime<Utc>, duration: i32) -> String {
    let start = now - chrono::Duration::days(i64::from(duration));
    let end = now - chrono::Duration::days(1);
    format!("{} - {}", start.format("%d%b%Y"), end.format("%d%b%Y"))
}

fn vendor_label(vendor_type: &str) -> Option<&'static str> {
    match vendor_type.to_lowercase().as_str() {
        VENDOR_TYPE_GROWATT => Some("Growatt"),
        VENDOR_TYPE_HUAWEI => Some("HUA"),
        VENDOR_TYPE_KSTAR => Some("Kstar"),
        VENDOR_TYPE_INVT | VENDOR_TYPE_SOLARMAN => Some("INVT-Ipanda"),
        _ => None,
    }
}

/// (plant name, alarm name, description, severity) of one performance trap.
pub(crate) fn build_payload(
    kind: PerformanceAlarmKind,
    config: &PerformanceAlarmConfig,
    capacity: &InstalledCapacity,
    perf: &PlantPerformance,
) -> anyhow::Result<(String, String, String, String)> {
    let plant = perf.plant.clone().unwrap_or_default();
    let vendor = vendor_label(&plant.vendor_type)
        .ok_or_else(|| anyhow::anyhow!("invalid vendor type {:?}", plant.vendor_type))?;

    let plant_name = plant.name.unwrap_or_default();
    let alarm_name = format!("SolarCell-{}", config.name.replace(' ', ""));
    let alarm_desc = add_space(&config.name);
    let duration = config.duration.unwrap_or(0);
    let hit_day = config.hit_day.unwrap_or(0);
    let multiplied =
        perf.installed_capacity * capacity.efficiency_factor * f64::from(capacity.focus_hour);

    let description = match kind {
        PerformanceAlarmKind::Low => format!(
            "{}, {}, Less than or equal {:.2}%, Expected Daily Production:{:.2} KWH, Actual Production less than:{:.2} KWH, Duration:{} days, Period:{}",
            vendor,
            alarm_desc,
            config.percentage,
            multiplied,
            multiplied * (config.percentage / 100.0),
            hit_day,
            perf.period,
        ),
        PerformanceAlarmKind::Sum => format!(
            "{}, {}, Less than or equal {:.2}%, Expected Production:{:.2} KWH, Actual Production:{:.2} KWH (less than {:.2} KWH), Duration:{} days, Period:{}",
            vendor,
            alarm_desc,
            config.percentage,
            multiplied * f64::from(duration),
            perf.total_production,
            multiplied * f64::from(duration) * (config.percentage / 100.0),
            duration,
            perf.period,
        ),
    };

    Ok((plant_name, alarm_name, description, MAJOR_SEVERITY.to_string()))
}

pub(crate) fn chunk_entries(
    entries: BTreeMap<String, PlantPerformance>,
    size: usize,
) -> Vec<Vec<(String, PlantPerformance)>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    for entry in entries {
        current.push(entry);
        if current.len() == size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn validate(config: &PerformanceAlarmConfig) -> anyhow::Result<()> {
    if config.hit_day.unwrap_or(0) == 0 {
        anyhow::bail!("hit day must not be zero");
    }
    if config.duration.unwrap_or(0) == 0 {
        anyhow::bail!("duration must not be zero");
    }
    Ok(())
}

pub struct LowPerformanceAlarm {
    solar: Arc<dyn SolarStore>,
    snmp: Arc<dyn TrapSink>,
    capacity: InstalledCapacity,
    config: PerformanceAlarmConfig,
}

impl LowPerformanceAlarm {
    pub fn new(
        solar: Arc<dyn SolarStore>,
        snmp: Arc<dyn TrapSink>,
        capacity: InstalledCapacity,
        config: PerformanceAlarmConfig,
    ) -> Self {
        Self {
            solar,
            snmp,
            capacity,
            config,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        validate(&self.config)?;

        let now = Utc::now();
        let duration = self.config.duration.unwrap_or(0);
        let hit_day = i64::from(self.config.hit_day.unwrap_or(0));

        let buckets = self
            .solar
            .performance_low(
                duration,
                self.capacity.efficiency_factor,
                self.capacity.focus_hour,
                self.config.percentage / 100.0,
            )
            .await?;

        let filtered = accumulate_low(&buckets, &period_label(now, duration));
        info!(plants = filtered.len(), "sending low performance alarms");

        let mut documents = Vec::new();
        let mut alarm_count = 0;
        for (batch_no, batch) in chunk_entries(filtered, PERFORMANCE_ALARM_SNMP_BATCH_SIZE)
            .into_iter()
            .enumerate()
        {
            for (_, perf) in &batch {
                if perf.count < hit_day {
                    continue;
                }

                let (plant_name, alarm_name, description, severity) = match build_payload(
                    PerformanceAlarmKind::Low,
                    &self.config,
                    &self.capacity,
                    perf,
                ) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(%err, "failed to build low performance payload");
                        continue;
                    }
                };

                let sent_at = now.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
                documents.push(SnmpPerformanceAlarmItem::new(
                    PerformanceAlarmKind::Low.document_tag(),
                    &plant_name,
                    &alarm_name,
                    &description,
                    &severity,
                    &sent_at,
                ));
                self.snmp
                    .send_trap(&plant_name, &alarm_name, &description, &severity, &sent_at)
                    .await;
                alarm_count += 1;
            }

            info!(batch = batch_no + 1, alarm_count, "low performance batch sent");
            tokio::time::sleep(PERFORMANCE_ALARM_SNMP_BATCH_DELAY).await;
        }

        let index = daily_index(PERFORMANCE_ALARM_INDEX, now);
        let values = documents
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.solar.bulk_index(&index, values).await?;

        Ok(())
    }
}

pub struct SumPerformanceAlarm {
    solar: Arc<dyn SolarStore>,
    snmp: Arc<dyn TrapSink>,
    capacity: InstalledCapacity,
    config: PerformanceAlarmConfig,
}

impl SumPerformanceAlarm {
    pub fn new(
        solar: Arc<dyn SolarStore>,
        snmp: Arc<dyn TrapSink>,
        capacity: InstalledCapacity,
        config: PerformanceAlarmConfig,
    ) -> Self {
        Self {
            solar,
            snmp,
            capacity,
            config,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        validate(&self.config)?;

        let now = Utc::now();
        let duration = self.config.duration.unwrap_or(0);

        info!(duration, "polling sum performance alarm");
        let buckets = self.solar.sum_performance_low(duration).await?;
        info!(buckets = buckets.len(), "retrieved buckets");

        let filtered = accumulate_sum(&buckets, &period_label(now, duration));
        info!(plants = filtered.len(), "sending sum performance alarms");

        let mut documents = Vec::new();
        let mut alarm_count = 0;
        for (batch_no, batch) in chunk_entries(filtered, PERFORMANCE_ALARM_SNMP_BATCH_SIZE)
            .into_iter()
            .enumerate()
        {
            for (_, perf) in &batch {
                let threshold = perf.installed_capacity
                    * self.capacity.efficiency_factor
                    * f64::from(self.capacity.focus_hour)
                    * f64::from(duration)
                    * (self.config.percentage / 100.0);
                if perf.total_production > threshold {
                    continue;
                }

                let (plant_name, alarm_name, description, severity) = match build_payload(
                    PerformanceAlarmKind::Sum,
                    &self.config,
                    &self.capacity,
                    perf,
                ) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(%err, "failed to build sum performance payload");
                        continue;
                    }
                };

                let sent_at = now.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
                documents.push(SnmpPerformanceAlarmItem::new(
                    PerformanceAlarmKind::Sum.document_tag(),
                    &plant_name,
                    &alarm_name,
                    &description,
                    &severity,
                    &sent_at,
                ));
                self.snmp
                    .send_trap(&plant_name, &alarm_name, &description, &severity, &sent_at)
                    .await;
                alarm_count += 1;
            }

            info!(batch = batch_no + 1, alarm_count, "sum performance batch sent");
            tokio::time::sleep(PERFORMANCE_ALARM_SNMP_BATCH_DELAY).await;
        }

        let index = daily_index(PERFORMANCE_ALARM_INDEX, now);
        let values = documents
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.solar.bulk_index(&index, values).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn capacity() -> InstalledCapacity {
        InstalledCapacity {
            efficiency_factor: 0.8,
            focus_hour: 5,
        }
    }

    fn low_config() -> PerformanceAlarmConfig {
        PerformanceAlarmConfig {
            name: "PerformanceLow".to_string(),
            interval: 24,
            hit_day: Some(5),
            percentage: 60.0,
            duration: Some(7),
        }
    }

    fn bucket(date: &str, vendor: &str, id: &str, max_daily: f64, capacity: f64) -> PerformanceBucket {
        serde_json::from_value(json!({
            "key": { "date": date, "vendor_type": vendor, "id": id },
            "doc_count": 40,
            "max_daily": { "value": max_daily },
            "avg_capacity": { "value": capacity },
            "hits": { "hits": { "hits": [
                { "_source": { "id": id, "name": "P1", "vendor_type": vendor,
                               "installed_capacity": capacity } }
            ]}},
        }))
        .unwrap()
    }

    #[test]
    fn under_threshold_days_count_per_plant() {
        // Seven days all at or under threshold 24 survive the server-side
        // selector and arrive as seven buckets for the same plant.
        let daily = [23.0, 22.0, 21.0, 20.0, 23.0, 22.0, 21.0];
        let buckets: Vec<PerformanceBucket> = daily
            .iter()
            .enumerate()
            .map(|(i, value)| bucket(&format!("2026-07-{:02}", 26 + i), "HUAWEI", "NE=1", *value, 10.0))
            .collect();

        let filtered = accumulate_low(&buckets, "26Jul2026 - 01Aug2026");
        assert_eq!(filtered.len(), 1);
        let perf = &filtered["HUAWEI_NE=1"];
        assert_eq!(perf.count, 7);
        assert!(perf.count >= i64::from(low_config().hit_day.unwrap()));
        assert_eq!(perf.installed_capacity, 10.0);
    }

    #[test]
    fn low_payload_matches_trap_template() {
        let filtered = accumulate_low(
            &[bucket("2026-07-26", "HUAWEI", "NE=1", 23.0, 10.0)],
            "26Jul2026 - 01Aug2026",
        );
        let perf = &filtered["HUAWEI_NE=1"];

        let (plant_name, alarm_name, description, severity) =
            build_payload(PerformanceAlarmKind::Low, &low_config(), &capacity(), perf).unwrap();

        assert_eq!(plant_name, "P1");
        assert_eq!(alarm_name, "SolarCell-PerformanceLow");
        assert_eq!(severity, MAJOR_SEVERITY);
        assert_eq!(
            description,
            "HUA, Performance Low, Less than or equal 60.00%, \
             Expected Daily Production:40.00 KWH, \
             Actual Production less than:24.00 KWH, \
             Duration:5 days, Period:26Jul2026 - 01Aug2026"
        );
    }

    #[test]
    fn sum_payload_compares_window_totals() {
        let buckets = vec![
            bucket("2026-07-26", "GROWATT", "42", 20.0, 10.0),
            bucket("2026-07-27", "GROWATT", "42", 22.0, 10.0),
        ];
        let filtered = accumulate_sum(&buckets, "03Jul2026 - 01Aug2026");
        let perf = &filtered["GROWATT_42"];
        assert_eq!(perf.total_production, 42.0);

        let config = PerformanceAlarmConfig {
            name: "SumPerformanceLow".to_string(),
            interval: 24,
            hit_day: Some(5),
            percentage: 50.0,
            duration: Some(30),
        };
        let (_, alarm_name, description, _) =
            build_payload(PerformanceAlarmKind::Sum, &config, &capacity(), perf).unwrap();

        assert_eq!(alarm_name, "SolarCell-SumPerformanceLow");
        assert!(description.starts_with("Growatt, Sum Performance Low, Less than or equal 50.00%, "));
        // expected = 10 * 0.8 * 5 * 30, threshold = expected * 0.5
        assert!(description.contains("Expected Production:1200.00 KWH"));
        assert!(description.contains("Actual Production:42.00 KWH (less than 600.00 KWH)"));
        assert!(description.contains("Duration:30 days"));
    }

    #[test]
    fn sum_flagging_is_threshold_inclusive() {
        let capacity = capacity();
        let duration = 30.0;
        let threshold = 10.0 * capacity.efficiency_factor * 5.0 * duration * 0.5;
        assert_eq!(threshold, 600.0);

        // <= flags, > does not.
        assert!(600.0 <= threshold);
        assert!(!(600.1 <= threshold));
    }

    #[test]
    fn unknown_vendor_fails_payload() {
        let perf = PlantPerformance {
            plant: Some(PlantItem {
                vendor_type: "ACME".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(
            build_payload(PerformanceAlarmKind::Low, &low_config(), &capacity(), &perf).is_err()
        );
    }

    #[test]
    fn entries_chunk_at_batch_size() {
        let mut entries = BTreeMap::new();
        for i in 0..60 {
            entries.insert(format!("HUAWEI_{i:03}"), PlantPerformance::default());
        }
        let chunks = chunk_entries(entries, PERFORMANCE_ALARM_SNMP_BATCH_SIZE);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![25, 25, 10]);
    }

    #[test]
    fn period_ends_yesterday() {
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 8, 0, 0).unwrap();
        assert_eq!(period_label(now, 7), "26Jul2026 - 01Aug2026");
    }

    #[test]
    fn short_history_does_not_flag() {
        // Only three under-threshold days in the window: below the hit-day
        // limit of five, so the plant must not alarm.
        let buckets: Vec<PerformanceBucket> = (0..3)
            .map(|i| bucket(&format!("2026-07-3{i}"), "HUAWEI", "NE=1", 20.0, 10.0))
            .collect();
        let filtered = accumulate_low(&buckets, "p");
        assert!(filtered["HUAWEI_NE=1"].count < i64::from(low_config().hit_day.unwrap()));
    }
}
