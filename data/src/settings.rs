// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fixed operational constants shared by the alarm jobs.

use std::time::Duration;

pub const LOW_PERFORMANCE_ALARM: &str = "PerformanceLow";
pub const SUM_PERFORMANCE_ALARM: &str = "SumPerformanceLow";

pub const PERFORMANCE_ALARM_SNMP_BATCH_SIZE: usize = 25;
pub const PERFORMANCE_ALARM_SNMP_BATCH_DELAY: Duration = Duration::from_secs(5);

/// Fallbacks used when `tbl_performance_alarm_config` has no row for the
/// alarm kind. Values mirror the database defaults.
pub const LOW_PERFORMANCE_ALARM_INTERVAL: i32 = 24;
pub const LOW_PERFORMANCE_ALARM_HIT_DAY: i32 = 5;
pub const LOW_PERFORMANCE_ALARM_PERCENTAGE: f64 = 60.0;
pub const LOW_PERFORMANCE_ALARM_DURATION: i32 = 7;

pub const SUM_PERFORMANCE_ALARM_INTERVAL: i32 = 24;
pub const SUM_PERFORMANCE_ALARM_HIT_DAY: i32 = 5;
pub const SUM_PERFORMANCE_ALARM_PERCENTAGE: f64 = 50.0;
pub const SUM_PERFORMANCE_ALARM_DURATION: i32 = 30;
