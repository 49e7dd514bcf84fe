// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-side repositories over the relational store.
//!
//! The credential, site-region and alarm-config tables are provisioned by
//! the bootstrap tooling; this layer only reads them, once per job run.

pub use sqlx::SqlitePool;

use crate::error::Result;
use crate::models::{
    GrowattCredential, HuaweiCredential, InstalledCapacity, KstarCredential,
    PerformanceAlarmConfig, SiteRegionMapping, SolarmanCredential,
};
use crate::settings;

pub async fn connect(path: &str) -> Result<SqlitePool> {
    Ok(SqlitePool::connect(&format!("sqlite://{path}")).await?)
}

pub struct CredentialRepo {
    pool: SqlitePool,
}

impl CredentialRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn growatt(&self) -> Result<Vec<GrowattCredential>> {
        Ok(sqlx::query_as(
            "SELECT id, username, password, token, owner FROM tbl_growatt_credentials",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn huawei(&self) -> Result<Vec<HuaweiCredential>> {
        Ok(sqlx::query_as(
            "SELECT id, username, password, owner, version FROM tbl_huawei_credentials",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn kstar(&self) -> Result<Vec<KstarCredential>> {
        Ok(
            sqlx::query_as("SELECT id, username, password, owner FROM tbl_kstar_credentials")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    pub async fn solarman(&self) -> Result<Vec<SolarmanCredential>> {
        Ok(sqlx::query_as(
            "SELECT id, username, password, app_secret, app_id, owner FROM tbl_solarman_credentials",
        )
        .fetch_all(&self.pool)
        .await?)
    }
}

pub struct SiteRegionMappingRepo {
    pool: SqlitePool,
}

impl SiteRegionMappingRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn site_region_mappings(&self) -> Result<Vec<SiteRegionMapping>> {
        Ok(sqlx::query_as(
            "SELECT id, code, city_name, city_code, area FROM tbl_site_region_mapping",
        )
        .fetch_all(&self.pool)
        .await?)
    }
}

pub struct InstalledCapacityRepo {
    pool: SqlitePool,
}

impl InstalledCapacityRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_one(&self) -> Result<Option<InstalledCapacity>> {
        Ok(sqlx::query_as(
            "SELECT efficiency_factor, focus_hour FROM tbl_installed_capacity LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?)
    }
}

pub struct PerformanceAlarmConfigRepo {
    pool: SqlitePool,
}

impl PerformanceAlarmConfigRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn by_name(&self, name: &str) -> Result<Option<PerformanceAlarmConfig>> {
        Ok(sqlx::query_as(
            "SELECT name, interval, hit_day, percentage, duration \
             FROM tbl_performance_alarm_config WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn low_performance(&self) -> Result<PerformanceAlarmConfig> {
        Ok(self
            .by_name(settings::LOW_PERFORMANCE_ALARM)
            .await?
            .unwrap_or(PerformanceAlarmConfig {
                name: settings::LOW_PERFORMANCE_ALARM.to_string(),
                interval: settings::LOW_PERFORMANCE_ALARM_INTERVAL,
                hit_day: Some(settings::LOW_PERFORMANCE_ALARM_HIT_DAY),
                percentage: settings::LOW_PERFORMANCE_ALARM_PERCENTAGE,
                duration: Some(settings::LOW_PERFORMANCE_ALARM_DURATION),
            }))
    }

    pub async fn sum_performance(&self) -> Result<PerformanceAlarmConfig> {
        Ok(self
            .by_name(settings::SUM_PERFORMANCE_ALARM)
            .await?
            .unwrap_or(PerformanceAlarmConfig {
                name: settings::SUM_PERFORMANCE_ALARM.to_string(),
                interval: settings::SUM_PERFORMANCE_ALARM_INTERVAL,
                hit_day: Some(settings::SUM_PERFORMANCE_ALARM_HIT_DAY),
                percentage: settings::SUM_PERFORMANCE_ALARM_PERCENTAGE,
                duration: Some(settings::SUM_PERFORMANCE_ALARM_DURATION),
            }))
    }
}
