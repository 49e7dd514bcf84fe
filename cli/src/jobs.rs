// SPDX-License-Identifier: AGPL-3.0-or-later
//! One-shot job wiring.
//!
//! Each job loads its credentials, fans the per-credential work out on a
//! JoinSet, recovers panics so siblings keep running, and exits zero on
//! completion regardless of per-plant warnings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use solarwatch_data::db::{
    connect, CredentialRepo, InstalledCapacityRepo, PerformanceAlarmConfigRepo,
    SiteRegionMappingRepo, SqlitePool,
};
use solarwatch_data::models::SiteRegionMapping;
use solarwatch_data::{
    ElasticRepo, KeyValueStore, RedisTracker, SnmpOrchestrator, SolarStore, TrapSink, TrapType,
};
use solarwatch_pipeline::alarm::{
    ClearAlarm, GrowattAlarm, HuaweiAlarm, KstarAlarm, LowPerformanceAlarm, SolarmanAlarm,
    SumPerformanceAlarm,
};
use solarwatch_pipeline::collector::{
    GrowattCollector, Huawei2Collector, HuaweiCollector, KstarCollector, SolarmanCollector,
};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Config;

const HUAWEI_SUPPORTED_VERSION: i32 = 1;
const HUAWEI2_SUPPORTED_VERSION: i32 = 2;

const LOW_PERFORMANCE_MAX_RETRIES: usize = 5;
const LOW_PERFORMANCE_RETRY_DELAY: Duration = Duration::from_secs(300);

struct JobContext {
    pool: SqlitePool,
    solar: Arc<dyn SolarStore>,
}

impl JobContext {
    async fn open(config: &Config) -> Result<Self> {
        let pool = connect(&config.database.path)
            .await
            .context("open relational store")?;
        let solar: Arc<dyn SolarStore> =
            Arc::new(ElasticRepo::new(&config.elastic()).context("open elasticsearch client")?);
        Ok(Self { pool, solar })
    }

    async fn site_regions(&self) -> Result<Vec<SiteRegionMapping>> {
        SiteRegionMappingRepo::new(self.pool.clone())
            .site_region_mappings()
            .await
            .context("load site region mappings")
    }

    fn credentials(&self) -> CredentialRepo {
        CredentialRepo::new(self.pool.clone())
    }
}

async fn open_tracker(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    Ok(Arc::new(
        RedisTracker::connect(&config.redis())
            .await
            .context("open redis tracker")?,
    ))
}

async fn open_snmp(config: &Config, trap_type: TrapType) -> Result<Arc<dyn TrapSink>> {
    Ok(Arc::new(
        SnmpOrchestrator::new(trap_type, &config.snmp_receivers())
            .await
            .context("open snmp receivers")?,
    ))
}

/// Drains a credential fan-out, logging failures and recovered panics.
async fn join_workers(job: &str, mut workers: JoinSet<Result<()>>) {
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(job, %err, "credential worker failed"),
            Err(join_err) if join_err.is_panic() => {
                error!(job, %join_err, "credential worker panicked, siblings continue")
            }
            Err(join_err) => error!(job, %join_err, "credential worker aborted"),
        }
    }
}

pub async fn growatt_collect(config: &Config) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let credentials = ctx.credentials().growatt().await?;
    if credentials.is_empty() {
        info!("no growatt credentials found");
        return Ok(());
    }

    let regions = ctx.site_regions().await?;
    let now = Utc::now();
    let mut workers = JoinSet::new();
    for credential in credentials {
        let collector = GrowattCollector::new(ctx.solar.clone(), regions.clone());
        workers.spawn(async move { collector.execute(now, &credential).await });
    }
    join_workers("growatt_collect", workers).await;
    Ok(())
}

pub async fn huawei_collect(config: &Config) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let credentials = ctx.credentials().huawei().await?;
    let regions = ctx.site_regions().await?;

    let mut workers = JoinSet::new();
    for credential in credentials {
        if credential.version != HUAWEI_SUPPORTED_VERSION {
            continue;
        }
        let collector = HuaweiCollector::new(ctx.solar.clone(), regions.clone());
        workers.spawn(async move { collector.execute(&credential).await });
    }
    join_workers("huawei_collect", workers).await;
    Ok(())
}

pub async fn huawei2_collect(config: &Config) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let credentials = ctx.credentials().huawei().await?;
    let regions = ctx.site_regions().await?;

    let mut workers = JoinSet::new();
    for credential in credentials {
        if credential.version != HUAWEI2_SUPPORTED_VERSION {
            continue;
        }
        let collector = Huawei2Collector::new(ctx.solar.clone(), regions.clone());
        workers.spawn(async move { collector.execute(&credential).await });
    }
    join_workers("huawei2_collect", workers).await;
    Ok(())
}

pub async fn kstar_collect(config: &Config) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let credentials = ctx.credentials().kstar().await?;
    if credentials.is_empty() {
        info!("no kstar credentials found");
        return Ok(());
    }

    let regions = ctx.site_regions().await?;
    let mut workers = JoinSet::new();
    for credential in credentials {
        let collector = KstarCollector::new(ctx.solar.clone(), regions.clone());
        workers.spawn(async move { collector.execute(&credential).await });
    }
    join_workers("kstar_collect", workers).await;
    Ok(())
}

pub async fn solarman_collect(config: &Config) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let credentials = ctx.credentials().solarman().await?;
    if credentials.is_empty() {
        info!("no solarman credentials found");
        return Ok(());
    }

    let regions = ctx.site_regions().await?;
    let now = Utc::now();
    let mut workers = JoinSet::new();
    for credential in credentials {
        let collector = SolarmanCollector::new(ctx.solar.clone(), regions.clone());
        workers.spawn(async move { collector.execute(now, &credential).await });
    }
    join_workers("solarman_collect", workers).await;
    Ok(())
}

pub async fn growatt_alarm(config: &Config) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let credentials = ctx.credentials().growatt().await?;
    if credentials.is_empty() {
        info!("no growatt credentials found");
        return Ok(());
    }

    let snmp = open_snmp(config, TrapType::GrowattAlarm).await?;
    let tracker = open_tracker(config).await?;

    let mut workers = JoinSet::new();
    for credential in credentials {
        let evaluator = GrowattAlarm::new(ctx.solar.clone(), snmp.clone(), tracker.clone());
        workers.spawn(async move { evaluator.run(&credential).await });
    }
    join_workers("growatt_alarm", workers).await;
    Ok(())
}

pub async fn huawei_alarm(config: &Config) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let credentials = ctx.credentials().huawei().await?;
    let snmp = open_snmp(config, TrapType::HuaweiAlarm).await?;
    let tracker = open_tracker(config).await?;

    let mut workers = JoinSet::new();
    for credential in credentials {
        if credential.version != HUAWEI_SUPPORTED_VERSION {
            continue;
        }
        let evaluator = HuaweiAlarm::new(ctx.solar.clone(), snmp.clone(), tracker.clone());
        workers.spawn(async move { evaluator.run(&credential).await });
    }
    join_workers("huawei_alarm", workers).await;
    Ok(())
}

pub async fn kstar_alarm(config: &Config) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let credentials = ctx.credentials().kstar().await?;
    if credentials.is_empty() {
        info!("no kstar credentials found");
        return Ok(());
    }

    let snmp = open_snmp(config, TrapType::KstarAlarm).await?;
    let tracker = open_tracker(config).await?;

    let mut workers = JoinSet::new();
    for credential in credentials {
        let evaluator = KstarAlarm::new(ctx.solar.clone(), snmp.clone(), tracker.clone());
        workers.spawn(async move { evaluator.run(&credential).await });
    }
    join_workers("kstar_alarm", workers).await;
    Ok(())
}

pub async fn solarman_alarm(config: &Config) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let credentials = ctx.credentials().solarman().await?;
    if credentials.is_empty() {
        info!("no solarman credentials found");
        return Ok(());
    }

    let snmp = open_snmp(config, TrapType::SolarmanAlarm).await?;
    let tracker = open_tracker(config).await?;

    let mut workers = JoinSet::new();
    for credential in credentials {
        let evaluator = SolarmanAlarm::new(ctx.solar.clone(), snmp.clone(), tracker.clone());
        workers.spawn(async move { evaluator.run(&credential).await });
    }
    join_workers("solarman_alarm", workers).await;
    Ok(())
}

pub async fn low_performance_alarm(config: &Config) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let snmp = open_snmp(config, TrapType::PerformanceAlarm).await?;

    let capacity = InstalledCapacityRepo::new(ctx.pool.clone())
        .find_one()
        .await?
        .context("installed capacity not found")?;
    let alarm_config = PerformanceAlarmConfigRepo::new(ctx.pool.clone())
        .low_performance()
        .await?;

    let job = LowPerformanceAlarm::new(ctx.solar.clone(), snmp, capacity, alarm_config);

    for attempt in 1..=LOW_PERFORMANCE_MAX_RETRIES {
        match job.run().await {
            Ok(()) => {
                info!("low performance alarm completed");
                return Ok(());
            }
            Err(err) => {
                warn!(attempt, %err, "low performance alarm failed, retrying");
                if attempt < LOW_PERFORMANCE_MAX_RETRIES {
                    tokio::time::sleep(LOW_PERFORMANCE_RETRY_DELAY).await;
                }
            }
        }
    }

    anyhow::bail!(
        "low performance alarm failed after {LOW_PERFORMANCE_MAX_RETRIES} retries"
    )
}

pub async fn sum_performance_alarm(config: &Config) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let snmp = open_snmp(config, TrapType::SumPerformanceAlarm).await?;

    let capacity = InstalledCapacityRepo::new(ctx.pool.clone())
        .find_one()
        .await?
        .context("installed capacity not found")?;
    let alarm_config = PerformanceAlarmConfigRepo::new(ctx.pool.clone())
        .sum_performance()
        .await?;

    SumPerformanceAlarm::new(ctx.solar.clone(), snmp, capacity, alarm_config)
        .run()
        .await
}

pub async fn clear_alarm(config: &Config, performance: bool) -> Result<()> {
    let ctx = JobContext::open(config).await?;
    let snmp = open_snmp(config, TrapType::ClearAlarm).await?;
    let job = ClearAlarm::new(ctx.solar.clone(), snmp);

    if performance {
        job.clear_performance_alarms().await
    } else {
        job.run().await
    }
}
