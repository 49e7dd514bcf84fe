// SPDX-License-Identifier: AGPL-3.0-or-later
//! solarwatch — multi-vendor solar plant telemetry jobs.
//!
//! Every subcommand is a one-shot invocation meant to be driven by an
//! external scheduler (see the crontab block of the config file).

mod config;
mod jobs;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "solarwatch", version, about = "Solar fleet telemetry pipeline jobs")]
struct Cli {
    /// Path to the config file (default: ./solarwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll a vendor cloud and index plant/device/alarm documents
    Collect {
        #[arg(long, value_enum)]
        vendor: CollectVendor,
    },
    /// Evaluate device state against the tracker and send raise/clear traps
    Alarm {
        #[arg(long, value_enum)]
        vendor: AlarmVendor,
    },
    /// Run a performance alarm aggregation over recent history
    Performance {
        #[arg(long, value_enum)]
        kind: PerformanceKind,
    },
    /// Send the daily blanket CLEAR traps
    ClearAlarm {
        /// Clear yesterday's performance alarms instead of device alarms
        #[arg(long)]
        performance: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CollectVendor {
    Growatt,
    Huawei,
    Huawei2,
    Kstar,
    Solarman,
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum AlarmVendor {
    Growatt,
    Huawei,
    Kstar,
    Solarman,
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum PerformanceKind {
    Low,
    Sum,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Collect { vendor } => match vendor {
            CollectVendor::Growatt => jobs::growatt_collect(&config).await,
            CollectVendor::Huawei => jobs::huawei_collect(&config).await,
            CollectVendor::Huawei2 => jobs::huawei2_collect(&config).await,
            CollectVendor::Kstar => jobs::kstar_collect(&config).await,
            CollectVendor::Solarman => jobs::solarman_collect(&config).await,
            CollectVendor::All => {
                jobs::growatt_collect(&config).await?;
                jobs::huawei_collect(&config).await?;
                jobs::huawei2_collect(&config).await?;
                jobs::kstar_collect(&config).await?;
                jobs::solarman_collect(&config).await
            }
        },
        Command::Alarm { vendor } => match vendor {
            AlarmVendor::Growatt => jobs::growatt_alarm(&config).await,
            AlarmVendor::Huawei => jobs::huawei_alarm(&config).await,
            AlarmVendor::Kstar => jobs::kstar_alarm(&config).await,
            AlarmVendor::Solarman => jobs::solarman_alarm(&config).await,
            AlarmVendor::All => {
                jobs::growatt_alarm(&config).await?;
                jobs::huawei_alarm(&config).await?;
                jobs::kstar_alarm(&config).await?;
                jobs::solarman_alarm(&config).await
            }
        },
        Command::Performance { kind } => match kind {
            PerformanceKind::Low => jobs::low_performance_alarm(&config).await,
            PerformanceKind::Sum => jobs::sum_performance_alarm(&config).await,
        },
        Command::ClearAlarm { performance } => jobs::clear_alarm(&config, performance).await,
    }
}
