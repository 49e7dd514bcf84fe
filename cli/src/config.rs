// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the solarwatch jobs.
//!
//! Loaded from `solarwatch.toml` (or `SOLARWATCH_CONFIG`), with environment
//! overrides for the connection secrets. The crontab block is not consumed
//! by the binary itself; it documents the schedule contract for the
//! external scheduler that invokes these one-shot jobs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solarwatch_data::{ElasticConfig, RedisConfig, SnmpConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub elasticsearch: ElasticsearchConfig,
    pub redis: RedisSettings,
    pub database: DatabaseConfig,
    pub snmp_list: Vec<SnmpReceiver>,
    pub crontab: CrontabConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:9200".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub db: i64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            username: String::new(),
            password: String::new(),
            db: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "database.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnmpReceiver {
    pub agent_host: String,
    pub target_host: String,
    pub target_port: u16,
}

/// Schedule contract (Asia/Bangkok) for the external scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrontabConfig {
    pub collect_day_time: String,
    pub collect_night_time: String,
    pub alarm_time: String,
    pub clear_alarm_time: String,
    pub clear_performance_alarm_time: String,
    pub low_performance_alarm_time: String,
    pub sum_performance_alarm_time: String,
    pub timezone: String,
}

impl Default for CrontabConfig {
    fn default() -> Self {
        Self {
            collect_day_time: "*/16 7-19 * * *".to_string(),
            collect_night_time: "1 1-6 * * *".to_string(),
            alarm_time: "*/15 7-18 * * *".to_string(),
            clear_alarm_time: "0 6 * * *".to_string(),
            clear_performance_alarm_time: "0 6 * * *".to_string(),
            low_performance_alarm_time: "0 8 * * *".to_string(),
            sum_performance_alarm_time: "*/10 * * * *".to_string(),
            timezone: "Asia/Bangkok".to_string(),
        }
    }
}

impl Config {
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path: PathBuf = match explicit {
            Some(path) => path.to_path_buf(),
            None => std::env::var("SOLARWATCH_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("solarwatch.toml")),
        };

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env_vars();
        Ok(config)
    }

    fn apply_env_vars(&mut self) {
        if let Ok(host) = std::env::var("SOLARWATCH_ELASTIC_HOST") {
            self.elasticsearch.host = host;
        }
        if let Ok(password) = std::env::var("SOLARWATCH_ELASTIC_PASSWORD") {
            self.elasticsearch.password = password;
        }
        if let Ok(host) = std::env::var("SOLARWATCH_REDIS_HOST") {
            self.redis.host = host;
        }
        if let Ok(password) = std::env::var("SOLARWATCH_REDIS_PASSWORD") {
            self.redis.password = password;
        }
        if let Ok(path) = std::env::var("SOLARWATCH_DATABASE_PATH") {
            self.database.path = path;
        }
    }

    pub fn elastic(&self) -> ElasticConfig {
        ElasticConfig {
            host: self.elasticsearch.host.clone(),
            username: self.elasticsearch.username.clone(),
            password: self.elasticsearch.password.clone(),
        }
    }

    pub fn redis(&self) -> RedisConfig {
        RedisConfig {
            host: self.redis.host.clone(),
            port: self.redis.port,
            username: self.redis.username.clone(),
            password: self.redis.password.clone(),
            db: self.redis.db,
        }
    }

    pub fn snmp_receivers(&self) -> Vec<SnmpConfig> {
        self.snmp_list
            .iter()
            .map(|r| SnmpConfig {
                agent_host: r.agent_host.clone(),
                target_host: r.target_host.clone(),
                target_port: r.target_port,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_the_schedule_contract() {
        let config = Config::default();
        assert_eq!(config.crontab.collect_day_time, "*/16 7-19 * * *");
        assert_eq!(config.crontab.sum_performance_alarm_time, "*/10 * * * *");
        assert_eq!(config.crontab.timezone, "Asia/Bangkok");
        assert!(config.snmp_list.is_empty());
    }

    #[test]
    fn toml_overrides_defaults() {
        let raw = r#"
            [elasticsearch]
            host = "https://search.internal:9200"
            username = "ops"
            password = "secret"

            [[snmp_list]]
            agent_host = "10.1.0.9"
            target_host = "nms.internal"
            target_port = 162

            [redis]
            host = "cache.internal"
            db = 3
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.elasticsearch.host, "https://search.internal:9200");
        assert_eq!(config.snmp_list.len(), 1);
        assert_eq!(config.snmp_list[0].target_port, 162);
        assert_eq!(config.redis.db, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.database.path, "database.db");
    }
}
