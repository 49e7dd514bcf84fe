// SPDX-License-Identifier: AGPL-3.0-or-later
//! Data layer for the solarwatch telemetry pipeline.
//!
//! Provides unified access to:
//! - Elasticsearch: daily telemetry/alarm indices and the site-station upsert
//! - Redis: the edge-state tracker for raised (device, alarm) pairs
//! - SNMP: the v1 trap fan-out to operator receivers
//! - SQLite: credential, site-region and alarm-config tables (read-only)

pub mod db;
pub mod elastic;
pub mod error;
pub mod models;
pub mod settings;
pub mod snmp;
pub mod tracker;

pub use elastic::{ElasticConfig, ElasticRepo, PerformanceBucket, SolarStore, UniquePlantBucket};
pub use error::{DataError, Result};
pub use snmp::{RecordingTrapSink, SnmpConfig, SnmpOrchestrator, TrapSink, TrapType};
pub use tracker::{KeyValueStore, MemoryStore, RedisConfig, RedisTracker};
