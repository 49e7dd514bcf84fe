// SPDX-License-Identifier: AGPL-3.0-or-later
//! Vendor cloud adapters for the solarwatch telemetry pipeline.
//!
//! One typed client per vendor API:
//!
//! - **Growatt** — static token header, batched realtime inverter reads
//! - **Huawei v1/v2** — XSRF cookie login with relogin-on-expiry
//! - **Kstar** — SHA1-signed query strings over an MD5 password
//! - **Solarman (INVT)** — basic/business bearer token exchange
//!
//! Clients share the same policy: 10 s request timeout and three retries at
//! a fixed five-minute interval (overridable per client), list endpoints
//! paged until the reported total is reached, every response decoded into
//! typed structs.

pub mod error;
pub mod growatt;
pub mod huawei;
pub mod huawei2;
pub mod kstar;
pub mod solarman;

mod http;

pub use error::AdapterError;
pub use growatt::GrowattClient;
pub use huawei::HuaweiClient;
pub use huawei2::Huawei2Client;
pub use kstar::KstarClient;
pub use solarman::SolarmanClient;
