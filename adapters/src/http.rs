// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared request plumbing for the vendor clients.
//!
//! Every vendor call goes out with the same policy: a 10 s request timeout
//! and, on transport faults or 5xx responses, up to three retries spaced a
//! fixed five minutes apart. Vendor-indicated failures inside a 2xx body
//! are the caller's business.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::error::{AdapterError, Result};

pub(crate) const DEFAULT_RETRY_COUNT: usize = 3;
pub(crate) const RETRY_INTERVAL: Duration = Duration::from_secs(300);
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn client_with_timeout() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

pub(crate) fn client_without_timeout() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().build()?)
}

pub(crate) async fn send_with_retry<F>(build: F, retries: usize) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=retries {
        if attempt > 0 {
            warn!(attempt, "retrying vendor request");
            tokio::time::sleep(RETRY_INTERVAL).await;
        }

        match build().send().await {
            Ok(resp) if resp.status().is_server_error() => {
                last_err = Some(AdapterError::HttpStatus {
                    context: resp.url().path().to_string(),
                    status: resp.status().as_u16(),
                });
            }
            Ok(resp) => return Ok(resp),
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| AdapterError::ApiError("request retries exhausted".into())))
}

pub(crate) async fn decode_json<T: DeserializeOwned>(
    resp: reqwest::Response,
    context: &str,
) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        error!(context, %status, body, "vendor call failed");
        return Err(AdapterError::HttpStatus {
            context: context.to_string(),
            status: status.as_u16(),
        });
    }

    Ok(resp.json().await?)
}
