/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rand::{thread_rng, Rng};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Sends the request built by `build`, retrying transport errors, 429 and 5xx
/// responses with jittered exponential backoff. The last response is returned
/// as-is, even when it is an error status.
pub async fn send_with_retry<F>(mut build: F, attempts: u32) -> reqwest::Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    let max_attempts = attempts.clamp(1, 5);
    let mut backoff = Duration::from_millis(200);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let last = attempt >= max_attempts;
        match build().send().await {
            Ok(resp) => {
                if should_retry_status(resp.status()) && !last {
                    sleep_with_jitter(backoff).await;
                    backoff = next_backoff(backoff, MAX_BACKOFF);
                    continue;
                }
                return Ok(resp);
            }
            Err(e) => {
                if last {
                    return Err(e);
                }
                sleep_with_jitter(backoff).await;
                backoff = next_backoff(backoff, MAX_BACKOFF);
            }
        }
    }
}

pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn sleep_with_jitter(base: Duration) {
    let jitter_ms: u64 = thread_rng().gen_range(0..=200);
    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
}
