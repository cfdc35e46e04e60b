//! Retry/backoff shared by the platform HTTP client, grounded on
//! `oxidicom::cube_client`'s retry loop: a fixed allow-list of retryable
//! statuses and exponential backoff capped at 20 seconds.

use reqwest::StatusCode;
use std::time::Duration;

const RETRYABLE_STATUS: [StatusCode; 8] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
    StatusCode::INSUFFICIENT_STORAGE,
    StatusCode::REQUEST_TIMEOUT,
    StatusCode::CONFLICT,
    StatusCode::TOO_MANY_REQUESTS,
];

pub fn should_retry(status: StatusCode) -> bool {
    RETRYABLE_STATUS.contains(&status)
}

/// Never exceeds 20 seconds.
pub fn backoff(attempt: u32) -> Duration {
    let seconds = std::cmp::min(2u64.pow(attempt), 20);
    Duration::from_secs(seconds)
}

pub async fn with_retry<T, F, Fut>(max_retries: u32, mut f: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let mut last_error = None;
    for attempt in 0..=max_retries {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let status = e.downcast_ref::<reqwest::Error>().and_then(|e| e.status());
                let retryable = status.map(should_retry).unwrap_or(false);
                if !retryable || attempt == max_retries {
                    return Err(e);
                }
                tracing::warn!(attempt, error = %e, "retrying platform request");
                tokio::time::sleep(backoff(attempt)).await;
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_caps_at_20_seconds() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(10), Duration::from_secs(20));
        assert_eq!(backoff(30), Duration::from_secs(20));
    }

    #[test]
    fn test_should_retry_allow_list() {
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
    }
}
