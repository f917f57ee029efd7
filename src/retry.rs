//! Pacing helpers: jittered inter-chunk delays and per-host throttling
//!
//! Delays are deliberately randomized inside the configured window so request
//! timing does not form a fingerprint. Throttled hosts additionally get a
//! randomized pause before every individual request.

use crate::config::DownloadConfig;
use rand::Rng;
use std::time::Duration;
use url::Url;

/// Bounds for the extra pause applied per request against a throttled host
const THROTTLE_DELAY_MIN: Duration = Duration::from_millis(1000);
const THROTTLE_DELAY_MAX: Duration = Duration::from_millis(2000);

/// Pick a delay uniformly inside the configured request-delay window
///
/// An inverted or collapsed window degrades to the minimum bound.
pub fn jittered_delay(config: &DownloadConfig) -> Duration {
    jitter_between(config.min_request_delay, config.max_request_delay)
}

fn jitter_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    let offset = rand::thread_rng().gen_range(0..=span);
    min + Duration::from_millis(offset)
}

/// Sleep for a jittered delay between download chunks
pub async fn pause_between_chunks(config: &DownloadConfig) {
    let delay = jittered_delay(config);
    tracing::debug!(delay_ms = delay.as_millis() as u64, "pausing between chunks");
    tokio::time::sleep(delay).await;
}

/// The throttle pause owed for `url`, if its host is on the throttle list
///
/// Matching follows the same suffix rule as site resolution: a listed host
/// covers itself and its subdomains. The pause is jittered inside the
/// throttle window so throttled requests do not land on a fixed cadence.
pub fn throttle_delay(url: &str, config: &DownloadConfig) -> Option<Duration> {
    if config.throttled_hosts.is_empty() {
        return None;
    }
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let throttled = config.throttled_hosts.iter().any(|entry| {
        let entry = entry.to_ascii_lowercase();
        host == entry || host.ends_with(&format!(".{entry}"))
    });
    throttled.then(|| jitter_between(THROTTLE_DELAY_MIN, THROTTLE_DELAY_MAX))
}

/// Apply the per-host throttle delay before a request, when one is owed
pub async fn pause_for_host(url: &str, config: &DownloadConfig) {
    if let Some(delay) = throttle_delay(url, config) {
        tracing::debug!(url = %url, delay_ms = delay.as_millis() as u64, "throttled host, pausing");
        tokio::time::sleep(delay).await;
    }
}
