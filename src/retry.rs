//! Conflict-aware retry helpers for cluster API writes.
//!
//! Every multi-step update in Kerrareg follows the same optimistic-concurrency
//! sequence: re-read the object, re-apply the intended mutation on the latest
//! copy, write, and on a 409 conflict back off and try again. Blind writes are
//! forbidden - another worker (or the Module/Version handshake) may have moved
//! the object since it was first fetched.

use std::fmt::Debug;
use std::time::Duration;

use kube::api::{Api, PostParams};
use kube::Resource;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::{Error, Result};

/// Configuration for the conflict retry loop.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of write attempts before giving up.
    pub max_attempts: u32,
    /// Initial delay between attempts.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

async fn backoff(config: &RetryConfig, delay: &mut Duration, attempt: u32, operation: &str) {
    // Jitter 0.5x-1.5x to keep racing workers from re-colliding in lockstep
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

    warn!(
        operation = %operation,
        attempt = attempt,
        delay_ms = jittered.as_millis(),
        "write conflicted, retrying on latest object"
    );

    tokio::time::sleep(jittered).await;
    *delay = Duration::from_secs_f64(
        (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
    );
}

/// Re-get `name`, apply `mutate`, and replace the object, retrying on
/// conflict. Returns the object as stored by the API server.
pub async fn update_on_conflict<K, F>(api: &Api<K>, name: &str, mut mutate: F) -> Result<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Serialize,
    F: FnMut(&mut K),
{
    let config = RetryConfig::default();
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        let mut object = api.get(name).await?;
        mutate(&mut object);

        match api.replace(name, &PostParams::default(), &object).await {
            Ok(stored) => return Ok(stored),
            Err(e) if is_conflict(&e) && attempt < config.max_attempts => {
                backoff(&config, &mut delay, attempt, "update").await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::Conflict(format!(
        "update of '{name}' conflicted {} times",
        config.max_attempts
    )))
}

/// Re-get `name`, apply `mutate`, and replace the object's status
/// subresource, retrying on conflict.
pub async fn update_status_on_conflict<K, F>(api: &Api<K>, name: &str, mut mutate: F) -> Result<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Serialize,
    F: FnMut(&mut K),
{
    let config = RetryConfig::default();
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        let mut object = api.get(name).await?;
        mutate(&mut object);
        let body = serde_json::to_vec(&object)?;

        match api
            .replace_status(name, &PostParams::default(), body)
            .await
        {
            Ok(stored) => return Ok(stored),
            Err(e) if is_conflict(&e) && attempt < config.max_attempts => {
                backoff(&config, &mut delay, attempt, "update_status").await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::Conflict(format!(
        "status update of '{name}' conflicted {} times",
        config.max_attempts
    )))
}
