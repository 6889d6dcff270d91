use super::map::{MapValue, VersionedMap};
use crate::error::{Result, StowError};

/// What a mutation wants to do with the current value.
#[derive(Debug, Clone)]
pub enum CasStep<V> {
    Write(V),
    /// Unconditional removal of the key.
    Remove,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome<V> {
    Written(V),
    Removed,
    /// The decision function declined to mutate the current value.
    Skipped(V),
    Absent,
}

/// Re-read `key`, let `decide` compute the next value and apply it with a
/// compare-and-swap on the version just read. A lost race re-reads and tries
/// again, up to `max_attempts` times.
pub async fn cas_retry<V, F>(
    map: &dyn VersionedMap<V>,
    key: &str,
    max_attempts: usize,
    mut decide: F,
) -> Result<CasOutcome<V>>
where
    V: MapValue,
    F: FnMut(&V) -> CasStep<V> + Send,
{
    let attempts = max_attempts.max(1);

    for attempt in 1..=attempts {
        let Some(current) = map.get(key).await? else {
            return Ok(CasOutcome::Absent);
        };

        match decide(&current.value) {
            CasStep::Skip => return Ok(CasOutcome::Skipped(current.value)),
            CasStep::Remove => {
                map.remove(key).await?;
                return Ok(CasOutcome::Removed);
            }
            CasStep::Write(next) => {
                if map.cas_replace(key, current.version, &next).await? {
                    return Ok(CasOutcome::Written(next));
                }
                tracing::debug!(
                    "Lost CAS race: key={} version={} attempt={}/{}",
                    key,
                    current.version,
                    attempt,
                    attempts
                );
            }
        }
    }

    Err(StowError::CasExhausted {
        key: key.to_string(),
        attempts,
    })
}
