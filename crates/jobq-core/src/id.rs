//! Record identifiers.
//!
//! Job ids are ULIDs: a 48-bit millisecond timestamp of the job's
//! `process_at` followed by 80 bits of randomness, rendered as 26 Crockford
//! base32 characters. Lexical order of ids therefore follows due time, which
//! lets the queue find the earliest scheduled row with `MIN(id)`.

use crate::{CoreError, CoreResult};
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use ulid::Ulid;
use uuid::Uuid;

const RANDOM_MASK: u128 = (1 << 80) - 1;

/// Largest millisecond timestamp a ULID can carry.
const MAX_ID_MILLIS: u64 = (1 << 48) - 1;

/// Produces record ids for a given due time.
pub trait IdGenerator: Send + Sync {
    /// Generates a new id for a job due at `process_at`.
    ///
    /// Fails with [`CoreError::ProcessAtOutOfRange`] when the id cannot
    /// encode `process_at`.
    fn generate(&self, process_at: DateTime<Utc>) -> CoreResult<String>;
}

/// Time-prefixed id generator.
///
/// One random source per generator, guarded by a mutex. Ids generated for
/// the same millisecond increment the random part, so a single generator
/// never hands out the same id twice and ids stay strictly increasing.
pub struct TimeBasedIdGenerator {
    state: Mutex<GeneratorState>,
}

struct GeneratorState {
    rng: StdRng,
    last_millis: u64,
    last_random: u128,
}

impl TimeBasedIdGenerator {
    /// Creates a generator seeded from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Creates a generator from an explicit random source.
    #[must_use]
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(GeneratorState {
                rng,
                last_millis: 0,
                last_random: 0,
            }),
        }
    }

    fn next_ulid(&self, millis: u64) -> Ulid {
        let mut state = self.state.lock();
        let random = if millis == state.last_millis && state.last_random < RANDOM_MASK {
            state.last_random + 1
        } else {
            state.rng.gen::<u128>() & RANDOM_MASK
        };
        state.last_millis = millis;
        state.last_random = random;
        Ulid::from_parts(millis, random)
    }
}

impl Default for TimeBasedIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimeBasedIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeBasedIdGenerator").finish_non_exhaustive()
    }
}

impl IdGenerator for TimeBasedIdGenerator {
    fn generate(&self, process_at: DateTime<Utc>) -> CoreResult<String> {
        let millis = u64::try_from(process_at.timestamp_millis())
            .ok()
            .filter(|millis| *millis <= MAX_ID_MILLIS)
            .ok_or(CoreError::ProcessAtOutOfRange { process_at })?;
        Ok(self.next_ulid(millis).to_string())
    }
}

/// Purely random ids with no time ordering.
///
/// Ids from this generator cannot be passed to [`record_id_to_time`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomUuidIdGenerator;

impl IdGenerator for RandomUuidIdGenerator {
    fn generate(&self, _process_at: DateTime<Utc>) -> CoreResult<String> {
        Ok(Uuid::new_v4().to_string())
    }
}

/// Decodes the millisecond timestamp embedded in a time-prefixed id.
pub fn record_id_to_time(id: &str) -> CoreResult<DateTime<Utc>> {
    let ulid = Ulid::from_string(id).map_err(|source| CoreError::InvalidId {
        id: id.to_string(),
        source,
    })?;
    let millis = ulid.timestamp_ms();
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| CoreError::TimestampOutOfRange {
            id: id.to_string(),
            millis,
        })
}

/// Drops sub-second precision from a due time.
#[must_use]
pub fn truncate_to_second(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(0)
}
