//! Time and identifier sources
//!
//! Every timestamp written to the transfer log or the job tracker comes from a
//! [`Clock`]; every generated identifier comes from an [`IdGenerator`]. Both are
//! injected so tests can pin them down.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;

/// Timestamp source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Millisecond clock that never returns the same instant twice.
///
/// If the wall clock stalls or steps backwards, the next reading is the last
/// one plus one millisecond.
pub struct MonotonicClock {
    last_millis: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last_millis: AtomicI64::new(0),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_millis();
        loop {
            let last = self.last_millis.load(Ordering::Acquire);
            let next = if wall > last { wall } else { last + 1 };
            if self
                .last_millis
                .compare_exchange(last, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return millis_to_datetime(next);
            }
        }
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T10:00:00.123Z`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Identifier source
pub trait IdGenerator: Send + Sync {
    /// Unique transfer id (also the queue dedup id)
    fn transfer_id(&self) -> String;

    /// Job id handed to batch workers
    fn job_id(&self) -> String;

    /// Numeric suffix with exactly `digits` digits (leading zeros kept)
    fn numeric_suffix(&self, digits: usize) -> String;
}

/// Default generator: ULID transfer ids, random alphanumeric job ids,
/// random numeric suffixes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

const JOB_ID_LEN: usize = 16;

impl IdGenerator for RandomIds {
    fn transfer_id(&self) -> String {
        ulid::Ulid::new().to_string()
    }

    fn job_id(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(JOB_ID_LEN)
            .map(char::from)
            .collect()
    }

    fn numeric_suffix(&self, digits: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..digits)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }
}

/// Deterministic generator for replays and tests.
///
/// Suffixes count upwards from zero, so they never collide until the digit
/// space wraps.
pub struct SequentialIds {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl IdGenerator for SequentialIds {
    fn transfer_id(&self) -> String {
        format!("{}-tx-{}", self.prefix, self.next())
    }

    fn job_id(&self) -> String {
        format!("{}-job-{}", self.prefix, self.next())
    }

    fn numeric_suffix(&self, digits: usize) -> String {
        let modulus = 10u64.checked_pow(digits as u32).unwrap_or(u64::MAX);
        format!("{:0width$}", self.next() % modulus, width = digits)
    }
}
