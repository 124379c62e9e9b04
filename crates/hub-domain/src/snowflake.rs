use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::DomainError;

/// Worker IDs 0–10 are reserved for hub infrastructure.
pub const INFRA_WORKER_ID_MAX: u16 = 10;
/// First worker ID allocatable to an instance.
pub const WORKER_ID_MIN: u16 = 11;
/// Worker IDs occupy 10 bits.
pub const WORKER_ID_MAX: u16 = 1023;

/// Custom epoch: 2024-01-01T00:00:00Z, milliseconds.
const EPOCH_MS: u64 = 1_704_067_200_000;

const WORKER_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Snowflake-style ID generator: 41 bits of milliseconds since [`EPOCH_MS`],
/// 10 bits of worker ID, 12 bits of per-millisecond sequence.
///
/// One generator per process, worker ID fixed at startup. The hub itself
/// runs on a reserved infrastructure worker ID; each instance is handed its
/// own ID from the registry.
#[derive(Debug)]
pub struct Snowflake {
    worker_id: u16,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    last_ms: u64,
    sequence: u64,
}

impl Snowflake {
    pub fn new(worker_id: u16) -> Result<Self, DomainError> {
        if worker_id > WORKER_ID_MAX {
            return Err(DomainError::InvalidWorkerId(worker_id));
        }
        Ok(Self { worker_id, state: Mutex::new(State::default()) })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// Generate the next ID. Monotonic per generator; blocks (spins on the
    /// clock) only when a single millisecond overflows its 4096-ID sequence.
    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock().expect("snowflake state poisoned");
        let mut now = Self::now_ms();
        // Tolerate small clock steps backwards by continuing from last_ms.
        if now < state.last_ms {
            now = state.last_ms;
        }
        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                while now <= state.last_ms {
                    now = Self::now_ms();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        let ts = now - EPOCH_MS;
        ((ts << (WORKER_BITS + SEQUENCE_BITS))
            | ((self.worker_id as u64) << SEQUENCE_BITS)
            | state.sequence) as i64
    }

    /// Extract the worker ID embedded in an ID. Useful for audit tooling.
    pub fn worker_id_of(id: i64) -> u16 {
        ((id as u64 >> SEQUENCE_BITS) & ((1 << WORKER_BITS) - 1)) as u16
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64
    }
}
