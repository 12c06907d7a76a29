use crate::core::state::CooldownState;
use anyhow::{bail, Result};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct Slot {
    state: CooldownState,
    in_flight: bool,
}

/// Process-wide holder of the [`CooldownState`]. Checking the window and
/// claiming a generation happen under one lock, so two requests cannot both
/// pass the check.
#[derive(Debug)]
pub struct CooldownStore {
    window_secs: u64,
    slot: Mutex<Slot>,
}

impl CooldownStore {
    pub fn new(state: CooldownState, window_secs: u64) -> Self {
        Self {
            window_secs,
            slot: Mutex::new(Slot { state, in_flight: false }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CooldownState {
        self.lock().state
    }

    pub fn get_last_generation_time(&self) -> Option<u64> {
        self.lock().state.last_generation_time
    }

    pub fn set_last_generation_time(&self, now: u64) {
        let mut slot = self.lock();
        slot.state = slot.state.recorded(now);
    }

    /// Claims the right to generate a book. Fails while another generation
    /// holds a permit or while the window since the last one is still open.
    pub fn try_begin(&self, now: u64) -> Result<GenerationPermit<'_>> {
        let mut slot = self.lock();
        if slot.in_flight {
            bail!("Another book is already being generated");
        }
        if let Some(remaining) = slot.state.remaining(now, self.window_secs) {
            bail!("Please wait {} more seconds before generating another book", remaining);
        }
        slot.in_flight = true;
        Ok(GenerationPermit { store: self, finished: false })
    }
}

/// Held for the duration of one generation. Dropping it without calling
/// [`GenerationPermit::complete`] releases the claim without starting a
/// new cooldown window.
#[derive(Debug)]
pub struct GenerationPermit<'a> {
    store: &'a CooldownStore,
    finished: bool,
}

impl GenerationPermit<'_> {
    pub fn complete(mut self, state: CooldownState) {
        let mut slot = self.store.lock();
        slot.state = state;
        slot.in_flight = false;
        self.finished = true;
    }
}

impl Drop for GenerationPermit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.store.lock().in_flight = false;
        }
    }
}
