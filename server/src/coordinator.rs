//! Per-session rebuild state machine
//!
//! Owns the session's latest parameter snapshot and decides when a mesh build
//! may start. It performs no I/O and keeps no timers: the session actor feeds
//! it events and acts on what it returns.
//!
//! ```text
//!   set ──> Idle ──(schedule debounce)──> Debouncing ──(elapsed)──> Building
//!                                                                    │   ▲
//!                       Idle <──(finished, nothing pending)──────────┘   │
//!                                 (finished, pending) ───────────────────┘
//! ```
//!
//! At most one build is in flight. Any number of edits that land during a
//! build collapse into one follow-up build of the newest snapshot.

use gn_packet::{ParameterMap, ParameterSnapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    /// A debounce timer is running; no build yet.
    Debouncing,
    Building,
}

/// What the caller has to do after a `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Start the debounce timer.
    ScheduleDebounce,
    /// A timer is already running and will pick the edit up.
    Absorbed,
    /// A build is running; one follow-up is queued.
    Queued,
}

#[derive(Debug, Default)]
pub struct Coordinator {
    latest: ParameterSnapshot,
    phase: Phase,
    pending: bool,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> &ParameterSnapshot {
        &self.latest
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn on_set(&mut self, values: &ParameterMap) -> SetOutcome {
        self.latest = self.latest.merged(values);
        self.request_build()
    }

    /// Scene or script changed on disk: rebuild with the current values.
    pub fn on_external_change(&mut self) -> SetOutcome {
        self.request_build()
    }

    fn request_build(&mut self) -> SetOutcome {
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::Debouncing;
                SetOutcome::ScheduleDebounce
            }
            Phase::Debouncing => SetOutcome::Absorbed,
            Phase::Building => {
                self.pending = true;
                SetOutcome::Queued
            }
        }
    }

    /// Returns the snapshot to build, taken now rather than when the timer started.
    pub fn on_debounce_elapsed(&mut self) -> Option<ParameterSnapshot> {
        if self.phase != Phase::Debouncing {
            return None;
        }
        self.phase = Phase::Building;
        Some(self.latest.clone())
    }

    /// Returns the snapshot for the follow-up build, if edits arrived meanwhile.
    pub fn on_build_finished(&mut self) -> Option<ParameterSnapshot> {
        if self.phase != Phase::Building {
            return None;
        }
        if self.pending {
            self.pending = false;
            Some(self.latest.clone())
        } else {
            self.phase = Phase::Idle;
            None
        }
    }
}
