use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::module::Specifier;

/// Per-specifier deadline map.
///
/// Scheduling a specifier that is already pending replaces its deadline, so
/// only the last event in a burst fires. Pure timing: the caller supplies
/// `now`.
pub(crate) struct Debouncer {
    window: Duration,
    deadlines: FxHashMap<Specifier, Instant>,
}

impl Debouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            deadlines: FxHashMap::default(),
        }
    }

    pub(crate) fn schedule(&mut self, specifier: Specifier, now: Instant) {
        let deadline = now + self.window;
        if self.deadlines.insert(specifier.clone(), deadline).is_some() {
            crate::debug!("watch"; "rescheduled {}", specifier);
        }
    }

    /// Earliest pending deadline.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every specifier whose deadline has passed, in
    /// deadline order.
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<Specifier> {
        let mut due: Vec<(Instant, Specifier)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(spec, deadline)| (*deadline, spec.clone()))
            .collect();
        for (_, spec) in &due {
            self.deadlines.remove(spec);
        }
        due.sort();
        due.into_iter().map(|(_, spec)| spec).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub(crate) fn clear(&mut self) {
        self.deadlines.clear();
    }
}
