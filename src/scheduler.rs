//! Cooperative Scheduler
//!
//! Named events fire after a number of seconds, at an absolute epoch
//! time, or periodically. [`Scheduler::tick`] never runs anything itself:
//! it returns the task values that came due, in registration order, and
//! the owner dispatches them.
//!
//! Registering an event under a name that is already scheduled replaces
//! the previous registration.

use heapless::Vec;

/// Scheduler errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    /// No free event slot
    Full,
}

impl core::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => write!(f, "scheduler full"),
        }
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for SchedulerError {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Full");
    }
}

/// When an event fires
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Once, after the remaining seconds have elapsed
    After(u32),
    /// Once, when the epoch clock reaches this time
    At(u32),
    /// Every `period` seconds, next time after `remaining` seconds
    Every {
        /// Period in seconds
        period: u32,
        /// Seconds until the next firing
        remaining: u32,
    },
}

impl Trigger {
    /// Check for a periodic trigger
    #[must_use]
    pub const fn is_periodic(self) -> bool {
        matches!(self, Self::Every { .. })
    }
}

#[derive(Clone, Copy, Debug)]
struct Event<T> {
    name: &'static str,
    trigger: Trigger,
    task: T,
}

/// Fixed capacity event scheduler
#[derive(Debug)]
pub struct Scheduler<T: Copy, const N: usize> {
    events: Vec<Event<T>, N>,
    last_ms: u32,
    uptime_s: u32,
    timestamp: u32,
}

impl<T: Copy, const N: usize> Default for Scheduler<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const N: usize> Scheduler<T, N> {
    /// Create a scheduler whose clock starts at 0 ms
    #[must_use]
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a scheduler whose clock starts at `now_ms`
    #[must_use]
    pub const fn starting_at(now_ms: u32) -> Self {
        Self {
            events: Vec::new(),
            last_ms: now_ms,
            uptime_s: 0,
            timestamp: 0,
        }
    }

    fn upsert(&mut self, name: &'static str, trigger: Trigger, task: T) -> Result<(), SchedulerError> {
        if let Some(ev) = self.events.iter_mut().find(|e| e.name == name) {
            ev.trigger = trigger;
            ev.task = task;
            return Ok(());
        }
        self.events
            .push(Event { name, trigger, task })
            .map_err(|_| SchedulerError::Full)
    }

    /// Fire once after `secs` seconds (0 = next tick)
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Full`] when no slot is free.
    pub fn once(&mut self, name: &'static str, secs: u32, task: T) -> Result<(), SchedulerError> {
        self.upsert(name, Trigger::After(secs), task)
    }

    /// Fire once when the epoch clock reaches `epoch`
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Full`] when no slot is free.
    pub fn once_at(&mut self, name: &'static str, epoch: u32, task: T) -> Result<(), SchedulerError> {
        self.upsert(name, Trigger::At(epoch), task)
    }

    /// Fire every `secs` seconds (at least 1)
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Full`] when no slot is free.
    pub fn every(&mut self, name: &'static str, secs: u32, task: T) -> Result<(), SchedulerError> {
        let period = secs.max(1);
        self.upsert(
            name,
            Trigger::Every {
                period,
                remaining: period,
            },
            task,
        )
    }

    /// Fire once per elapsed second
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Full`] when no slot is free.
    pub fn every_second(&mut self, name: &'static str, task: T) -> Result<(), SchedulerError> {
        self.every(name, 1, task)
    }

    /// Fire once per minute
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Full`] when no slot is free.
    pub fn every_minute(&mut self, name: &'static str, task: T) -> Result<(), SchedulerError> {
        self.every(name, 60, task)
    }

    /// Remove an event; returns whether it existed
    pub fn cancel(&mut self, name: &'static str) -> bool {
        match self.events.iter().position(|e| e.name == name) {
            Some(i) => {
                self.events.remove(i);
                true
            }
            None => false,
        }
    }

    /// Remove every non-periodic event
    pub fn reset(&mut self) {
        self.events.retain(|e| e.trigger.is_periodic());
    }

    /// Trigger of a scheduled event
    #[must_use]
    pub fn trigger(&self, name: &str) -> Option<Trigger> {
        self.events.iter().find(|e| e.name == name).map(|e| e.trigger)
    }

    /// Check if an event is scheduled
    #[must_use]
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.trigger(name).is_some()
    }

    /// Number of scheduled events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check for an empty scheduler
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Seconds since start
    #[must_use]
    pub const fn uptime(&self) -> u32 {
        self.uptime_s
    }

    /// Epoch seconds, 0 while unset
    #[must_use]
    pub const fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Set the epoch clock
    pub fn set_timestamp(&mut self, epoch: u32) {
        self.timestamp = epoch;
    }

    /// Advance the clocks and collect due tasks
    pub fn tick(&mut self, now_ms: u32) -> Vec<T, N> {
        let secs = now_ms.wrapping_sub(self.last_ms) / 1000;
        if secs > 0 {
            self.last_ms = self.last_ms.wrapping_add(secs * 1000);
            self.uptime_s = self.uptime_s.wrapping_add(secs);
            if self.timestamp != 0 {
                self.timestamp = self.timestamp.wrapping_add(secs);
            }
        }

        let mut fired = Vec::new();
        let timestamp = self.timestamp;
        let mut i = 0;
        while i < self.events.len() {
            let ev = &mut self.events[i];
            let due = match &mut ev.trigger {
                Trigger::After(remaining) => {
                    *remaining = remaining.saturating_sub(secs);
                    *remaining == 0
                }
                Trigger::At(epoch) => timestamp != 0 && timestamp >= *epoch,
                Trigger::Every { period, remaining } => {
                    if secs == 0 {
                        false
                    } else if secs >= *remaining {
                        *remaining = *period;
                        true
                    } else {
                        *remaining -= secs;
                        false
                    }
                }
            };

            if due {
                let pushed = fired.push(ev.task).is_ok();
                debug_assert!(pushed);
                if !ev.trigger.is_periodic() {
                    self.events.remove(i);
                    continue;
                }
            }
            i += 1;
        }
        fired
    }
}
