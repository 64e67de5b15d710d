//! Single-flight, delay-after-completion periodic loops.
//!
//! A loop is either `Idle` or `Running`. An activation that finds it
//! `Running` returns immediately; nothing is queued. After each cycle,
//! successful or not, the loop goes back to `Idle` and the next activation
//! is scheduled `interval` after completion.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Idle,
    Running,
}

#[derive(Debug)]
pub struct SingleFlight {
    state: Mutex<FlightState>,
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self {
            state: Mutex::new(FlightState::Idle),
        }
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FlightState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move Idle -> Running. The guard moves back to Idle when dropped.
    pub fn try_begin(&self) -> Option<FlightGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            FlightState::Running => None,
            FlightState::Idle => {
                *state = FlightState::Running;
                Some(FlightGuard { flight: self })
            }
        }
    }
}

#[must_use]
pub struct FlightGuard<'a> {
    flight: &'a SingleFlight,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        *self.flight.state.lock().unwrap_or_else(|e| e.into_inner()) = FlightState::Idle;
    }
}

/// One unit of periodic work.
#[async_trait]
pub trait Cycle: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> eyre::Result<()>;
}

pub struct Scheduler<C> {
    cycle: C,
    interval: Duration,
    flight: SingleFlight,
}

impl<C: Cycle + 'static> Scheduler<C> {
    pub fn new(cycle: C, interval: Duration) -> Self {
        Self {
            cycle,
            interval,
            flight: SingleFlight::new(),
        }
    }

    pub fn cycle(&self) -> &C {
        &self.cycle
    }

    pub fn state(&self) -> FlightState {
        self.flight.state()
    }

    /// Run one cycle unless one is already in flight. Returns whether a
    /// cycle ran. Errors are logged, never returned.
    pub async fn trigger(&self) -> bool {
        let Some(_guard) = self.flight.try_begin() else {
            tracing::info!(cycle = self.cycle.name(), "Previous cycle still running, skipping");
            return false;
        };

        if let Err(e) = self.cycle.run().await {
            tracing::error!(cycle = self.cycle.name(), error = %e, "Cycle failed");
        }
        true
    }

    /// Trigger immediately, then again `interval` after each completion,
    /// until `shutdown` is cancelled. An in-flight cycle is never aborted.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            cycle = self.cycle.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Scheduler started"
        );

        while !shutdown.is_cancelled() {
            self.trigger().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!(cycle = self.cycle.name(), "Scheduler stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
