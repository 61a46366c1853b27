//! Weekly active window and the sleep/wake power state machine.

use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, NaiveTime, Weekday};
use tracing::{info, warn};

use crate::config::ScheduleWindow;
use crate::error::DisplayError;

/// Length of the visible countdown before the screen goes dark.
pub const SLEEP_COUNTDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Active,
    CountingDownToSleep,
    Asleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerStateChange {
    pub from: PowerState,
    pub to: PowerState,
}

impl PowerStateChange {
    /// Leaving sleep (or an aborted countdown) must repaint the current item at once.
    pub fn is_wake(&self) -> bool {
        self.to == PowerState::Active
    }
}

/// Whether `window` covers `weekday` at `time`; a malformed window is an error.
pub fn is_active_at(
    window: &ScheduleWindow,
    weekday: Weekday,
    time: NaiveTime,
) -> Result<bool, DisplayError> {
    window
        .evaluate(weekday, time)
        .map_err(|err| DisplayError::ScheduleEvaluation(err.to_string()))
}

#[derive(Debug)]
pub struct ScheduleController {
    window: Option<ScheduleWindow>,
    state: PowerState,
    entered_at: Instant,
    countdown: Duration,
}

impl ScheduleController {
    pub fn new(window: Option<ScheduleWindow>, now: Instant) -> Self {
        Self {
            window,
            state: PowerState::Active,
            entered_at: now,
            countdown: SLEEP_COUNTDOWN,
        }
    }

    pub fn with_countdown(mut self, countdown: Duration) -> Self {
        self.countdown = countdown;
        self
    }

    pub fn current(&self) -> PowerState {
        self.state
    }

    pub fn window(&self) -> Option<&ScheduleWindow> {
        self.window.as_ref()
    }

    /// Replaces the window after a settings reload; the state follows on the next tick.
    pub fn set_window(&mut self, window: Option<ScheduleWindow>) {
        self.window = window;
    }

    /// Wall-clock check. No window means always active; evaluation errors too.
    pub fn is_active_now(&self) -> bool {
        let Some(window) = self.window.as_ref() else {
            return true;
        };
        match window.evaluate_now() {
            Ok(active) => active,
            Err(err) => {
                let err = DisplayError::ScheduleEvaluation(err.to_string());
                warn!(error = %err, "staying active");
                true
            }
        }
    }

    /// Advances the machine given whether the window currently covers `now`.
    pub fn on_tick(&mut self, active: bool, now: Instant) -> Option<PowerStateChange> {
        match (self.state, active) {
            (PowerState::Active, false) => self.goto(PowerState::CountingDownToSleep, now),
            (PowerState::CountingDownToSleep, true) | (PowerState::Asleep, true) => {
                self.goto(PowerState::Active, now)
            }
            (PowerState::CountingDownToSleep, false)
                if now.duration_since(self.entered_at) >= self.countdown =>
            {
                self.goto(PowerState::Asleep, now)
            }
            _ => None,
        }
    }

    /// Any key during the countdown skips straight to sleep.
    pub fn on_input(&mut self, now: Instant) -> Option<PowerStateChange> {
        if self.state == PowerState::CountingDownToSleep {
            return self.goto(PowerState::Asleep, now);
        }
        None
    }

    pub fn countdown_remaining(&self, now: Instant) -> Option<Duration> {
        (self.state == PowerState::CountingDownToSleep)
            .then(|| self.countdown.saturating_sub(now.duration_since(self.entered_at)))
    }

    /// When the window next opens, in the window's own clock.
    pub fn next_wake(&self) -> Option<NaiveDateTime> {
        let window = self.window.as_ref()?;
        window.next_start_after(window.local_now())
    }

    /// Lines of the countdown screen.
    pub fn sleep_message(&self, now: Instant) -> Vec<String> {
        let mut lines = vec!["Display going to sleep".to_string()];
        if let Some(window) = self.window.as_ref() {
            lines.push(format!("Active hours: {}", window.describe()));
        }
        let remaining = self.countdown_remaining(now).unwrap_or_default();
        lines.push(format!("Sleeping in {}s", remaining.as_secs_f32().ceil() as u64));
        if let Some(wake) = self.next_wake() {
            lines.push(format!("Back at {}", wake.format("%a %H:%M")));
        }
        lines
    }

    fn goto(&mut self, to: PowerState, now: Instant) -> Option<PowerStateChange> {
        if self.state == to {
            return None;
        }
        let change = PowerStateChange {
            from: self.state,
            to,
        };
        info!(from = ?change.from, to = ?change.to, "power state change");
        self.state = to;
        self.entered_at = now;
        Some(change)
    }
}
