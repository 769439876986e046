use std::fmt;

/// What a single one-second tick did to the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Running(u32),
    Expired,
    AlreadyExpired,
}

/// Seconds left on a timed attempt. Never goes below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    remaining_seconds: u32,
}

impl Countdown {
    pub fn from_minutes(minutes: u32) -> Self {
        Self {
            remaining_seconds: minutes.saturating_mul(60),
        }
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    /// Decrements by one second. Reports `Expired` only on the tick that
    /// reaches zero; later ticks leave the countdown at zero.
    pub fn tick(&mut self) -> Tick {
        if self.remaining_seconds == 0 {
            return Tick::AlreadyExpired;
        }
        self.remaining_seconds -= 1;
        if self.remaining_seconds == 0 {
            Tick::Expired
        } else {
            Tick::Running(self.remaining_seconds)
        }
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_time(self.remaining_seconds))
    }
}

/// `m:ss`, e.g. 125 seconds is "2:05".
pub fn format_time(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
