//! Link timers (spec §3, §4.4.5): T1 (acknowledgement, with SRT-driven
//! adaptation), T3 (idle link keepalive) and TM201 (inter-transmission gap
//! after DISC/UA before a reconnect may be attempted). All three pause while
//! the channel is busy and resume their remaining duration rather than
//! restarting, since a busy channel is not time this station controls.

use std::time::Duration;

/// Smoothed round-trip time estimator driving T1 (spec §4.4.5, mirrors the
/// classic Karn/Jacobson RTO algorithm Dire Wolf itself uses).
#[derive(Debug, Clone, Copy)]
pub struct SrtEstimator {
    srt: Duration,
    variance: Duration,
    initial: Duration,
}

impl SrtEstimator {
    pub fn new(initial: Duration) -> Self {
        Self {
            srt: initial,
            variance: initial / 2,
            initial,
        }
    }

    /// Fold in one more round-trip sample.
    pub fn sample(&mut self, rtt: Duration) {
        let delta = rtt.as_secs_f64() - self.srt.as_secs_f64();
        let srt = self.srt.as_secs_f64() + delta / 8.0;
        let variance = self.variance.as_secs_f64() + (delta.abs() - self.variance.as_secs_f64()) / 4.0;
        self.srt = Duration::from_secs_f64(srt.max(0.001));
        self.variance = Duration::from_secs_f64(variance.max(0.0));
    }

    /// Current T1 timeout: SRT plus four times the mean deviation.
    pub fn t1_timeout(&self) -> Duration {
        self.srt + self.variance * 4
    }

    pub fn reset(&mut self) {
        self.srt = self.initial;
        self.variance = self.initial / 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Stopped,
    Running,
    Paused,
}

/// A single restartable, pausable countdown timer tracked purely in terms
/// of elapsed/remaining duration; the owning thread supplies `now` so this
/// type has no dependency on a wall clock and can be driven deterministically
/// in tests.
#[derive(Debug, Clone, Copy)]
pub struct LinkTimer {
    state: RunState,
    duration: Duration,
    remaining: Duration,
}

impl LinkTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            state: RunState::Stopped,
            duration,
            remaining: duration,
        }
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn start(&mut self) {
        self.remaining = self.duration;
        self.state = RunState::Running;
    }

    pub fn stop(&mut self) {
        self.state = RunState::Stopped;
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// Freeze the remaining time without resetting it; used while the
    /// channel is busy so a T1 doesn't expire during a transmission this
    /// station can't currently make anyway.
    pub fn pause(&mut self, elapsed_since_start_or_resume: Duration) {
        if self.state == RunState::Running {
            self.remaining = self.remaining.saturating_sub(elapsed_since_start_or_resume);
            self.state = RunState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == RunState::Paused {
            self.state = RunState::Running;
        }
    }

    /// Advance a running timer by `elapsed`, returning `true` once it has
    /// expired (and stopping it so repeated ticks don't refire).
    pub fn tick(&mut self, elapsed: Duration) -> bool {
        if self.state != RunState::Running {
            return false;
        }
        if elapsed >= self.remaining {
            self.remaining = Duration::ZERO;
            self.state = RunState::Stopped;
            true
        } else {
            self.remaining -= elapsed;
            false
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_expires_after_duration() {
        let mut t = LinkTimer::new(Duration::from_millis(100));
        t.start();
        assert!(!t.tick(Duration::from_millis(50)));
        assert!(t.tick(Duration::from_millis(60)));
        assert!(!t.is_running());
    }

    #[test]
    fn pause_and_resume_preserves_remaining() {
        let mut t = LinkTimer::new(Duration::from_millis(100));
        t.start();
        t.tick(Duration::from_millis(30));
        t.pause(Duration::ZERO);
        assert!(!t.is_running());
        t.resume();
        assert!(t.is_running());
        assert!(!t.tick(Duration::from_millis(69)));
        assert!(t.tick(Duration::from_millis(1)));
    }

    #[test]
    fn srt_grows_variance_on_jitter() {
        let mut srt = SrtEstimator::new(Duration::from_millis(3000));
        let baseline = srt.t1_timeout();
        srt.sample(Duration::from_millis(200));
        srt.sample(Duration::from_millis(5000));
        assert!(srt.t1_timeout() != baseline);
    }
}
