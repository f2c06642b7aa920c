use crate::config::{CTRL_DROP_THRESHOLD, CTRL_GROW_THRESHOLD, CTRL_MIN_STEP};
use crate::time::{Duration, Instant};

/// Congestion control algorithm selected for a [`Host`](struct.Host.html).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CongestionControl {
    /// Always send at `max_send_rate`.
    None,
    /// Adjust the send-rate ceiling to the observed transmission success.
    #[default]
    Rate,
}

/// Transmission counters of one measurement window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CtrlStat {
    pub packet_post: u32,
    pub packet_post_succ: u32,
    pub bytes_post: u64,
    pub bytes_post_succ: u64,
}

impl CtrlStat {
    /// Successful posts per mille, or `None` if nothing was posted.
    fn success_ratio(&self) -> Option<u32> {
        if self.packet_post == 0 {
            return None;
        }
        Some((self.packet_post_succ as u64 * 1000 / self.packet_post as u64) as u32)
    }
}

#[allow(unused_variables)]
pub(crate) trait Controller {
    /// Returns the current send-rate ceiling, in bytes per second.
    fn rate(&self) -> u32;

    /// Account for one datagram handed to the device.
    fn on_post(&mut self, len: usize, success: bool) {}

    fn on_rtt(&mut self, rtt: Duration) {}

    /// Close the measurement window if it has elapsed.
    ///
    /// `busy` selects the window length: whether any flow has data queued
    /// or in flight.
    fn update(&mut self, now: Instant, busy: bool) {}
}

#[derive(Debug)]
pub(crate) struct NoControl {
    rate: u32,
}

impl NoControl {
    pub(crate) fn new(rate: u32) -> NoControl {
        NoControl { rate }
    }
}

impl Controller for NoControl {
    fn rate(&self) -> u32 {
        self.rate
    }
}

/// Ceiling adjustment driven by the share of successful posts.
#[derive(Debug)]
pub(crate) struct RateControl {
    rate: u32,
    min_rate: u32,
    max_rate: u32,
    busy_window: Duration,
    idle_window: Duration,
    window_start: Option<Instant>,
    stat: CtrlStat,
    rtt: Option<Duration>,
}

impl RateControl {
    pub(crate) fn new(
        min_rate: u32,
        max_rate: u32,
        busy_window: Duration,
        idle_window: Duration,
    ) -> RateControl {
        RateControl {
            rate: max_rate,
            min_rate,
            max_rate,
            busy_window,
            idle_window,
            window_start: None,
            stat: CtrlStat::default(),
            rtt: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn stat(&self) -> &CtrlStat {
        &self.stat
    }

    pub(crate) fn clear_stat(&mut self) {
        self.stat = CtrlStat::default();
    }

    fn adjust(&mut self) {
        let Some(ratio) = self.stat.success_ratio() else {
            return;
        };
        let prev = self.rate;
        if ratio < CTRL_DROP_THRESHOLD {
            self.rate = ((self.rate as u64 * 3 / 4) as u32).max(self.min_rate);
        } else if ratio >= CTRL_GROW_THRESHOLD {
            let step = (self.rate / 8).max(CTRL_MIN_STEP);
            self.rate = self.rate.saturating_add(step).min(self.max_rate);
        }
        if prev != self.rate {
            net_debug!(
                "ctrl: success={}‰ ({}/{} bytes) rtt={:?} rate {} -> {}",
                ratio,
                self.stat.bytes_post_succ,
                self.stat.bytes_post,
                self.rtt.map(|rtt| rtt.total_millis()),
                prev,
                self.rate
            );
        }
    }
}

impl Controller for RateControl {
    fn rate(&self) -> u32 {
        self.rate
    }

    fn on_post(&mut self, len: usize, success: bool) {
        self.stat.packet_post += 1;
        self.stat.bytes_post += len as u64;
        if success {
            self.stat.packet_post_succ += 1;
            self.stat.bytes_post_succ += len as u64;
        }
    }

    fn on_rtt(&mut self, rtt: Duration) {
        self.rtt = Some(rtt);
    }

    fn update(&mut self, now: Instant, busy: bool) {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return;
        };
        let window = if busy {
            self.busy_window
        } else {
            self.idle_window
        };
        if now.saturating_duration_since(start) < window {
            return;
        }
        self.adjust();
        self.clear_stat();
        self.window_start = Some(now);
    }
}

#[derive(Debug)]
pub(crate) enum AnyController {
    None(NoControl),
    Rate(RateControl),
}

impl AnyController {
    pub(crate) fn new(config: &super::Config) -> AnyController {
        match config.congestion_control {
            CongestionControl::None => AnyController::None(NoControl::new(config.max_send_rate)),
            CongestionControl::Rate => AnyController::Rate(RateControl::new(
                config.min_send_rate,
                config.max_send_rate,
                config.ctrl_busy_window,
                config.ctrl_idle_window,
            )),
        }
    }

    #[inline]
    pub(crate) fn inner_mut(&mut self) -> &mut dyn Controller {
        match self {
            AnyController::None(n) => n,
            AnyController::Rate(r) => r,
        }
    }

    #[inline]
    pub(crate) fn inner(&self) -> &dyn Controller {
        match self {
            AnyController::None(n) => n,
            AnyController::Rate(r) => r,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const MIN: u32 = 64 * 1024;
    const MAX: u32 = 4 * 1024 * 1024;

    fn controller() -> RateControl {
        RateControl::new(
            MIN,
            MAX,
            Duration::from_millis(100),
            Duration::from_millis(1000),
        )
    }

    fn post(ctrl: &mut RateControl, total: u32, failed: u32) {
        for i in 0..total {
            ctrl.on_post(1024, i >= failed);
        }
    }

    #[test]
    fn test_nothing_posted_keeps_rate() {
        let mut ctrl = controller();
        ctrl.update(Instant::from_millis(0), true);
        ctrl.update(Instant::from_millis(100), true);
        assert_eq!(ctrl.rate(), MAX);
    }

    #[test]
    fn test_window_not_elapsed() {
        let mut ctrl = controller();
        ctrl.update(Instant::from_millis(0), true);
        post(&mut ctrl, 100, 50);
        ctrl.update(Instant::from_millis(50), true);
        assert_eq!(ctrl.rate(), MAX);
        assert_eq!(ctrl.stat().packet_post, 100);
    }

    #[test]
    fn test_idle_window_is_longer() {
        let mut ctrl = controller();
        ctrl.update(Instant::from_millis(0), false);
        post(&mut ctrl, 100, 50);
        ctrl.update(Instant::from_millis(500), false);
        assert_eq!(ctrl.rate(), MAX);
        ctrl.update(Instant::from_millis(1000), false);
        assert_eq!(ctrl.rate(), MAX / 4 * 3);
    }

    #[test]
    fn test_drop_then_recover() {
        let mut ctrl = controller();
        let mut now = Instant::from_millis(0);
        ctrl.update(now, true);

        // 20% failures over one window.
        post(&mut ctrl, 100, 20);
        now += Duration::from_millis(100);
        ctrl.update(now, true);
        let dropped = ctrl.rate();
        assert!(dropped < MAX);
        assert_eq!(ctrl.stat(), &CtrlStat::default());

        // Sustained success grows the ceiling back, never beyond the maximum.
        let mut prev = dropped;
        for _ in 0..32 {
            post(&mut ctrl, 100, 0);
            now += Duration::from_millis(100);
            ctrl.update(now, true);
            assert!(ctrl.rate() >= prev);
            assert!(ctrl.rate() <= MAX);
            if prev < MAX {
                assert!(ctrl.rate() > prev);
            }
            prev = ctrl.rate();
        }
        assert_eq!(ctrl.rate(), MAX);
    }

    #[test]
    fn test_floor() {
        let mut ctrl = controller();
        let mut now = Instant::from_millis(0);
        ctrl.update(now, true);
        for _ in 0..64 {
            post(&mut ctrl, 10, 10);
            now += Duration::from_millis(100);
            ctrl.update(now, true);
        }
        assert_eq!(ctrl.rate(), MIN);
    }

    #[test]
    fn test_middle_band_holds() {
        let mut ctrl = controller();
        ctrl.update(Instant::from_millis(0), true);
        post(&mut ctrl, 100, 5);
        ctrl.update(Instant::from_millis(100), true);
        assert_eq!(ctrl.rate(), MAX);
    }
}
