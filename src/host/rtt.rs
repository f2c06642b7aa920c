use crate::time::Duration;

// Until a round-trip time measurement has been made the retransmission
// timeout starts here.
const RTTE_INITIAL_RTO: u32 = 500;

// Minimum "safety margin" for the RTO that kicks in when the
// variance gets very low.
const RTTE_MIN_MARGIN: u32 = 5;

/// K, according to RFC 6298
const RTTE_K: u32 = 4;

// Datagram paths are expected to be far faster than what RFC 6298 assumes,
// so the bounds are tighter than its 1 s / 60 s.
const RTTE_MIN_RTO: u32 = 50;
const RTTE_MAX_RTO: u32 = 10_000;

/// Per-flow round-trip estimator, RFC 6298 style.
///
/// Backoff on retransmission is applied by the scheduler through the
/// entry's turn counter, so the estimator itself only forgets stale
/// measurements.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RttEstimator {
    /// true if we have made at least one rtt measurement.
    have_measurement: bool,
    // Using u32 instead of Duration to save space.
    /// Smoothed RTT
    srtt: u32,
    /// RTT variance.
    rttvar: u32,
    /// Retransmission Time-Out
    rto: u32,
    rto_count: u8,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self {
            have_measurement: false,
            srtt: 0,   // ignored, will be overwritten on first measurement.
            rttvar: 0, // ignored, will be overwritten on first measurement.
            rto: RTTE_INITIAL_RTO,
            rto_count: 0,
        }
    }
}

impl RttEstimator {
    pub(crate) fn retransmission_timeout(&self) -> Duration {
        Duration::from_millis(self.rto as _)
    }

    /// Smoothed round-trip time, if any sample was taken.
    pub(crate) fn srtt(&self) -> Option<Duration> {
        self.have_measurement
            .then(|| Duration::from_millis(self.srtt as _))
    }

    pub(crate) fn sample(&mut self, new_rtt: u32) {
        if self.have_measurement {
            // RFC 6298 (2.3) When a subsequent RTT measurement R' is made, a host MUST set (...)
            let diff = (self.srtt as i32 - new_rtt as i32).unsigned_abs();
            self.rttvar = (self.rttvar * 3 + diff).div_ceil(4);
            self.srtt = (self.srtt * 7 + new_rtt).div_ceil(8);
        } else {
            // RFC 6298 (2.2) When the first RTT measurement R is made, the host MUST set (...)
            self.have_measurement = true;
            self.srtt = new_rtt;
            self.rttvar = new_rtt / 2;
        }

        // RFC 6298 (2.2), (2.3)
        let margin = RTTE_MIN_MARGIN.max(self.rttvar * RTTE_K);
        self.rto = (self.srtt + margin).clamp(RTTE_MIN_RTO, RTTE_MAX_RTO);

        self.rto_count = 0;

        net_trace!(
            "rtte: sample={:?} srtt={:?} rttvar={:?} rto={:?}",
            new_rtt,
            self.srtt,
            self.rttvar,
            self.rto
        );
    }

    pub(crate) fn on_retransmit(&mut self) {
        // RFC 6298: a TCP implementation MAY clear SRTT and RTTVAR after
        // backing off the timer multiple times as it is likely that the current
        // SRTT and RTTVAR are bogus in this situation.
        self.rto_count = self.rto_count.saturating_add(1);
        if self.rto_count >= 3 && self.have_measurement {
            self.rto_count = 0;
            self.have_measurement = false;
            net_trace!("rtte: too many retransmissions, clearing srtt, rttvar.");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_initial_rto() {
        let rtte = RttEstimator::default();
        assert_eq!(rtte.retransmission_timeout(), Duration::from_millis(500));
        assert_eq!(rtte.srtt(), None);
    }

    #[test]
    fn test_first_sample() {
        let mut rtte = RttEstimator::default();
        rtte.sample(100);
        assert_eq!(rtte.srtt(), Some(Duration::from_millis(100)));
        // srtt + 4 * rttvar = 100 + 4 * 50
        assert_eq!(rtte.retransmission_timeout(), Duration::from_millis(300));
    }

    #[test]
    fn test_rto_bounds() {
        let mut rtte = RttEstimator::default();
        for _ in 0..20 {
            rtte.sample(1);
        }
        assert_eq!(rtte.retransmission_timeout(), Duration::from_millis(50));

        let mut rtte = RttEstimator::default();
        rtte.sample(20_000);
        assert_eq!(rtte.retransmission_timeout(), Duration::from_millis(10_000));
    }

    #[test]
    fn test_retransmits_clear_measurement() {
        let mut rtte = RttEstimator::default();
        rtte.sample(100);
        rtte.on_retransmit();
        rtte.on_retransmit();
        assert!(rtte.srtt().is_some());
        rtte.on_retransmit();
        assert_eq!(rtte.srtt(), None);

        // The next sample starts over.
        rtte.sample(40);
        assert_eq!(rtte.srtt(), Some(Duration::from_millis(40)));
    }
}
