use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The retransmission timeout never drops below this floor.
const MIN_RTO: Duration = Duration::from_millis(20);

const INITIAL_SRTT: Duration = Duration::from_millis(500);
const INITIAL_RTTVAR: Duration = Duration::from_millis(125);

const ALPHA: f64 = 0.125;
const BETA: f64 = 0.25;

/// Retransmission timer with a smoothed round-trip estimate.
///
/// `start` marks when the oldest unacknowledged segment went out; the
/// deadline sits `max(MIN_RTO, srtt + 4 * rttvar)` past it. Each fresh
/// cumulative ACK folds the age of that segment into the estimate.
#[derive(Debug)]
pub struct RtoTimer {
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    start: Option<Instant>,
    deadline: Option<Instant>,
    srtt: Duration,
    rttvar: Duration,
}

impl State {
    fn rto(&self) -> Duration {
        (self.srtt + 4 * self.rttvar).max(MIN_RTO)
    }
}

impl RtoTimer {
    pub fn new() -> RtoTimer {
        RtoTimer {
            state: Mutex::new(State {
                start: None,
                deadline: None,
                srtt: INITIAL_SRTT,
                rttvar: INITIAL_RTTVAR,
            }),
        }
    }

    /// Arms the timer for the segment that just went out on an empty
    /// pipeline.
    pub fn set(&self) {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        state.start = Some(now);
        state.deadline = Some(now + state.rto());
    }

    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.start = None;
        state.deadline = None;
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().unwrap().deadline.is_some()
    }

    pub fn is_expired(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.deadline.is_some_and(|deadline| Instant::now() > deadline)
    }

    /// Feeds the age of the oldest unacknowledged segment into the smoothed
    /// estimate. No-op while the timer is disarmed.
    pub fn update_rtt(&self) {
        let mut state = self.state.lock().unwrap();
        let Some(start) = state.start else { return };

        let sample = start.elapsed().as_secs_f64();
        let srtt = (1.0 - ALPHA) * state.srtt.as_secs_f64() + ALPHA * sample;
        let rttvar =
            (1.0 - BETA) * state.rttvar.as_secs_f64() + BETA * (sample - srtt).abs();

        state.srtt = Duration::from_secs_f64(srtt);
        state.rttvar = Duration::from_secs_f64(rttvar);
    }

    pub fn srtt(&self) -> Duration {
        self.state.lock().unwrap().srtt
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn rto_respects_the_floor() {
        let state = State {
            start: None,
            deadline: None,
            srtt: Duration::ZERO,
            rttvar: Duration::ZERO,
        };
        assert_eq!(state.rto(), MIN_RTO);
    }

    #[test]
    fn rto_tracks_the_estimate() {
        let state = State {
            start: None,
            deadline: None,
            srtt: Duration::from_millis(500),
            rttvar: Duration::from_millis(125),
        };
        assert_eq!(state.rto(), Duration::from_millis(1000));
    }

    #[test]
    fn stop_disarms() {
        let timer = RtoTimer::new();
        timer.set();
        assert!(timer.is_set());
        timer.stop();
        assert!(!timer.is_set());
        assert!(!timer.is_expired());
    }

    #[test]
    fn expires_once_the_deadline_passes() {
        let timer = RtoTimer::new();
        timer.set();
        assert!(!timer.is_expired());

        // Fast-forward by shrinking the estimate to the floor.
        {
            let mut state = timer.state.lock().unwrap();
            let now = Instant::now();
            state.start = Some(now);
            state.deadline = Some(now + MIN_RTO);
        }
        thread::sleep(2 * MIN_RTO);
        assert!(timer.is_expired());
    }

    #[test]
    fn fresh_samples_pull_the_estimate_down() {
        let timer = RtoTimer::new();
        timer.set();
        timer.update_rtt();

        // The instantaneous sample is near zero, so the smoothed estimate
        // must move below its half-second starting point.
        assert!(timer.srtt() < INITIAL_SRTT);
        assert!(timer.srtt() >= Duration::from_millis(400));
    }

    #[test]
    fn update_without_start_is_a_no_op() {
        let timer = RtoTimer::new();
        timer.update_rtt();
        assert_eq!(timer.srtt(), INITIAL_SRTT);
    }
}
