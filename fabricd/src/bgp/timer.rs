use rand::Rng;

use crate::context::Timer;

use super::fsm::Event;
use super::inst::Message;
use super::peer::Peer;

/// Per-neighbor timer configuration. Absent values fall back to the
/// protocol defaults; `BGP_KEEPALIVE_SECONDS` overrides keepalive and
/// derives hold time as three times that.
#[derive(Debug, Default, Clone)]
pub struct Config {
    pub hold_time: Option<u16>,
    pub connect_retry_time: Option<u16>,
    pub open_delay_time: Option<u16>,
    pub idle_hold_time: Option<u16>,
}

impl Config {
    pub const DEFAULT_HOLD_TIME: u64 = 90;
    pub const DEFAULT_CONNECT_RETRY_TIME: u64 = 30;
    pub const DEFAULT_OPEN_DELAY_TIME: u64 = 15;
    pub const OPEN_SENT_HOLD_TIME: u64 = 240;
    pub const DEFAULT_IDLE_HOLD_TIME_MS: u64 = 5_000;
    pub const MAX_IDLE_HOLD_TIME_MS: u64 = 100_000;
    const MAX_CONNECT_RETRY_DOUBLINGS: u32 = 6;

    pub fn hold_time(&self) -> u64 {
        if let Ok(keepalive) = std::env::var("BGP_KEEPALIVE_SECONDS")
            && let Ok(secs) = keepalive.parse::<u64>()
            && secs > 0
        {
            return secs * 3;
        }
        match self.hold_time {
            Some(hold_time) => hold_time as u64,
            None => Self::DEFAULT_HOLD_TIME,
        }
    }

    /// Connect retry doubles per failed attempt up to the configured
    /// interval, with a +/-10% jitter to damp connection collisions
    /// between two speakers started at the same instant. The first
    /// attempt fires almost immediately.
    pub fn connect_retry_time(&self, attempts: u32) -> u64 {
        let cap = self
            .connect_retry_time
            .map(|t| t as u64)
            .unwrap_or(Self::DEFAULT_CONNECT_RETRY_TIME);
        let doublings = attempts.min(Self::MAX_CONNECT_RETRY_DOUBLINGS);
        let backed_off = (1u64 << doublings).min(cap);
        jitter(backed_off)
    }

    pub fn open_delay_time(&self) -> u64 {
        match self.open_delay_time {
            Some(open_delay) => open_delay as u64,
            None => Self::DEFAULT_OPEN_DELAY_TIME,
        }
    }

    pub fn initial_idle_hold_ms(&self) -> u64 {
        match self.idle_hold_time {
            Some(idle_hold) => (idle_hold as u64) * 1000,
            None => Self::DEFAULT_IDLE_HOLD_TIME_MS,
        }
    }
}

fn jitter(secs: u64) -> u64 {
    if secs == 0 {
        return 0;
    }
    let spread = (secs / 10).max(1);
    let low = secs.saturating_sub(spread);
    rand::rng().random_range(low..=secs + spread)
}

macro_rules! start_timer {
    ($peer:expr, $secs:expr, $ev:expr) => {{
        let ident = $peer.ident;
        let tx = $peer.tx.clone();

        Timer::once($secs, move || {
            let tx = tx.clone();
            let ev = $ev;
            async move {
                let _ = tx.send(Message::Event(ident, ev)).await;
            }
        })
    }};
}

macro_rules! start_repeater {
    ($peer:expr, $secs:expr, $ev:expr) => {{
        let ident = $peer.ident;
        let tx = $peer.tx.clone();

        Timer::repeat($secs, move || {
            let tx = tx.clone();
            let ev = $ev;
            async move {
                let _ = tx.send(Message::Event(ident, ev)).await;
            }
        })
    }};
}

pub fn start_connect_retry_timer(peer: &Peer) -> Timer {
    start_timer!(
        peer,
        peer.config.timer.connect_retry_time(peer.connect_attempts),
        Event::ConnectRetryExpired
    )
}

pub fn start_open_delay_timer(peer: &Peer) -> Timer {
    start_timer!(
        peer,
        peer.config.timer.open_delay_time(),
        Event::OpenDelayExpired
    )
}

pub fn start_hold_timer(peer: &Peer) -> Timer {
    start_timer!(peer, peer.hold_time as u64, Event::HoldTimerExpired)
}

/// OpenSent runs a long fixed hold so a slow remote OPEN does not bounce
/// the session.
pub fn start_open_sent_hold_timer(peer: &Peer) -> Timer {
    start_timer!(peer, Config::OPEN_SENT_HOLD_TIME, Event::HoldTimerExpired)
}

pub fn start_keepalive_timer(peer: &Peer) -> Timer {
    start_repeater!(peer, peer.keepalive_time as u64, Event::KeepaliveExpired)
}

pub fn start_idle_hold_timer(peer: &Peer) -> Timer {
    let ident = peer.ident;
    let tx = peer.tx.clone();
    Timer::once_ms(peer.idle_hold_ms, move || {
        let tx = tx.clone();
        async move {
            let _ = tx.send(Message::Event(ident, Event::IdleHoldExpired)).await;
        }
    })
}

/// Deferral of VPN table joins while waiting for the route-target
/// End-of-RIB; overridable in milliseconds for tests.
pub fn start_eor_deferral_timer(peer: &Peer) -> Timer {
    const DEFAULT_EOR_TIMEOUT_MS: u64 = 30_000;
    let timeout_ms = std::env::var("BGP_RTFILTER_EOR_TIMEOUT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_EOR_TIMEOUT_MS);

    let ident = peer.ident;
    let tx = peer.tx.clone();
    Timer::once_ms(timeout_ms, move || {
        let tx = tx.clone();
        async move {
            let _ = tx
                .send(Message::Event(ident, Event::EorDeferralExpired))
                .await;
        }
    })
}

pub fn refresh_hold_timer(peer: &Peer) {
    if let Some(hold_timer) = peer.timers.hold.as_ref() {
        hold_timer.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_retry_backoff_caps_at_the_interval() {
        let config = Config::default();
        // Jitter is +/-10%, so compare against the backed-off bounds.
        for (attempts, base) in [(0u32, 1u64), (1, 2), (3, 8), (5, 30), (12, 30)] {
            let value = config.connect_retry_time(attempts);
            let spread = (base / 10).max(1);
            assert!(
                value >= base - spread && value <= base + spread,
                "attempts {}: {} outside {}±{}",
                attempts,
                value,
                base,
                spread
            );
        }
    }

    #[test]
    fn hold_time_default() {
        let config = Config::default();
        assert_eq!(config.hold_time(), Config::DEFAULT_HOLD_TIME);
        let config = Config {
            hold_time: Some(30),
            ..Default::default()
        };
        assert_eq!(config.hold_time(), 30);
    }
}
