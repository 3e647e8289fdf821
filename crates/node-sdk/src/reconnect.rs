//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

/// How the node client spaces reconnect attempts after a drop.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added as jitter, in `[0, 1]`.
    pub jitter: f64,
    /// Consecutive failures before giving up.  `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
            max_attempts: 0,
        }
    }
}

impl ReconnectBackoff {
    /// Delay before attempt `attempt` (0-indexed).  `seed` spreads a fleet of
    /// nodes that dropped at the same moment; the client derives it from its
    /// node id.
    pub fn delay_for_attempt(&self, attempt: u32, seed: u64) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt.min(32) as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jitter = capped * self.jitter.clamp(0.0, 1.0) * unit_fraction(seed ^ attempt as u64);
        Duration::from_millis((capped + jitter) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Map `x` onto `[0, 1)` with a splitmix64 finalizer.
fn unit_fraction(x: u64) -> f64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}

/// Stable seed for a node id (FNV-1a).
pub(crate) fn seed_for(node_id: &str) -> u64 {
    node_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_then_caps() {
        let p = ReconnectBackoff {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(p.delay_for_attempt(0, 1), Duration::from_millis(500));
        assert_eq!(p.delay_for_attempt(1, 1), Duration::from_millis(1000));
        assert_eq!(p.delay_for_attempt(20, 1), Duration::from_secs(30));
        assert_eq!(p.delay_for_attempt(u32::MAX, 1), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let p = ReconnectBackoff::default();
        for attempt in 0..40 {
            let d = p.delay_for_attempt(attempt, seed_for("iphone-1"));
            assert!(d <= Duration::from_millis(37_500), "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn seeds_spread_nodes() {
        let p = ReconnectBackoff::default();
        let differs = (0..6).any(|attempt| {
            p.delay_for_attempt(attempt, seed_for("node-a"))
                != p.delay_for_attempt(attempt, seed_for("node-b"))
        });
        assert!(differs);
    }

    #[test]
    fn give_up_only_when_limited() {
        let p = ReconnectBackoff {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(!p.should_give_up(2));
        assert!(p.should_give_up(3));
        assert!(!ReconnectBackoff::default().should_give_up(u32::MAX));
    }
}
