use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Retry,
    Deny,
}

/// Promille bands: `p <= pass` passes, `p >= deny` denies, anything between
/// asks for a second measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub pass: f64,
    pub deny: f64,
}

impl Thresholds {
    /// Inverted thresholds are swapped rather than rejected.
    pub fn normalized(pass: f64, deny: f64) -> Self {
        if pass > deny {
            warn!(
                threshold_pass = pass,
                threshold_deny = deny,
                "threshold_pass is above threshold_deny, swapping them"
            );
            Self { pass: deny, deny: pass }
        } else {
            Self { pass, deny }
        }
    }

    pub fn decide(&self, promille: f64) -> Verdict {
        if promille <= self.pass {
            Verdict::Pass
        } else if promille >= self.deny {
            Verdict::Deny
        } else {
            Verdict::Retry
        }
    }
}
