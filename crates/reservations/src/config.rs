use std::time::Duration;

/// Reservation ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Hold duration when the request does not name one.
    pub default_duration: Duration,
    /// Longest hold a single create or renew may ask for.
    pub max_duration: Duration,
    /// Renewals allowed per reservation.
    pub max_renewals: u32,
    /// How far each renewal may push the absolute expiry ceiling
    /// (`created_at + max_duration + step * renewals`).
    pub renewal_ceiling_step: Duration,
    /// Lease on `item|warehouse` keys while a create validates and persists.
    pub lock_duration: Duration,
    /// While a document is being posted its reservation is held at least
    /// this long, so the expiry sweep cannot take it from under the post.
    pub posting_window: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_duration: Duration::from_secs(30 * 60),
            max_duration: Duration::from_secs(24 * 60 * 60),
            max_renewals: 10,
            renewal_ceiling_step: Duration::from_secs(60 * 60),
            lock_duration: Duration::from_secs(30),
            posting_window: Duration::from_secs(5 * 60),
        }
    }
}

impl LedgerConfig {
    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = duration;
        self
    }

    pub fn with_max_renewals(mut self, max_renewals: u32) -> Self {
        self.max_renewals = max_renewals;
        self
    }

    pub fn with_renewal_ceiling_step(mut self, step: Duration) -> Self {
        self.renewal_ceiling_step = step;
        self
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    pub fn with_posting_window(mut self, window: Duration) -> Self {
        self.posting_window = window;
        self
    }
}
