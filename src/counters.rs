//! ProgressCounters (§4.7): aggregate counters with a self-validating
//! invariant-repair step, run after every mutation.

#[derive(Debug, Clone, Default)]
pub struct ProgressCounters {
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub errors: u64,
    pub active_workers: u64,
    pub worker_count: u64,
}

impl ProgressCounters {
    pub fn new(total: u64, worker_count: u64) -> Self {
        let mut counters = Self {
            total,
            worker_count,
            ..Default::default()
        };
        counters.validate();
        counters
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
        self.successful += 1;
        self.validate();
    }

    pub fn record_failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
        self.validate();
    }

    pub fn record_error(&mut self) {
        self.processed += 1;
        self.errors += 1;
        self.validate();
    }

    pub fn worker_started(&mut self) {
        self.active_workers += 1;
        self.validate();
    }

    pub fn worker_finished(&mut self) {
        self.active_workers = self.active_workers.saturating_sub(1);
        self.validate();
    }

    /// Clamp-and-repair pass (§4.7). Returns `true` if anything was
    /// adjusted, so callers can log a warning without duplicating the
    /// comparison logic.
    pub fn validate(&mut self) -> bool {
        let mut repaired = false;

        if self.processed > self.total {
            self.processed = self.total;
            repaired = true;
        }

        if self.active_workers > self.worker_count {
            self.active_workers = self.worker_count;
            repaired = true;
        }

        let tally = self.successful + self.failed;
        if tally > self.processed {
            if tally == 0 {
                // unreachable (tally > processed >= 0 implies tally > 0) but
                // keeps the division below total.
                repaired = true;
            } else {
                // scale down proportionally by processed / tally, floored.
                let new_successful = (self.successful * self.processed) / tally;
                let new_failed = (self.failed * self.processed) / tally;
                self.successful = new_successful;
                self.failed = new_failed;
                repaired = true;
            }
        }

        repaired
    }

    /// `successful + failed + errors == processed` check used by tests and
    /// callers wanting the raw invariant rather than the repair outcome.
    pub fn is_consistent(&self) -> bool {
        self.processed <= self.total
            && self.successful + self.failed + self.errors <= self.processed
            && self.active_workers <= self.worker_count
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.processed as f64 / self.total as f64) * 100.0
        }
    }
}
