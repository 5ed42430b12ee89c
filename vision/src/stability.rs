/// What one centering verdict did to the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityStep {
    /// Frame was not centered; the streak is back to zero.
    Reset,
    /// Centered streak grew but has not reached the threshold yet.
    Counting { count: u32, threshold: u32 },
    /// Threshold reached on this frame: capture now. Fires once per session.
    Capture,
    /// A capture already happened; verdicts are ignored until `reset`.
    Latched,
}

/// Consecutive-centered-frame counter gating auto-capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilityCounter {
    count: u32,
    threshold: u32,
    captured: bool,
}

impl StabilityCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
            captured: false,
        }
    }

    pub fn record(&mut self, centered: bool) -> StabilityStep {
        if self.captured {
            return StabilityStep::Latched;
        }
        if !centered {
            self.count = 0;
            return StabilityStep::Reset;
        }
        self.count += 1;
        if self.count >= self.threshold {
            self.captured = true;
            return StabilityStep::Capture;
        }
        StabilityStep::Counting {
            count: self.count,
            threshold: self.threshold,
        }
    }

    /// Start a new session: clears the streak and re-arms auto-capture.
    pub fn reset(&mut self) {
        self.count = 0;
        self.captured = false;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_captured(&self) -> bool {
        self.captured
    }
}
