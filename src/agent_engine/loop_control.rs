/// Counts loop iterations against the configured maximum.
#[derive(Debug, Clone)]
pub struct IterationBudget {
    max_iterations: u32,
    used: u32,
}

impl IterationBudget {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            used: 0,
        }
    }

    /// 1-based number of the iteration about to run.
    pub fn current(&self) -> u32 {
        self.used + 1
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn record(&mut self) {
        self.used += 1;
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max_iterations
    }

    pub fn remaining(&self) -> u32 {
        self.max_iterations.saturating_sub(self.used)
    }
}
