use crate::run::Run;

/// A bounded collection of runs of uniform declared capacity.
///
/// Runs are ordered oldest to newest; the newest run sits at the tail. Levels
/// never reorder their runs.
pub struct Level {
    /// Maximum number of runs this level may hold (the tree fanout).
    pub max_runs: usize,
    /// Entry capacity of every run stored at this level.
    pub max_run_size: usize,
    pub runs: Vec<Run>,
}

impl Level {
    /// Creates an empty level.
    pub fn new(max_runs: usize, max_run_size: usize) -> Self {
        Self {
            max_runs,
            max_run_size,
            runs: Vec::new(),
        }
    }

    /// Free run slots remaining.
    pub fn remaining(&self) -> usize {
        self.max_runs - self.runs.len()
    }

    /// Returns the number of runs in the level.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if the level holds no runs.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
