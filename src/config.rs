use std::path::PathBuf;

use crate::error::{Error, Result};

/// Configuration for an LSM tree instance.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Directory holding the tree's run files
    pub dir: PathBuf,

    /// Write buffer capacity in entries; also the entry capacity of every
    /// level-0 run (default: 1024)
    pub buffer_capacity: usize,

    /// Number of on-disk levels (default: 5)
    pub depth: usize,

    /// Run slots per level and the size multiplier between adjacent levels
    /// (default: 10)
    pub fanout: usize,

    /// Worker threads serving the read path (default: 4)
    pub num_threads: usize,

    /// Fraction of a level's run slots compacted in one merge step, in
    /// (0, 1] (default: 1.0)
    pub merge_ratio: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./tierdb"),
            buffer_capacity: 1024,
            depth: 5,
            fanout: 10,
            num_threads: 4,
            merge_ratio: 1.0,
        }
    }
}

impl TreeConfig {
    /// Create a new config with the given data directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the write buffer capacity in entries
    pub fn buffer_capacity(mut self, entries: usize) -> Self {
        self.buffer_capacity = entries;
        self
    }

    /// Set the number of on-disk levels
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Set the per-level run slot count and size multiplier
    pub fn fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Set the read-path worker thread count
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    /// Set the fraction of a level's run slots merged in one step
    pub fn merge_ratio(mut self, ratio: f64) -> Self {
        self.merge_ratio = ratio;
        self
    }

    /// Rejects parameter combinations the tree cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(Error::InvalidConfig(
                "buffer capacity must be at least 1 entry".to_string(),
            ));
        }
        if self.depth == 0 {
            return Err(Error::InvalidConfig(
                "tree depth must be at least 1 level".to_string(),
            ));
        }
        if self.fanout < 2 {
            return Err(Error::InvalidConfig(
                "fanout must be at least 2".to_string(),
            ));
        }
        if self.num_threads == 0 {
            return Err(Error::InvalidConfig(
                "worker pool needs at least 1 thread".to_string(),
            ));
        }
        if !(self.merge_ratio > 0.0 && self.merge_ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "merge ratio must be in (0, 1], got {}",
                self.merge_ratio
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TreeConfig::default();
        assert_eq!(config.dir, PathBuf::from("./tierdb"));
        assert_eq!(config.buffer_capacity, 1024);
        assert_eq!(config.depth, 5);
        assert_eq!(config.fanout, 10);
        assert_eq!(config.num_threads, 4);
        assert_eq!(config.merge_ratio, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = TreeConfig::new("/tmp/test")
            .buffer_capacity(2)
            .depth(3)
            .fanout(4)
            .num_threads(2)
            .merge_ratio(0.5);

        assert_eq!(config.dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.buffer_capacity, 2);
        assert_eq!(config.depth, 3);
        assert_eq!(config.fanout, 4);
        assert_eq!(config.num_threads, 2);
        assert_eq!(config.merge_ratio, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_degenerate_parameters() {
        assert!(matches!(
            TreeConfig::new("/tmp/t").buffer_capacity(0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            TreeConfig::new("/tmp/t").depth(0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            TreeConfig::new("/tmp/t").fanout(1).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            TreeConfig::new("/tmp/t").num_threads(0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            TreeConfig::new("/tmp/t").merge_ratio(0.0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            TreeConfig::new("/tmp/t").merge_ratio(1.5).validate(),
            Err(Error::InvalidConfig(_))
        ));
    }
}
