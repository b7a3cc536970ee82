//! Thresholds for copy-number classification, overlap scoring, bad-read
//! marking and path extension
//!
//! Every heuristic cut-off used by the engine lives here as a named field so
//! the tools can override it. Each struct follows the same shape: `Default`
//! with the production values, `validate()` and a tracing `print()`.

/// Depth cut points used to assign copy numbers to fingerprints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyThresholds {
    /// Depth below this is copy 0 (noise)
    pub copy1_min: u32,
    /// Depth below this (and at least `copy1_min`) is copy 1
    pub copy2_min: u32,
    /// Depth below this (and at least `copy2_min`) is copy 2; at or above is copy M
    pub copy_m_min: u32,
}

impl Default for CopyThresholds {
    fn default() -> Self {
        Self {
            copy1_min: 10,
            copy2_min: 50,
            copy_m_min: 100,
        }
    }
}

impl CopyThresholds {
    /// Create thresholds from the three cut points
    pub fn new(copy1_min: u32, copy2_min: u32, copy_m_min: u32) -> Result<Self, String> {
        let t = Self {
            copy1_min,
            copy2_min,
            copy_m_min,
        };
        t.validate()?;
        Ok(t)
    }

    /// Cut points must be non-decreasing
    pub fn validate(&self) -> Result<(), String> {
        if self.copy1_min > self.copy2_min || self.copy2_min > self.copy_m_min {
            return Err(format!(
                "copy thresholds must be non-decreasing, got {} {} {}",
                self.copy1_min, self.copy2_min, self.copy_m_min
            ));
        }
        Ok(())
    }

    /// Log thresholds via tracing
    pub fn print(&self) {
        tracing::info!(
            "Copy thresholds: copy1 >= {}  copy2 >= {}  copyM >= {}",
            self.copy1_min,
            self.copy2_min,
            self.copy_m_min
        );
    }
}

/// Parameters of a single overlap query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapConfig {
    /// Candidates sharing fewer copy-1 hits are dropped
    pub min_shared_hits: u32,
    /// A read with no overlap and fewer hits than this is flagged LOW_HIT
    pub low_hit_threshold: u32,
    /// A read with no overlap and fewer copy-1 hits than this is flagged LOW_COPY1
    pub low_copy1_threshold: u32,
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            min_shared_hits: 3,
            low_hit_threshold: 10,
            low_copy1_threshold: 10,
        }
    }
}

impl OverlapConfig {
    /// Check the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.min_shared_hits == 0 {
            return Err("min_shared_hits must be at least 1".to_string());
        }
        Ok(())
    }

    /// Log configuration via tracing
    pub fn print(&self) {
        tracing::info!("Overlap Configuration:");
        tracing::info!("  min_shared_hits = {}", self.min_shared_hits);
        tracing::debug!("  low_hit_threshold = {}", self.low_hit_threshold);
        tracing::debug!("  low_copy1_threshold = {}", self.low_copy1_threshold);
    }
}

/// Parameters of the three-pass bad-read classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Reads implicated in at least this many bad overlaps are ORDER10
    pub decisive_bad_overlaps: u32,
    /// Reads with at least this many remaining bad partners are ORDER1 in pass 2
    pub multiple_bad_overlaps: u32,
    /// Maximum length of each read's bad-partner list
    pub max_bad_partners: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            decisive_bad_overlaps: 10,
            multiple_bad_overlaps: 2,
            max_bad_partners: 10,
        }
    }
}

impl ClassifierConfig {
    /// Check the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.multiple_bad_overlaps == 0 || self.decisive_bad_overlaps == 0 {
            return Err("bad overlap thresholds must be positive".to_string());
        }
        if self.max_bad_partners == 0 {
            return Err("max_bad_partners must be positive".to_string());
        }
        Ok(())
    }

    /// Log configuration via tracing
    pub fn print(&self) {
        tracing::info!("Classifier Configuration:");
        tracing::info!("  decisive_bad_overlaps = {}", self.decisive_bad_overlaps);
        tracing::info!("  multiple_bad_overlaps = {}", self.multiple_bad_overlaps);
        tracing::debug!("  max_bad_partners = {}", self.max_bad_partners);
    }
}

/// Parameters of the greedy path extension
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyConfig {
    /// A candidate must be supported by more than this fraction of active reads
    pub majority_fraction: f64,
    /// Voted distances further than this from the median are logged
    pub distance_tolerance: u32,
    /// How many hits ahead a non-voting read searches for the winner
    pub lookahead: usize,
    /// Non-voting steps tolerated before a read is dropped
    pub max_misses: u32,
    /// Admit reads containing the winning fingerprint as the path advances
    pub admit_new_reads: bool,
    /// Hard limit on path length
    pub max_steps: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            majority_fraction: 0.5,
            distance_tolerance: 20,
            lookahead: 3,
            max_misses: 2,
            admit_new_reads: true,
            max_steps: 1_000_000,
        }
    }
}

impl AssemblyConfig {
    /// Check the configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..1.0).contains(&self.majority_fraction) {
            return Err(format!(
                "majority_fraction must be in [0, 1), got {}",
                self.majority_fraction
            ));
        }
        if self.max_steps == 0 {
            return Err("max_steps must be positive".to_string());
        }
        Ok(())
    }

    /// Log configuration via tracing
    pub fn print(&self) {
        tracing::info!("Assembly Configuration:");
        tracing::info!("  majority_fraction = {}", self.majority_fraction);
        tracing::debug!("  distance_tolerance = {}", self.distance_tolerance);
        tracing::debug!("  lookahead = {}", self.lookahead);
        tracing::debug!("  max_misses = {}", self.max_misses);
        tracing::info!("  admit_new_reads = {}", self.admit_new_reads);
    }
}

/// Parameters of query-to-reference block chaining
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingConfig {
    /// A block ends when slot and query index drift apart by more than this
    pub max_block_drift: u32,
    /// Blocks need more than this many single-copy hits to be reported
    pub min_block_copy1: u32,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            max_block_drift: 50,
            min_block_copy1: 2,
        }
    }
}

impl MappingConfig {
    /// Check the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_block_drift == 0 {
            return Err("max_block_drift must be positive".to_string());
        }
        Ok(())
    }

    /// Log configuration via tracing
    pub fn print(&self) {
        tracing::info!("Mapping Configuration:");
        tracing::info!("  max_block_drift = {}", self.max_block_drift);
        tracing::info!("  min_block_copy1 = {}", self.min_block_copy1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(CopyThresholds::default().validate().is_ok());
        assert!(OverlapConfig::default().validate().is_ok());
        assert!(ClassifierConfig::default().validate().is_ok());
        assert!(AssemblyConfig::default().validate().is_ok());
        assert!(MappingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_copy_thresholds_order() {
        assert!(CopyThresholds::new(1, 3, 10).is_ok());
        assert!(CopyThresholds::new(5, 3, 10).is_err());
        assert!(CopyThresholds::new(1, 30, 10).is_err());
    }

    #[test]
    fn test_majority_fraction_range() {
        let config = AssemblyConfig {
            majority_fraction: 1.0,
            ..AssemblyConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_min_shared() {
        let config = OverlapConfig {
            min_shared_hits: 0,
            ..OverlapConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
