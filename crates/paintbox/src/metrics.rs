//! Per-pass calculation statistics

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::{Duration, Instant};

/// Statistics from one recalculation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecalcStats {
    /// Formula cells evaluated at least once
    pub cells_evaluated: usize,
    /// Dirty cells settled without evaluation because nothing they read changed
    pub cells_skipped: usize,
    /// Plan layers walked
    pub layers: usize,
    /// Cyclic groups that converged
    pub cycles_converged: usize,
    /// Cyclic groups that failed (or were not attempted with iteration off)
    pub cycles_failed: usize,
    /// Total sweeps over cyclic groups
    pub iterations: u32,
    /// Cells left holding an error value
    pub errors: usize,
    /// Volatile cells re-dirtied at the start of the pass
    pub volatile_cells: usize,
    /// Whether the pass stopped early at a cancellation point
    pub cancelled: bool,
    /// Formula cells still Dirty after the pass
    pub remaining_dirty: usize,
    #[serde(serialize_with = "as_seconds")]
    pub elapsed: Duration,
}

fn as_seconds<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl RecalcStats {
    /// Evaluation throughput of the pass
    pub fn formulas_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.cells_evaluated as f64 / secs
        } else {
            0.0
        }
    }

    pub(crate) fn finish(&mut self, started: Instant) {
        self.elapsed = started.elapsed();
    }
}

impl fmt::Display for RecalcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} evaluated, {} skipped, {} layers, {} errors",
            self.cells_evaluated, self.cells_skipped, self.layers, self.errors
        )?;
        if self.cycles_converged + self.cycles_failed > 0 {
            write!(
                f,
                ", cycles {} converged / {} failed in {} iterations",
                self.cycles_converged, self.cycles_failed, self.iterations
            )?;
        }
        if self.cancelled {
            write!(f, ", cancelled with {} dirty", self.remaining_dirty)?;
        }
        write!(
            f,
            " in {:.3}s ({:.0} formulas/s)",
            self.elapsed.as_secs_f64(),
            self.formulas_per_second()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_formulas_per_second() {
        let stats = RecalcStats {
            cells_evaluated: 500,
            elapsed: Duration::from_millis(250),
            ..Default::default()
        };
        assert_eq!(stats.formulas_per_second(), 2000.0);
        assert_eq!(RecalcStats::default().formulas_per_second(), 0.0);
    }

    #[test]
    fn test_serializes_elapsed_as_seconds() {
        let stats = RecalcStats {
            elapsed: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["elapsed"], serde_json::json!(1.5));
        assert_eq!(json["cancelled"], serde_json::json!(false));
    }

    #[test]
    fn test_display_mentions_cycles_only_when_present() {
        let plain = RecalcStats::default().to_string();
        assert!(!plain.contains("cycles"));

        let cyclic = RecalcStats {
            cycles_failed: 1,
            iterations: 100,
            ..Default::default()
        }
        .to_string();
        assert!(cyclic.contains("0 converged / 1 failed in 100 iterations"));
    }
}
