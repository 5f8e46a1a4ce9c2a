//! Statistics of an optimizer run.

use std::{fmt, time::Duration};

use crate::optimize::SimplificationReport;

/// What an [`Optimizer`](crate::optimize::Optimizer) run did.
///
/// Per-method simplification reports are summed into [`OptimizationStats::simplification`].
#[derive(Debug, Clone, Default)]
pub struct OptimizationStats {
    /// Evaluation and simplification rounds run.
    pub rounds: usize,
    /// Method bodies evaluated, counted once per round.
    pub methods_processed: usize,
    /// Method bodies that were rewritten, counted once per round.
    pub methods_changed: usize,
    /// Method bodies left untouched because evaluation or simplification failed.
    pub methods_skipped: usize,
    /// Classes made `final`.
    pub classes_finalized: usize,
    /// Methods made `private`.
    pub methods_privatized: usize,
    /// Interfaces replaced by their single implementation.
    pub interfaces_inlined: usize,
    /// Unresolved class references found while linking.
    pub link_warnings: usize,
    /// Unresolved member references found while linking.
    pub link_notes: usize,
    /// Bytecode size of the changed method bodies before they changed.
    pub code_bytes_before: usize,
    /// Bytecode size of the changed method bodies after they changed.
    pub code_bytes_after: usize,
    /// Summed simplification reports.
    pub simplification: SimplificationReport,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

impl OptimizationStats {
    /// Adds the per-method counts of `other`.
    pub fn merge(&mut self, other: &OptimizationStats) {
        self.methods_processed += other.methods_processed;
        self.methods_changed += other.methods_changed;
        self.methods_skipped += other.methods_skipped;
        self.code_bytes_before += other.code_bytes_before;
        self.code_bytes_after += other.code_bytes_after;
        self.simplification.merge(&other.simplification);
    }

    /// Bytes of bytecode removed, negative if the code grew.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn bytes_saved(&self) -> isize {
        self.code_bytes_before as isize - self.code_bytes_after as isize
    }

    /// Returns `true` if the run changed anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.methods_changed > 0
            || self.classes_finalized > 0
            || self.methods_privatized > 0
            || self.interfaces_inlined > 0
    }
}

impl fmt::Display for OptimizationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} of {} method bodies changed in {} round(s), {} skipped, {} bytes saved ({:.2?})",
            self.methods_changed,
            self.methods_processed,
            self.rounds,
            self.methods_skipped,
            self.bytes_saved(),
            self.elapsed
        )?;
        writeln!(f, "  code: {}", self.simplification)?;
        write!(
            f,
            "  classes: {} finalized, {} methods privatized, {} interfaces inlined",
            self.classes_finalized, self.methods_privatized, self.interfaces_inlined
        )?;
        if self.link_warnings + self.link_notes > 0 {
            write!(
                f,
                "\n  linking: {} unresolved classes, {} unresolved members",
                self.link_warnings, self.link_notes
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_savings() {
        let mut total = OptimizationStats {
            classes_finalized: 2,
            ..OptimizationStats::default()
        };
        assert!(total.has_changes());

        let method = OptimizationStats {
            methods_processed: 1,
            methods_changed: 1,
            code_bytes_before: 10,
            code_bytes_after: 4,
            ..OptimizationStats::default()
        };
        total.merge(&method);
        total.merge(&method);

        assert_eq!(total.methods_changed, 2);
        assert_eq!(total.bytes_saved(), 12);
        assert_eq!(total.classes_finalized, 2);
        assert!(total.to_string().starts_with("2 of 2 method bodies changed"));
        assert!(!total.to_string().contains("linking"));
    }
}
