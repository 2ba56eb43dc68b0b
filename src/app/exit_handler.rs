//! Exit code logic for the hubfetch process.
//!
//! Single responsibility: map batch counts to the process exit outcome.

use hubfetch_core::BatchStats;

use crate::ProcessExit;

/// Determines the process exit outcome from a finished batch.
///
/// Any recorded task (including ones recorded because of an interrupt) makes
/// the run partial; fatal errors never reach this point.
pub(crate) fn determine_exit_outcome(stats: &BatchStats) -> ProcessExit {
    if stats.recorded == 0 && !stats.interrupted {
        ProcessExit::Success
    } else {
        ProcessExit::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::determine_exit_outcome;
    use crate::ProcessExit;
    use hubfetch_core::BatchStats;

    #[test]
    fn test_exit_outcome_success_when_nothing_recorded() {
        let stats = BatchStats {
            committed: 3,
            skipped: 1,
            ..BatchStats::default()
        };
        assert_eq!(determine_exit_outcome(&stats), ProcessExit::Success);
    }

    #[test]
    fn test_exit_outcome_success_for_empty_batch() {
        assert_eq!(
            determine_exit_outcome(&BatchStats::default()),
            ProcessExit::Success
        );
    }

    #[test]
    fn test_exit_outcome_partial_when_recorded() {
        let stats = BatchStats {
            committed: 2,
            recorded: 1,
            ..BatchStats::default()
        };
        assert_eq!(determine_exit_outcome(&stats), ProcessExit::Partial);
    }

    #[test]
    fn test_exit_outcome_partial_when_interrupted() {
        let stats = BatchStats {
            interrupted: true,
            ..BatchStats::default()
        };
        assert_eq!(determine_exit_outcome(&stats), ProcessExit::Partial);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ProcessExit::Success.code(), 0);
        assert_eq!(ProcessExit::Failure.code(), 1);
        assert_eq!(ProcessExit::Partial.code(), 2);
    }
}
