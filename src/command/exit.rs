//! Pure, total classification of a command's termination.

use crate::command::WaitOutcome;

/// Sentinel reported when the command terminated without an interpretable
/// exit code, or when waiting on it failed.
pub const ABNORMAL_EXIT_CODE: i32 = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal termination with the command's own status.
    Exited(i32),
    /// Killed by a signal or terminated without an interpretable status.
    SignaledAbnormally,
    /// The agent could not determine the outcome at all.
    AgentInternalError(String),
}

impl ExitOutcome {
    /// The process exit code the agent itself reports.
    pub fn code(&self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => *code,
            ExitOutcome::SignaledAbnormally | ExitOutcome::AgentInternalError(_) => {
                ABNORMAL_EXIT_CODE
            }
        }
    }

    /// The terminal line written into the output sink as the last shipped
    /// entry.
    pub fn marker_line(&self) -> String {
        match self {
            ExitOutcome::Exited(code) => format!("exit status: {code}"),
            ExitOutcome::SignaledAbnormally => "the process did not exit properly".to_string(),
            ExitOutcome::AgentInternalError(cause) => cause.clone(),
        }
    }

    pub fn is_abnormal(&self) -> bool {
        !matches!(self, ExitOutcome::Exited(_))
    }
}

/// Maps every possible wait outcome to exactly one classification.
pub fn classify(outcome: &WaitOutcome) -> ExitOutcome {
    match outcome {
        WaitOutcome::Exited(code) => ExitOutcome::Exited(*code),
        WaitOutcome::Signaled | WaitOutcome::Unknown => ExitOutcome::SignaledAbnormally,
        WaitOutcome::WaitFailed(cause) => ExitOutcome::AgentInternalError(cause.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_exit_code_maps_to_itself() {
        for code in 0..=255 {
            let outcome = classify(&WaitOutcome::Exited(code));
            assert_eq!(outcome, ExitOutcome::Exited(code));
            assert_eq!(outcome.code(), code);
        }
    }

    #[test]
    fn test_abnormal_termination_maps_to_sentinel() {
        let outcome = classify(&WaitOutcome::Signaled);
        assert_eq!(outcome, ExitOutcome::SignaledAbnormally);
        assert_eq!(outcome.code(), ABNORMAL_EXIT_CODE);

        let outcome = classify(&WaitOutcome::Unknown);
        assert_eq!(outcome.code(), ABNORMAL_EXIT_CODE);
    }

    #[test]
    fn test_wait_failure_maps_to_internal_error() {
        let outcome = classify(&WaitOutcome::WaitFailed("executable vanished".to_string()));
        assert_eq!(
            outcome,
            ExitOutcome::AgentInternalError("executable vanished".to_string())
        );
        assert_eq!(outcome.code(), ABNORMAL_EXIT_CODE);
        assert_eq!(outcome.marker_line(), "executable vanished");
    }

    #[test]
    fn test_marker_line_format() {
        assert_eq!(ExitOutcome::Exited(3).marker_line(), "exit status: 3");
        assert_eq!(ExitOutcome::Exited(0).marker_line(), "exit status: 0");
    }

    #[test]
    fn test_classification_is_deterministic() {
        let outcome = WaitOutcome::Exited(42);
        assert_eq!(classify(&outcome), classify(&outcome));
    }
}
