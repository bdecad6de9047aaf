//! The grading pipeline as an explicit finite-state machine.
//!
//! `transition` is a pure function over (state, event) so the pipeline
//! topology is testable without any model invocation. The engine drives it;
//! an illegal pair is a wiring bug and fails loudly.

use std::fmt;

use crate::error::GradingError;

/// States of the per-answer grading pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingState {
    /// Fetching context fragments for the question.
    Retrieve,
    /// Both examiners evaluating concurrently (fan-out/fan-in).
    Examine,
    /// Comparing the two examiner totals.
    CheckDivergence,
    /// The arbiter re-deriving a score after divergence.
    Arbitrate,
    /// Reducing the corrections to the final score.
    Consensus,
    /// Terminal: the answer was graded.
    Done,
    /// Terminal: an unrecoverable invocation failure.
    Failed,
}

impl GradingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GradingState::Done | GradingState::Failed)
    }
}

impl fmt::Display for GradingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GradingState::Retrieve => "retrieve",
            GradingState::Examine => "examine",
            GradingState::CheckDivergence => "check-divergence",
            GradingState::Arbitrate => "arbitrate",
            GradingState::Consensus => "consensus",
            GradingState::Done => "done",
            GradingState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Events that advance the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingEvent {
    /// Retrieval finished (possibly with zero fragments).
    ContextReady,
    /// Both examiner corrections are in.
    ExaminersComplete,
    /// The examiner totals diverged beyond the threshold.
    Divergent,
    /// The examiner totals agree within the threshold.
    Agreed,
    /// The arbiter's correction is in.
    ArbiterComplete,
    /// The consensus score was computed.
    Finalized,
    /// An unrecoverable invocation failure occurred.
    InvocationFailed,
}

impl fmt::Display for GradingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GradingEvent::ContextReady => "context-ready",
            GradingEvent::ExaminersComplete => "examiners-complete",
            GradingEvent::Divergent => "divergent",
            GradingEvent::Agreed => "agreed",
            GradingEvent::ArbiterComplete => "arbiter-complete",
            GradingEvent::Finalized => "finalized",
            GradingEvent::InvocationFailed => "invocation-failed",
        };
        write!(f, "{name}")
    }
}

/// Advance the pipeline by one event.
pub fn transition(state: GradingState, event: GradingEvent) -> Result<GradingState, GradingError> {
    use GradingEvent::*;
    use GradingState::*;

    let next = match (state, event) {
        (Retrieve, ContextReady) => Examine,
        (Examine, ExaminersComplete) => CheckDivergence,
        (CheckDivergence, Divergent) => Arbitrate,
        (CheckDivergence, Agreed) => Consensus,
        (Arbitrate, ArbiterComplete) => Consensus,
        (Consensus, Finalized) => Done,
        (state, InvocationFailed) if !state.is_terminal() => Failed,
        (state, event) => {
            return Err(GradingError::InvalidTransition {
                state: state.to_string(),
                event: event.to_string(),
            })
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreed_path_skips_arbitration() {
        let mut state = GradingState::Retrieve;
        for event in [
            GradingEvent::ContextReady,
            GradingEvent::ExaminersComplete,
            GradingEvent::Agreed,
            GradingEvent::Finalized,
        ] {
            state = transition(state, event).unwrap();
        }
        assert_eq!(state, GradingState::Done);
    }

    #[test]
    fn divergent_path_routes_through_arbiter() {
        let mut state = GradingState::Retrieve;
        for event in [
            GradingEvent::ContextReady,
            GradingEvent::ExaminersComplete,
            GradingEvent::Divergent,
            GradingEvent::ArbiterComplete,
            GradingEvent::Finalized,
        ] {
            state = transition(state, event).unwrap();
        }
        assert_eq!(state, GradingState::Done);
    }

    #[test]
    fn any_active_state_can_fail() {
        for state in [
            GradingState::Retrieve,
            GradingState::Examine,
            GradingState::CheckDivergence,
            GradingState::Arbitrate,
            GradingState::Consensus,
        ] {
            assert_eq!(
                transition(state, GradingEvent::InvocationFailed).unwrap(),
                GradingState::Failed
            );
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for state in [GradingState::Done, GradingState::Failed] {
            assert!(state.is_terminal());
            assert!(transition(state, GradingEvent::InvocationFailed).is_err());
            assert!(transition(state, GradingEvent::Finalized).is_err());
        }
    }

    #[test]
    fn illegal_pairs_are_rejected() {
        let err = transition(GradingState::Retrieve, GradingEvent::Divergent).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("retrieve"));
        assert!(message.contains("divergent"));

        assert!(transition(GradingState::Examine, GradingEvent::ContextReady).is_err());
        assert!(transition(GradingState::Consensus, GradingEvent::Agreed).is_err());
    }
}
