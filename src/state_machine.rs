//! Legal phase sequencing for a single job.

use thiserror::Error;

use crate::jobs::OperationState;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid transition from {from} to {to}")]
pub struct InvalidStateTransition {
    pub from: OperationState,
    pub to: OperationState,
}

/// States reachable from `from`.
///
/// Converting and Uploading are both optional, so Downloading and Converting
/// each have direct edges further down the pipeline.
pub fn valid_transitions(from: OperationState) -> &'static [OperationState] {
    use OperationState::*;
    match from {
        Idle => &[FetchingMetadata],
        FetchingMetadata => &[Downloading, Cancelled, Error],
        Downloading => &[Converting, Uploading, Completed, Cancelled, Error],
        Converting => &[Uploading, Completed, Cancelled, Error],
        Uploading => &[Completed, Cancelled, Error],
        Completed | Cancelled | Error => &[Idle],
    }
}

#[derive(Clone, Debug)]
pub struct OperationStateMachine {
    state: OperationState,
    history: Vec<OperationState>,
}

impl OperationStateMachine {
    pub fn new() -> Self {
        Self {
            state: OperationState::Idle,
            history: vec![OperationState::Idle],
        }
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Every accepted state, oldest first. Diagnostics only.
    pub fn history(&self) -> &[OperationState] {
        &self.history
    }

    pub fn can_transition_to(&self, to: OperationState) -> bool {
        valid_transitions(self.state).contains(&to)
    }

    pub fn transition_to(&mut self, to: OperationState) -> Result<(), InvalidStateTransition> {
        if !self.can_transition_to(to) {
            return Err(InvalidStateTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Back to Idle from a terminal state. A no-op when already idle.
    pub fn reset(&mut self) -> Result<(), InvalidStateTransition> {
        if self.state == OperationState::Idle {
            return Ok(());
        }
        if !self.state.is_terminal() {
            return Err(InvalidStateTransition {
                from: self.state,
                to: OperationState::Idle,
            });
        }
        self.state = OperationState::Idle;
        self.history.push(OperationState::Idle);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl Default for OperationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OperationState::*;

    /// Drive a fresh machine into `target` along a legal path.
    fn machine_in(target: OperationState) -> OperationStateMachine {
        let path: &[OperationState] = match target {
            Idle => &[],
            FetchingMetadata => &[FetchingMetadata],
            Downloading => &[FetchingMetadata, Downloading],
            Converting => &[FetchingMetadata, Downloading, Converting],
            Uploading => &[FetchingMetadata, Downloading, Uploading],
            Completed => &[FetchingMetadata, Downloading, Completed],
            Cancelled => &[FetchingMetadata, Cancelled],
            Error => &[FetchingMetadata, Error],
        };
        let mut sm = OperationStateMachine::new();
        for s in path {
            sm.transition_to(*s).unwrap();
        }
        sm
    }

    #[test]
    fn test_every_pair_matches_the_table() {
        for from in OperationState::ALL {
            for to in OperationState::ALL {
                let mut sm = machine_in(from);
                let allowed = valid_transitions(from).contains(&to);
                assert_eq!(sm.can_transition_to(to), allowed, "{from} -> {to}");
                match sm.transition_to(to) {
                    Ok(()) => {
                        assert!(allowed);
                        assert_eq!(sm.state(), to);
                    }
                    Err(e) => {
                        assert!(!allowed);
                        assert_eq!(e, InvalidStateTransition { from, to });
                        assert_eq!(sm.state(), from);
                    }
                }
            }
        }
    }

    #[test]
    fn test_all_four_workflow_shapes_are_legal() {
        let shapes: [&[OperationState]; 4] = [
            &[FetchingMetadata, Downloading, Converting, Uploading, Completed],
            &[FetchingMetadata, Downloading, Uploading, Completed],
            &[FetchingMetadata, Downloading, Converting, Completed],
            &[FetchingMetadata, Downloading, Completed],
        ];
        for shape in shapes {
            let mut sm = OperationStateMachine::new();
            for s in shape {
                sm.transition_to(*s).unwrap();
            }
            assert!(sm.is_terminal());
            assert_eq!(sm.history().len(), shape.len() + 1);
        }
    }

    #[test]
    fn test_reset_only_from_terminal_or_idle() {
        let mut sm = OperationStateMachine::new();
        assert!(sm.reset().is_ok());
        assert_eq!(sm.history(), &[Idle]);

        let mut sm = machine_in(Downloading);
        assert_eq!(
            sm.reset(),
            Err(InvalidStateTransition {
                from: Downloading,
                to: Idle
            })
        );
        assert_eq!(sm.state(), Downloading);

        let mut sm = machine_in(Cancelled);
        sm.reset().unwrap();
        assert_eq!(sm.state(), Idle);
        assert_eq!(sm.history().last(), Some(&Idle));
    }

    #[test]
    fn test_error_message_names_both_states() {
        let mut sm = OperationStateMachine::new();
        let err = sm.transition_to(Completed).unwrap_err();
        assert_eq!(err.to_string(), "Invalid transition from idle to completed");
    }
}
