// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of a single tailer instance.
//!
//! A tailer is single-use: `Stopped` is terminal and the only way to keep
//! following a path after rotation is to build a new tailer seeded with the
//! old one's offset.

use crate::tailers::file::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TailerState {
    #[default]
    NotStarted,
    Running,
    /// The file was replaced underneath the tailer; it keeps draining the old
    /// handle until its close timeout elapses.
    StoppingAfterRotation,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerEvent {
    Start,
    RotationDetected,
    StopRequested,
    /// All tasks have exited on their own (end of input, read error, timeout).
    Finished,
}

impl TailerEvent {
    fn operation(self) -> &'static str {
        match self {
            TailerEvent::Start => "start",
            TailerEvent::RotationDetected => "rotate",
            TailerEvent::StopRequested => "stop",
            TailerEvent::Finished => "finish",
        }
    }
}

impl TailerState {
    pub fn transition(self, event: TailerEvent) -> Result<TailerState> {
        use TailerEvent::*;
        use TailerState::*;

        match (self, event) {
            (NotStarted, Start) => Ok(Running),
            (Running, RotationDetected) => Ok(StoppingAfterRotation),
            (StoppingAfterRotation, RotationDetected) => Ok(StoppingAfterRotation),
            // Nothing was ever read, so there is nothing to drain.
            (NotStarted, RotationDetected) => Ok(Stopped),
            (Stopped, RotationDetected) => Ok(Stopped),
            (_, StopRequested) | (_, Finished) => Ok(Stopped),
            (state, event) => Err(Error::InvalidState {
                operation: event.operation(),
                state,
            }),
        }
    }

    pub fn is_terminal(self) -> bool {
        self == TailerState::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = TailerState::default();
        let state = state.transition(TailerEvent::Start).unwrap();
        assert_eq!(state, TailerState::Running);
        let state = state.transition(TailerEvent::RotationDetected).unwrap();
        assert_eq!(state, TailerState::StoppingAfterRotation);
        let state = state.transition(TailerEvent::Finished).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_start_is_single_use() {
        for state in [
            TailerState::Running,
            TailerState::StoppingAfterRotation,
            TailerState::Stopped,
        ] {
            let err = state.transition(TailerEvent::Start).unwrap_err();
            assert!(
                matches!(err, Error::InvalidState { operation: "start", state: s } if s == state)
            );
        }
    }

    #[test]
    fn test_stop_is_idempotent() {
        let stopped = TailerState::Running
            .transition(TailerEvent::StopRequested)
            .unwrap();
        assert_eq!(
            stopped.transition(TailerEvent::StopRequested).unwrap(),
            TailerState::Stopped
        );
        assert_eq!(
            stopped.transition(TailerEvent::RotationDetected).unwrap(),
            TailerState::Stopped
        );
    }

    #[test]
    fn test_rotation_before_start_stops() {
        assert_eq!(
            TailerState::NotStarted
                .transition(TailerEvent::RotationDetected)
                .unwrap(),
            TailerState::Stopped
        );
    }
}
