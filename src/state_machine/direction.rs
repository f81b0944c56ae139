use std::collections::VecDeque;
use std::fmt;

use super::StateMachine;

/// Lifecycle of one direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectionState {
    /// Messages may still flow in this direction.
    Open,
    /// The end marker has been sent (outbound) or observed (inbound).
    HalfClosed,
    /// The call owning this direction has reached a terminal status.
    Closed,
}

impl fmt::Display for DirectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DirectionState::Open => "open",
            DirectionState::HalfClosed => "half-closed",
            DirectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tracks the `Open → HalfClosed → Closed` lifecycle of a single stream direction.
///
/// Each transition is reported exactly once through [`poll_output`](StateMachine::poll_output),
/// which is what lets the owner write an end marker once no matter how often `close` is requested.
#[derive(Debug)]
pub struct DirectionMachine {
    state: DirectionState,
    pending: VecDeque<DirectionOutput>,
}

impl DirectionMachine {
    pub fn new() -> Self {
        Self {
            state: DirectionState::Open,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> DirectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == DirectionState::Open
    }

    fn end_of_stream(&mut self) {
        if self.state == DirectionState::Open {
            self.state = DirectionState::HalfClosed;
            self.pending.push_back(DirectionOutput::HalfClosed);
        }
    }

    fn terminate(&mut self) {
        if self.state != DirectionState::Closed {
            self.state = DirectionState::Closed;
            self.pending.push_back(DirectionOutput::Closed);
        }
    }
}

impl Default for DirectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

pub enum DirectionInput {
    /// The end marker was sent or received.
    EndOfStream,
    /// The call finished, failed or was cancelled.
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionOutput {
    HalfClosed,
    Closed,
}

impl StateMachine for DirectionMachine {
    type Input = DirectionInput;
    type Output = DirectionOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            DirectionInput::EndOfStream => self.end_of_stream(),
            DirectionInput::Terminate => self.terminate(),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_close_then_close() {
        let mut machine = DirectionMachine::new();
        assert!(machine.is_open());

        machine.process_input(DirectionInput::EndOfStream);
        assert_eq!(machine.state(), DirectionState::HalfClosed);
        assert_eq!(machine.poll_output(), Some(DirectionOutput::HalfClosed));

        machine.process_input(DirectionInput::Terminate);
        assert_eq!(machine.state(), DirectionState::Closed);
        assert_eq!(machine.poll_output(), Some(DirectionOutput::Closed));
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_end_of_stream_reported_once() {
        let mut machine = DirectionMachine::new();

        machine.process_input(DirectionInput::EndOfStream);
        machine.process_input(DirectionInput::EndOfStream);

        assert_eq!(machine.poll_output(), Some(DirectionOutput::HalfClosed));
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_terminate_skips_half_close() {
        let mut machine = DirectionMachine::new();

        machine.process_input(DirectionInput::Terminate);
        // A closed direction never reopens or half-closes.
        machine.process_input(DirectionInput::EndOfStream);

        assert_eq!(machine.state(), DirectionState::Closed);
        assert_eq!(machine.poll_output(), Some(DirectionOutput::Closed));
        assert!(machine.poll_output().is_none());
    }
}
