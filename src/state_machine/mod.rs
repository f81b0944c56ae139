pub mod direction;

/// The [`StateMachine`] trait provides calling semantics for pure, deterministic state machines.
///
/// # Functionality
/// A state machine operates on defined inputs and outputs. Multiple kinds of input and output are
/// grouped by the associated types [`Input`](StateMachine::Input) and
/// [`Output`](StateMachine::Output), most often enums, and dispatched through
/// [`process_input`](StateMachine::process_input) and [`poll_output`](StateMachine::poll_output).
///
/// Keeping the dispatch in this trait lets the machine itself stay focused on its transitions
/// while the owner (for example a stream half) decides which effects to perform for each output.
///
/// # Invariants
/// Implementors *must* be pure so that the same inputs always produce the same outputs:
///
/// - No interior mutability and no shared ownership (`Rc`, `Arc`, `Mutex`, cells).
/// - No IO, no system time and no system randomness. Anything of that kind is provided as input.
/// - No threads, no async and no blocking.
///
/// Logging and metrics are allowed as side effects as long as the logic of the machine never
/// depends on their outcome.
///
/// # Example
/// ```ignore
/// pub enum SwitchInput {
///     Toggle,
/// }
///
/// pub enum SwitchOutput {
///     Changed(bool),
/// }
///
/// pub struct Switch {
///     on: bool,
///     changed: bool,
/// }
///
/// impl StateMachine for Switch {
///     type Input = SwitchInput;
///     type Output = SwitchOutput;
///
///     fn process_input(&mut self, input: Self::Input) {
///         match input {
///             SwitchInput::Toggle => {
///                 self.on = !self.on;
///                 self.changed = true;
///             }
///         }
///     }
///
///     fn poll_output(&mut self) -> Option<Self::Output> {
///         std::mem::take(&mut self.changed).then_some(SwitchOutput::Changed(self.on))
///     }
/// }
/// ```
pub trait StateMachine {
    /// The type of input that is [processed](StateMachine::process_input) by the state machine.
    type Input;
    /// The type of output that is [polled](StateMachine::poll_output) from the state machine.
    type Output;

    /// Process the provided `input` into the state machine.
    fn process_input(&mut self, input: Self::Input);

    /// Poll the state machine for output, returning the first available output if present.
    fn poll_output(&mut self) -> Option<Self::Output>;
}
