use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::command::Command;
use crate::registry::Registry;
use crate::vm::{DebugEvent, DebugVm, EventKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub source: String,
    /// `-1` when unknown.
    pub line: i64,
    pub function: String,
}

impl Location {
    pub fn new(source: impl Into<String>, line: i64, function: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            line,
            function: function.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new("unknown", -1, "unknown")
    }
}

impl From<&DebugEvent> for Location {
    fn from(event: &DebugEvent) -> Self {
        Self::new(event.source.clone(), i64::from(event.line), event.function.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakReason {
    Breakpoint,
    Step,
    Pause,
    Error { message: String },
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakReason::Breakpoint => write!(f, "breakpoint"),
            BreakReason::Step => write!(f, "step"),
            BreakReason::Pause => write!(f, "pause"),
            BreakReason::Error { message } => write!(f, "error: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionState {
    #[default]
    Running,
    Suspended {
        reason: BreakReason,
        location: Location,
    },
    SteppingInto,
    /// Break at the next line event whose depth is at most this value.
    SteppingOver(usize),
    /// Same rule as `SteppingOver`, recorded one frame up.
    SteppingOut(usize),
    PauseRequested,
}

/// Decides, per hook event, whether the VM must stop.
#[derive(Debug, Default)]
pub struct ExecutionController {
    state: ExecutionState,
}

impl ExecutionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.state, ExecutionState::Suspended { .. })
    }

    /// Returns the reason when `event` suspends execution. Only line events
    /// are suspension points; call and return events move the depth.
    pub fn on_event(
        &mut self,
        event: &DebugEvent,
        depth: usize,
        registry: &Registry,
        vm: &mut dyn DebugVm,
    ) -> Option<BreakReason> {
        if event.kind != EventKind::Line {
            return None;
        }

        let reason = if self.breakpoint_hit(event, registry, vm) {
            Some(BreakReason::Breakpoint)
        } else {
            match self.state {
                ExecutionState::SteppingInto => Some(BreakReason::Step),
                ExecutionState::SteppingOver(target) | ExecutionState::SteppingOut(target)
                    if depth <= target =>
                {
                    Some(BreakReason::Step)
                }
                ExecutionState::PauseRequested => Some(BreakReason::Pause),
                _ => None,
            }
        }?;

        debug!(source = %event.source, line = event.line, depth, %reason, "Suspending");
        self.suspend(reason.clone(), Location::from(event));
        Some(reason)
    }

    fn breakpoint_hit(
        &self,
        event: &DebugEvent,
        registry: &Registry,
        vm: &mut dyn DebugVm,
    ) -> bool {
        let Some(breakpoint) = registry.matches(&event.source, event.line) else {
            return false;
        };

        match &breakpoint.condition {
            None => true,
            Some(condition) => match vm.evaluate(condition, 0) {
                Ok(evaluation) => evaluation.truthy,
                Err(e) => {
                    warn!(
                        source = %breakpoint.source,
                        line = breakpoint.line,
                        condition = %condition,
                        error = %e,
                        "Breakpoint condition failed"
                    );
                    false
                }
            },
        }
    }

    /// Forces a suspend for an uncaught VM error.
    pub fn on_error(&mut self, message: impl Into<String>, location: Location) -> BreakReason {
        let reason = BreakReason::Error {
            message: message.into(),
        };
        self.suspend(reason.clone(), location);
        reason
    }

    pub fn suspend(&mut self, reason: BreakReason, location: Location) {
        self.state = ExecutionState::Suspended { reason, location };
    }

    /// Applies a resume command issued at `depth`. Returns `false` for
    /// commands that do not resume.
    pub fn resume(&mut self, command: &Command, depth: usize) -> bool {
        let next = match command {
            Command::Continue => ExecutionState::Running,
            Command::StepInto => ExecutionState::SteppingInto,
            Command::StepOver => ExecutionState::SteppingOver(depth),
            Command::StepOut => ExecutionState::SteppingOut(depth.saturating_sub(1)),
            _ => return false,
        };
        debug!(command = %command, depth, "Resuming");
        self.state = next;
        true
    }

    /// Breaks at the next line event unless already suspended.
    pub fn request_pause(&mut self) {
        if !self.is_suspended() {
            self.state = ExecutionState::PauseRequested;
        }
    }

    /// Drops any suspend or stepping state, e.g. when the peer is gone.
    pub fn release(&mut self) {
        self.state = ExecutionState::Running;
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::registry::Breakpoint;
    use crate::vm::{Evaluation, StackFrame};

    #[derive(Debug, Default)]
    struct ConditionVm {
        truthy: bool,
        fail: bool,
        evaluated: Vec<String>,
    }

    impl DebugVm for ConditionVm {
        fn call_depth(&self) -> usize {
            1
        }

        fn stack_frames(&self) -> Vec<StackFrame> {
            Vec::new()
        }

        fn evaluate(&mut self, expression: &str, _level: usize) -> Result<Evaluation, String> {
            self.evaluated.push(expression.to_string());
            if self.fail {
                return Err("the index 'x' does not exist".to_string());
            }
            Ok(Evaluation {
                type_name: "bool".to_string(),
                value: self.truthy.to_string(),
                truthy: self.truthy,
            })
        }
    }

    fn line(line: u32) -> DebugEvent {
        DebugEvent::line(line, "src.nut", "main")
    }

    #[test]
    fn test_breakpoint_suspends_only_at_its_line() {
        let mut registry = Registry::new();
        registry.set_breakpoint(Breakpoint::new("src.nut", 10));
        let mut vm = ConditionVm::default();
        let mut controller = ExecutionController::new();

        assert_eq!(
            controller.on_event(&line(10), 1, &registry, &mut vm),
            Some(BreakReason::Breakpoint)
        );
        assert_eq!(
            controller.state(),
            &ExecutionState::Suspended {
                reason: BreakReason::Breakpoint,
                location: Location::new("src.nut", 10, "main"),
            }
        );

        assert!(controller.resume(&Command::Continue, 1));
        assert_eq!(controller.on_event(&line(11), 1, &registry, &mut vm), None);
        assert_eq!(controller.state(), &ExecutionState::Running);
    }

    #[rstest]
    #[case(EventKind::Call)]
    #[case(EventKind::Return)]
    fn test_non_line_events_never_suspend(#[case] kind: EventKind) {
        let mut registry = Registry::new();
        registry.set_breakpoint(Breakpoint::new("src.nut", 10));
        let mut vm = ConditionVm::default();
        let mut controller = ExecutionController::new();
        controller.resume(&Command::StepInto, 1);

        let event = DebugEvent::new(kind, 10, "src.nut", "f");
        assert_eq!(controller.on_event(&event, 2, &registry, &mut vm), None);
        assert_eq!(controller.state(), &ExecutionState::SteppingInto);
    }

    #[rstest]
    #[case(true, Some(BreakReason::Breakpoint))]
    #[case(false, None)]
    fn test_conditional_breakpoint(#[case] truthy: bool, #[case] expected: Option<BreakReason>) {
        let mut registry = Registry::new();
        registry.set_breakpoint(Breakpoint::new("src.nut", 10).with_condition("x > 3"));
        let mut vm = ConditionVm {
            truthy,
            ..Default::default()
        };
        let mut controller = ExecutionController::new();

        assert_eq!(controller.on_event(&line(10), 1, &registry, &mut vm), expected);
        assert_eq!(vm.evaluated, vec!["x > 3".to_string()]);
    }

    #[test]
    fn test_failing_condition_does_not_break() {
        let mut registry = Registry::new();
        registry.set_breakpoint(Breakpoint::new("src.nut", 10).with_condition("x"));
        let mut vm = ConditionVm {
            fail: true,
            ..Default::default()
        };
        let mut controller = ExecutionController::new();

        assert_eq!(controller.on_event(&line(10), 1, &registry, &mut vm), None);
    }

    #[rstest]
    #[case(Command::StepOver, 2, vec![(3, false), (3, false), (2, true)])]
    #[case(Command::StepOver, 2, vec![(2, true)])]
    #[case(Command::StepOver, 2, vec![(1, true)])]
    #[case(Command::StepOut, 2, vec![(2, false), (3, false), (1, true)])]
    #[case(Command::StepOut, 0, vec![(0, true)])]
    #[case(Command::StepInto, 2, vec![(3, true)])]
    #[case(Command::Continue, 2, vec![(3, false), (2, false), (1, false)])]
    fn test_stepping_by_depth(
        #[case] command: Command,
        #[case] depth_at_step: usize,
        #[case] events: Vec<(usize, bool)>,
    ) {
        let registry = Registry::new();
        let mut vm = ConditionVm::default();
        let mut controller = ExecutionController::new();
        controller.resume(&command, depth_at_step);

        for (i, (depth, should_break)) in events.into_iter().enumerate() {
            let hit = controller.on_event(&line(20 + i as u32), depth, &registry, &mut vm);
            assert_eq!(hit.is_some(), should_break, "event {} at depth {}", i, depth);
        }
    }

    #[test]
    fn test_breakpoint_wins_over_step_reason() {
        let mut registry = Registry::new();
        registry.set_breakpoint(Breakpoint::new("src.nut", 5));
        let mut vm = ConditionVm::default();
        let mut controller = ExecutionController::new();
        controller.resume(&Command::StepInto, 1);

        assert_eq!(
            controller.on_event(&line(5), 1, &registry, &mut vm),
            Some(BreakReason::Breakpoint)
        );
    }

    #[test]
    fn test_breakpoint_hit_while_stepping_over_deeper_frames() {
        let mut registry = Registry::new();
        registry.set_breakpoint(Breakpoint::new("src.nut", 7));
        let mut vm = ConditionVm::default();
        let mut controller = ExecutionController::new();
        controller.resume(&Command::StepOver, 1);

        assert_eq!(
            controller.on_event(&line(7), 4, &registry, &mut vm),
            Some(BreakReason::Breakpoint)
        );
    }

    #[test]
    fn test_on_error_always_suspends() {
        let mut controller = ExecutionController::new();
        let location = Location::new("src.nut", 12, "bar");
        let reason = controller.on_error("the index 'foo' does not exist", location);

        assert_eq!(
            controller.state(),
            &ExecutionState::Suspended {
                reason: BreakReason::Error {
                    message: "the index 'foo' does not exist".to_string()
                },
                location: Location::new("src.nut", 12, "bar"),
            }
        );
        assert_eq!(reason.to_string(), "error: the index 'foo' does not exist");
    }

    #[test]
    fn test_pause_request() {
        let registry = Registry::new();
        let mut vm = ConditionVm::default();
        let mut controller = ExecutionController::new();
        controller.request_pause();

        assert_eq!(controller.state(), &ExecutionState::PauseRequested);
        assert_eq!(
            controller.on_event(&DebugEvent::call(1, "src.nut", "f"), 2, &registry, &mut vm),
            None
        );
        assert_eq!(
            controller.on_event(&line(2), 2, &registry, &mut vm),
            Some(BreakReason::Pause)
        );
    }

    #[rstest]
    #[case(Command::Ready)]
    #[case(Command::Suspend)]
    #[case(Command::SetWatch { id: 1, expression: "a".to_string() })]
    #[case(Command::Disconnect)]
    fn test_resume_ignores_other_commands(#[case] command: Command) {
        let mut controller = ExecutionController::new();
        controller.suspend(BreakReason::Step, Location::unknown());

        assert!(!controller.resume(&command, 1));
        assert!(controller.is_suspended());
    }

    #[test]
    fn test_release() {
        let mut controller = ExecutionController::new();
        controller.resume(&Command::StepOver, 3);
        controller.release();
        assert_eq!(controller.state(), &ExecutionState::Running);
    }
}
