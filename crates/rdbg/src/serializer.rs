//! Encoding of VM state for the client.
//!
//! A [`SerializeStrategy`] is bound to the VM exactly once, when the server
//! is created. The resulting [`SerializerHandle`] is kept for the lifetime of
//! the server and reused for every request.

use std::cell::Cell;
use std::fmt::Debug;

use tracing::debug;

use crate::controller::{BreakReason, Location};
use crate::error::CompileError;
use crate::protocol::{Reply, WatchResult, WatchValue};
use crate::registry::Watch;
use crate::vm::DebugVm;

/// What to describe.
#[derive(Debug, Clone, Copy)]
pub enum SerializeTarget<'a> {
    /// Full state block sent when the VM suspends.
    Break {
        reason: &'a BreakReason,
        location: &'a Location,
        watches: &'a [&'a Watch],
    },
    Watch(&'a Watch),
    Stack,
}

/// A serializer bound to a VM.
pub trait StateSerializer: Debug {
    /// Returns one encoded line. Must only read VM state, apart from the
    /// evaluations `target` asks for.
    fn serialize(&self, vm: &mut dyn DebugVm, target: SerializeTarget<'_>) -> Vec<u8>;
}

/// Produces a [`StateSerializer`] for a VM.
pub trait SerializeStrategy {
    fn bind(&self, vm: &mut dyn DebugVm) -> Result<Box<dyn StateSerializer>, CompileError>;
}

#[derive(Debug)]
pub struct SerializerHandle {
    inner: Box<dyn StateSerializer>,
    calls: Cell<usize>,
}

impl SerializerHandle {
    pub fn initialize(
        strategy: &dyn SerializeStrategy,
        vm: &mut dyn DebugVm,
    ) -> Result<Self, CompileError> {
        let inner = strategy.bind(vm)?;
        debug!(serializer = ?inner, "Serializer bound");
        Ok(Self {
            inner,
            calls: Cell::new(0),
        })
    }

    pub fn serialize(&self, vm: &mut dyn DebugVm, target: SerializeTarget<'_>) -> Vec<u8> {
        self.calls.set(self.calls.get() + 1);
        self.inner.serialize(vm, target)
    }

    /// Number of serialize requests served so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

/// The default strategy: JSON lines as documented in [`crate::protocol`].
#[derive(Debug, Clone, Copy)]
pub struct JsonStrategy {
    pub include_locals: bool,
}

impl Default for JsonStrategy {
    fn default() -> Self {
        Self { include_locals: true }
    }
}

impl SerializeStrategy for JsonStrategy {
    fn bind(&self, _vm: &mut dyn DebugVm) -> Result<Box<dyn StateSerializer>, CompileError> {
        Ok(Box::new(JsonStateSerializer {
            include_locals: self.include_locals,
        }))
    }
}

#[derive(Debug)]
pub struct JsonStateSerializer {
    include_locals: bool,
}

impl JsonStateSerializer {
    fn stack(&self, vm: &dyn DebugVm) -> Vec<crate::vm::StackFrame> {
        let mut frames = vm.stack_frames();
        if !self.include_locals {
            frames.iter_mut().for_each(|frame| frame.locals.clear());
        }
        frames
    }

    fn watch_value(vm: &mut dyn DebugVm, watch: &Watch) -> WatchValue {
        let result = match vm.evaluate(&watch.expression, 0) {
            Ok(evaluation) => WatchResult::Value(evaluation),
            Err(error) => WatchResult::Error { error },
        };
        WatchValue {
            id: watch.id,
            expression: watch.expression.clone(),
            result,
        }
    }
}

impl StateSerializer for JsonStateSerializer {
    fn serialize(&self, vm: &mut dyn DebugVm, target: SerializeTarget<'_>) -> Vec<u8> {
        let reply = match target {
            SerializeTarget::Break {
                reason,
                location,
                watches,
            } => Reply::Break {
                reason: reason.clone(),
                location: location.clone(),
                stack: self.stack(vm),
                watches: watches.iter().map(|w| Self::watch_value(vm, w)).collect(),
            },
            SerializeTarget::Watch(watch) => Reply::Watch(Self::watch_value(vm, watch)),
            SerializeTarget::Stack => Reply::Stack { stack: self.stack(vm) },
        };
        reply.to_line()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::vm::{Evaluation, StackFrame, Variable};

    #[derive(Debug, Default)]
    struct FixedVm {
        evaluations: usize,
    }

    impl DebugVm for FixedVm {
        fn call_depth(&self) -> usize {
            1
        }

        fn stack_frames(&self) -> Vec<StackFrame> {
            vec![StackFrame {
                function: "main".to_string(),
                source: "src.nut".to_string(),
                line: 10,
                locals: vec![Variable::new("a", "integer", "1")],
            }]
        }

        fn evaluate(&mut self, expression: &str, _level: usize) -> Result<Evaluation, String> {
            self.evaluations += 1;
            match expression {
                "a" => Ok(Evaluation {
                    type_name: "integer".to_string(),
                    value: "1".to_string(),
                    truthy: true,
                }),
                other => Err(format!("the index '{}' does not exist", other)),
            }
        }
    }

    #[derive(Debug, Default)]
    struct CountingStrategy {
        binds: Rc<Cell<usize>>,
        fail: bool,
    }

    impl SerializeStrategy for CountingStrategy {
        fn bind(&self, vm: &mut dyn DebugVm) -> Result<Box<dyn StateSerializer>, CompileError> {
            self.binds.set(self.binds.get() + 1);
            if self.fail {
                return Err(CompileError("syntax error".to_string()));
            }
            JsonStrategy::default().bind(vm)
        }
    }

    fn decode(bytes: &[u8]) -> serde_json::Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_serialize_break() {
        let mut vm = FixedVm::default();
        let handle = SerializerHandle::initialize(&JsonStrategy::default(), &mut vm).unwrap();
        let watches = [Watch::new(1, "a"), Watch::new(2, "missing")];
        let watch_refs = watches.iter().collect::<Vec<_>>();

        let bytes = handle.serialize(
            &mut vm,
            SerializeTarget::Break {
                reason: &BreakReason::Breakpoint,
                location: &Location::new("src.nut", 10, "main"),
                watches: &watch_refs,
            },
        );

        assert_eq!(
            decode(&bytes),
            json!({
                "type": "break",
                "reason": {"kind": "breakpoint"},
                "location": {"source": "src.nut", "line": 10, "function": "main"},
                "stack": [{
                    "function": "main",
                    "source": "src.nut",
                    "line": 10,
                    "locals": [{"name": "a", "type": "integer", "value": "1"}]
                }],
                "watches": [
                    {"id": 1, "expression": "a", "value_type": "integer", "value": "1"},
                    {
                        "id": 2,
                        "expression": "missing",
                        "error": "the index 'missing' does not exist"
                    }
                ]
            })
        );
    }

    #[test]
    fn test_serialize_is_idempotent() {
        let mut vm = FixedVm::default();
        let handle = SerializerHandle::initialize(&JsonStrategy::default(), &mut vm).unwrap();
        let watch = Watch::new(1, "a");

        let first = handle.serialize(&mut vm, SerializeTarget::Watch(&watch));
        let second = handle.serialize(&mut vm, SerializeTarget::Watch(&watch));

        assert_eq!(first, second);
        assert_eq!(handle.calls(), 2);
        assert_eq!(vm.evaluations, 2);
    }

    #[test]
    fn test_serialize_stack_without_locals() {
        let mut vm = FixedVm::default();
        let strategy = JsonStrategy { include_locals: false };
        let handle = SerializerHandle::initialize(&strategy, &mut vm).unwrap();

        let bytes = handle.serialize(&mut vm, SerializeTarget::Stack);
        assert_eq!(
            decode(&bytes),
            json!({
                "type": "stack",
                "stack": [{"function": "main", "source": "src.nut", "line": 10, "locals": []}]
            })
        );
        assert_eq!(vm.evaluations, 0);
    }

    #[test]
    fn test_initialize_binds_once() {
        let mut vm = FixedVm::default();
        let strategy = CountingStrategy::default();
        let handle = SerializerHandle::initialize(&strategy, &mut vm).unwrap();

        for _ in 0..3 {
            handle.serialize(&mut vm, SerializeTarget::Stack);
        }
        assert_eq!(strategy.binds.get(), 1);
        assert_eq!(handle.calls(), 3);
    }

    #[test]
    fn test_initialize_failure() {
        let mut vm = FixedVm::default();
        let strategy = CountingStrategy {
            fail: true,
            ..Default::default()
        };

        let err = SerializerHandle::initialize(&strategy, &mut vm).unwrap_err();
        assert_eq!(err, CompileError("syntax error".to_string()));
    }
}
