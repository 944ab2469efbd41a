//! A VM that replays a recorded execution trace.
//!
//! Each non-empty line of a trace is one directive; `#` starts a comment.
//!
//! ```text
//! call <function> <source> <line>   enter a function
//! line <line>                       advance to a line in the current function
//! set <name> <type> <value...>      assign a local in the current function
//! return                            leave the current function
//! error <message...>                raise an uncaught error
//! sleep <ms>                        stall the VM thread
//! ```
//!
//! Expressions understood by [`DebugVm::evaluate`] are a local name, an
//! integer, a quoted string, `true`/`false`/`null`, or two of those joined
//! by a comparison operator.

use std::cmp::Ordering;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::command::LineNo;
use crate::error::Result as ServerResult;
use crate::handle::{ServerKey, ServerRegistry};
use crate::server::DebugServer;
use crate::vm::{DebugEvent, DebugVm, Evaluation, StackFrame, Variable};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("trace line {line}: {message}")]
pub struct TraceError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Call {
        function: String,
        source: String,
        line: LineNo,
    },
    Line(LineNo),
    Set(Variable),
    Return,
    Error(String),
    Sleep(Duration),
}

impl Directive {
    fn parse(text: &str, line_no: usize) -> Result<Self, TraceError> {
        let err = |message: &str| TraceError {
            line: line_no,
            message: message.to_string(),
        };
        let tokens = text.split_whitespace().collect::<Vec<_>>();

        match tokens.as_slice() {
            ["call", function, source, line] => Ok(Directive::Call {
                function: function.to_string(),
                source: source.to_string(),
                line: line.parse().map_err(|_| err("invalid line number"))?,
            }),
            ["line", line] => Ok(Directive::Line(
                line.parse().map_err(|_| err("invalid line number"))?,
            )),
            ["set", name, type_name, value @ ..] if !value.is_empty() => {
                Ok(Directive::Set(Variable::new(*name, *type_name, value.join(" "))))
            }
            ["return"] => Ok(Directive::Return),
            ["error", message @ ..] if !message.is_empty() => {
                Ok(Directive::Error(message.join(" ")))
            }
            ["sleep", ms] => {
                let ms = ms.parse().map_err(|_| err("invalid duration"))?;
                Ok(Directive::Sleep(Duration::from_millis(ms)))
            }
            _ => Err(err(&format!("unrecognized directive '{}'", text))),
        }
    }
}

/// What the VM did when it executed one directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Event(DebugEvent),
    Error(String),
    /// A directive with no observable event, e.g. `set`.
    Quiet,
}

#[derive(Debug, Default)]
pub struct TraceVm {
    directives: Vec<Directive>,
    pc: usize,
    frames: Vec<StackFrame>,
    pending_pop: bool,
    user_data: Option<ServerKey>,
}

impl TraceVm {
    pub fn parse(script: &str) -> Result<Self, TraceError> {
        let directives = script
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.split('#').next().unwrap_or_default().trim()))
            .filter(|(_, line)| !line.is_empty())
            .map(|(i, line)| Directive::parse(line, i))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            directives,
            ..Default::default()
        })
    }

    pub fn is_finished(&self) -> bool {
        self.pc >= self.directives.len()
    }

    /// Executes the next directive. `Return` events are reported before the
    /// frame is popped, `Call` events after the frame is pushed.
    pub fn step(&mut self) -> Option<Step> {
        let directive = self.directives.get(self.pc)?.clone();
        self.pc += 1;

        let step = match directive {
            Directive::Call { function, source, line } => {
                self.frames.insert(
                    0,
                    StackFrame {
                        function: function.clone(),
                        source: source.clone(),
                        line: i64::from(line),
                        locals: Vec::new(),
                    },
                );
                Step::Event(DebugEvent::call(line, source, function))
            }
            Directive::Line(line) => match self.frames.first_mut() {
                Some(frame) => {
                    frame.line = i64::from(line);
                    let (source, function) = (frame.source.clone(), frame.function.clone());
                    Step::Event(DebugEvent::line(line, source, function))
                }
                None => Step::Event(DebugEvent::line(line, "unknown", "main")),
            },
            Directive::Set(variable) => {
                if let Some(frame) = self.frames.first_mut() {
                    match frame.locals.iter_mut().find(|v| v.name == variable.name) {
                        Some(existing) => *existing = variable,
                        None => frame.locals.push(variable),
                    }
                }
                Step::Quiet
            }
            Directive::Return => {
                let event = self.frames.first().map(|frame| {
                    DebugEvent::ret(
                        u32::try_from(frame.line).unwrap_or_default(),
                        frame.source.clone(),
                        frame.function.clone(),
                    )
                });
                self.pending_pop = event.is_some();
                event.map(Step::Event).unwrap_or(Step::Quiet)
            }
            Directive::Error(message) => Step::Error(message),
            Directive::Sleep(duration) => {
                thread::sleep(duration);
                Step::Quiet
            }
        };
        Some(step)
    }

    /// Runs the whole trace against `server`.
    pub fn run(&mut self, server: &mut DebugServer) -> ServerResult<()> {
        while let Some(step) = self.step() {
            let result = match step {
                Step::Event(event) => server.on_hook(self, event),
                Step::Error(message) => {
                    let result = server.on_error(self, &message);
                    self.frames.clear();
                    self.pc = self.directives.len();
                    result
                }
                Step::Quiet => Ok(()),
            };
            self.finish_return();
            result?;
        }
        Ok(())
    }

    /// Executes one directive through the callback trampolines. Returns
    /// `false` once the trace is exhausted.
    pub fn step_registered(&mut self, registry: &mut ServerRegistry) -> ServerResult<bool> {
        let Some(step) = self.step() else {
            return Ok(false);
        };
        let result = match step {
            Step::Event(event) => registry.debug_hook(self, event),
            Step::Error(message) => {
                let result = registry.error_handler(self, &message);
                self.frames.clear();
                self.pc = self.directives.len();
                result
            }
            Step::Quiet => Ok(()),
        };
        self.finish_return();
        result.map(|()| true)
    }

    /// Runs the whole trace through the callback trampolines.
    pub fn run_registered(&mut self, registry: &mut ServerRegistry) -> ServerResult<()> {
        while self.step_registered(registry)? {}
        Ok(())
    }

    /// Pops the frame left by a `return` once its event was delivered.
    pub fn finish_return(&mut self) {
        if std::mem::take(&mut self.pending_pop) && !self.frames.is_empty() {
            self.frames.remove(0);
        }
    }

    fn local(&self, name: &str, level: usize) -> Option<&Variable> {
        self.frames.get(level)?.locals.iter().find(|v| v.name == name)
    }

    fn operand(&self, token: &str, level: usize) -> Result<Evaluation, String> {
        let literal = |type_name: &str, value: &str| Evaluation {
            type_name: type_name.to_string(),
            value: value.to_string(),
            truthy: is_truthy(value),
        };

        match token {
            "true" | "false" => Ok(literal("bool", token)),
            "null" => Ok(literal("null", token)),
            t if t.parse::<i64>().is_ok() => Ok(literal("integer", t)),
            t if t.len() >= 2 && t.starts_with('"') && t.ends_with('"') => {
                Ok(literal("string", &t[1..t.len() - 1]))
            }
            name => self
                .local(name, level)
                .map(|v| literal(&v.type_name, &v.value))
                .ok_or_else(|| format!("the index '{}' does not exist", name)),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value, "" | "false" | "null" | "0")
}

fn compare(op: &str, lhs: &Evaluation, rhs: &Evaluation) -> Result<bool, String> {
    let ordering = match (lhs.value.parse::<i64>(), rhs.value.parse::<i64>()) {
        (Ok(l), Ok(r)) => l.cmp(&r),
        _ => lhs.value.cmp(&rhs.value),
    };
    match op {
        "==" => Ok(ordering == Ordering::Equal),
        "!=" => Ok(ordering != Ordering::Equal),
        "<" => Ok(ordering == Ordering::Less),
        "<=" => Ok(ordering != Ordering::Greater),
        ">" => Ok(ordering == Ordering::Greater),
        ">=" => Ok(ordering != Ordering::Less),
        other => Err(format!("unsupported operator '{}'", other)),
    }
}

impl DebugVm for TraceVm {
    fn call_depth(&self) -> usize {
        self.frames.len()
    }

    fn stack_frames(&self) -> Vec<StackFrame> {
        self.frames.clone()
    }

    fn top_frame(&self) -> Option<StackFrame> {
        self.frames.first().cloned()
    }

    fn evaluate(&mut self, expression: &str, level: usize) -> Result<Evaluation, String> {
        match expression.split_whitespace().collect::<Vec<_>>().as_slice() {
            [single] => self.operand(single, level),
            [lhs, op, rhs] => {
                let result = compare(op, &self.operand(lhs, level)?, &self.operand(rhs, level)?)?;
                Ok(Evaluation {
                    type_name: "bool".to_string(),
                    value: result.to_string(),
                    truthy: result,
                })
            }
            _ => Err(format!("cannot evaluate '{}'", expression)),
        }
    }

    fn user_data(&self) -> Option<ServerKey> {
        self.user_data
    }

    fn set_user_data(&mut self, key: Option<ServerKey>) {
        self.user_data = key;
    }
}
