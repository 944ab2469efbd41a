use std::fmt;

pub type LineNo = u32;
pub type WatchId = u32;

/// A request from the debugger client, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// The client finished its initial configuration.
    Ready,
    SetBreakpoint {
        source: String,
        line: LineNo,
        condition: Option<String>,
    },
    ClearBreakpoint {
        source: String,
        line: LineNo,
    },
    SetWatch {
        id: WatchId,
        expression: String,
    },
    ClearWatch {
        id: WatchId,
    },
    EvaluateWatch {
        id: WatchId,
    },
    Continue,
    StepInto,
    StepOver,
    StepOut,
    /// Break at the next line event.
    Suspend,
    /// Send the current stack again.
    Backtrace,
    Disconnect,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Command {
        let tokens = line.split_whitespace().collect::<Vec<_>>();
        let Some((word, args)) = tokens.split_first() else {
            return Command::Unknown(line.to_string());
        };

        let command = match (word.to_ascii_uppercase().as_str(), args) {
            ("READY", []) => Some(Command::Ready),
            ("SETBP", [source, line_no, condition @ ..]) => {
                line_no.parse().ok().map(|line| Command::SetBreakpoint {
                    source: source.to_string(),
                    line,
                    condition: if condition.is_empty() {
                        None
                    } else {
                        Some(condition.join(" "))
                    },
                })
            }
            ("CLRBP", [source, line_no]) => {
                line_no.parse().ok().map(|line| Command::ClearBreakpoint {
                    source: source.to_string(),
                    line,
                })
            }
            ("SETWATCH", [id, expression @ ..]) if !expression.is_empty() => {
                id.parse().ok().map(|id| Command::SetWatch {
                    id,
                    expression: expression.join(" "),
                })
            }
            ("CLRWATCH", [id]) => id.parse().ok().map(|id| Command::ClearWatch { id }),
            ("EVAL", [id]) => id.parse().ok().map(|id| Command::EvaluateWatch { id }),
            ("GO" | "CONTINUE", []) => Some(Command::Continue),
            ("STEPIN", []) => Some(Command::StepInto),
            ("STEPOVER", []) => Some(Command::StepOver),
            ("STEPOUT", []) => Some(Command::StepOut),
            ("SUSPEND", []) => Some(Command::Suspend),
            ("BACKTRACE", []) => Some(Command::Backtrace),
            ("DISCONNECT", []) => Some(Command::Disconnect),
            _ => None,
        };

        command.unwrap_or_else(|| Command::Unknown(line.to_string()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ready => write!(f, "READY"),
            Command::SetBreakpoint {
                source,
                line,
                condition: Some(condition),
            } => write!(f, "SETBP {} {} {}", source, line, condition),
            Command::SetBreakpoint {
                source,
                line,
                condition: None,
            } => write!(f, "SETBP {} {}", source, line),
            Command::ClearBreakpoint { source, line } => write!(f, "CLRBP {} {}", source, line),
            Command::SetWatch { id, expression } => write!(f, "SETWATCH {} {}", id, expression),
            Command::ClearWatch { id } => write!(f, "CLRWATCH {}", id),
            Command::EvaluateWatch { id } => write!(f, "EVAL {}", id),
            Command::Continue => write!(f, "GO"),
            Command::StepInto => write!(f, "STEPIN"),
            Command::StepOver => write!(f, "STEPOVER"),
            Command::StepOut => write!(f, "STEPOUT"),
            Command::Suspend => write!(f, "SUSPEND"),
            Command::Backtrace => write!(f, "BACKTRACE"),
            Command::Disconnect => write!(f, "DISCONNECT"),
            Command::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}
