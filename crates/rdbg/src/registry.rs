use std::collections::HashMap;

use itertools::Itertools;
use serde::Serialize;

use crate::command::{LineNo, WatchId};

/// A source location at which execution should suspend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Breakpoint {
    pub source: String,
    pub line: LineNo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Breakpoint {
    pub fn new(source: impl Into<String>, line: LineNo) -> Self {
        Self {
            source: source.into(),
            line,
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// An expression the client asks to have evaluated while suspended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Watch {
    pub id: WatchId,
    pub expression: String,
}

impl Watch {
    pub fn new(id: WatchId, expression: impl Into<String>) -> Self {
        Self {
            id,
            expression: expression.into(),
        }
    }
}

/// Breakpoints keyed by source then line, and watches keyed by id.
///
/// A source with no breakpoints left has no entry.
#[derive(Debug, Default)]
pub struct Registry {
    breakpoints: HashMap<String, HashMap<LineNo, Breakpoint>>,
    watches: HashMap<WatchId, Watch>,
    resets: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the breakpoint at the same location.
    pub fn set_breakpoint(&mut self, breakpoint: Breakpoint) -> Option<Breakpoint> {
        self.breakpoints
            .entry(breakpoint.source.clone())
            .or_default()
            .insert(breakpoint.line, breakpoint)
    }

    pub fn clear_breakpoint(&mut self, source: &str, line: LineNo) -> Option<Breakpoint> {
        let lines = self.breakpoints.get_mut(source)?;
        let removed = lines.remove(&line);
        if lines.is_empty() {
            self.breakpoints.remove(source);
        }
        removed
    }

    pub fn set_watch(&mut self, watch: Watch) -> Option<Watch> {
        self.watches.insert(watch.id, watch)
    }

    pub fn clear_watch(&mut self, id: WatchId) -> Option<Watch> {
        self.watches.remove(&id)
    }

    pub fn matches(&self, source: &str, line: LineNo) -> Option<&Breakpoint> {
        self.breakpoints.get(source)?.get(&line)
    }

    pub fn watch(&self, id: WatchId) -> Option<&Watch> {
        self.watches.get(&id)
    }

    /// Watches ordered by id.
    pub fn watches(&self) -> Vec<&Watch> {
        self.watches.values().sorted_by_key(|w| w.id).collect()
    }

    /// Breakpoints ordered by source and line.
    pub fn breakpoints(&self) -> Vec<&Breakpoint> {
        self.breakpoints
            .values()
            .flat_map(HashMap::values)
            .sorted_by(|a, b| (&a.source, a.line).cmp(&(&b.source, b.line)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty() && self.watches.is_empty()
    }

    pub fn clear_all(&mut self) {
        self.breakpoints.clear();
        self.watches.clear();
        self.resets += 1;
    }

    /// Number of times [`Registry::clear_all`] ran.
    pub fn resets(&self) -> usize {
        self.resets
    }
}
