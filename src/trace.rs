use serde::Serialize;
use std::collections::BTreeMap;

/// Audit trail of every intermediate amount produced while pricing one request.
///
/// Built per request and threaded through the call graph by `&mut`; nothing here is
/// shared between requests. Keys are leg names (`CALL`, `PUT`) or component names
/// (`bs_probability`, `vol_spread_markup`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DebugTrace {
    entries: BTreeMap<String, TraceNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TraceNode {
    Value(f64),
    Amount { amount: f64, parameters: DebugTrace },
    Branch(DebugTrace),
}

impl TraceNode {
    /// The scalar carried by this node, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::Amount { amount, .. } => Some(*amount),
            Self::Branch(_) => None,
        }
    }

    fn children(&self) -> Option<&DebugTrace> {
        match self {
            Self::Value(_) => None,
            Self::Amount { parameters, .. } => Some(parameters),
            Self::Branch(trace) => Some(trace),
        }
    }
}

impl DebugTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`DebugTrace::value`], for parameter sets.
    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.value(key, value);
        self
    }

    pub fn value(&mut self, key: &str, value: f64) -> &mut Self {
        self.entries.insert(key.to_string(), TraceNode::Value(value));
        self
    }

    pub fn amount(&mut self, key: &str, amount: f64, parameters: DebugTrace) -> &mut Self {
        self.entries
            .insert(key.to_string(), TraceNode::Amount { amount, parameters });
        self
    }

    /// Attach a sub-trace. An existing branch under the same key is extended.
    pub fn branch(&mut self, key: &str, trace: DebugTrace) -> &mut Self {
        match self.entries.get_mut(key) {
            Some(TraceNode::Branch(existing)) => existing.merge(trace),
            _ => {
                self.entries.insert(key.to_string(), TraceNode::Branch(trace));
            }
        }
        self
    }

    pub fn merge(&mut self, other: DebugTrace) {
        for (key, node) in other.entries {
            match node {
                TraceNode::Branch(trace) => {
                    self.branch(&key, trace);
                }
                node => {
                    self.entries.insert(key, node);
                }
            }
        }
    }

    /// Walk `path` through branches and parameter sets.
    pub fn get(&self, path: &[&str]) -> Option<&TraceNode> {
        let (first, rest) = path.split_first()?;
        let node = self.entries.get(*first)?;
        if rest.is_empty() {
            Some(node)
        } else {
            node.children()?.get(rest)
        }
    }

    pub fn amount_at(&self, path: &[&str]) -> Option<f64> {
        self.get(path)?.as_f64()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
