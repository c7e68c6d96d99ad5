// Replicated value primitives: the payload type, write guards and the single-key cell.

use std::fmt;

/// Payload carried by a replicated key. Switches, doors and flags are `Bool`;
/// colour layers and checkpoint indices are `Int`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Bool(bool),
    Int(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bool => f.write_str("bool"),
            ValueKind::Int => f.write_str("int"),
        }
    }
}

/// Policy applied by the authority to writes proposed by peers.
/// Writes made directly by the authority (rules, thresholds) bypass it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteGuard {
    /// Every proposal is accepted.
    Any,
    /// Once the value leaves its initial value it can never change again.
    OneShot,
    /// Int proposals must fall inside `min..=max`.
    IntRange { min: i64, max: i64 },
    /// Derived state: peers may never propose a value.
    ServerOnly,
}

/// Reason a proposed write was refused by the authority.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("value is one-shot and already spent")]
    OneShotSpent,
    #[error("{value} is outside {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },
    #[error("value is derived on the server")]
    ServerOnly,
    #[error("`{member}` is not part of this level")]
    UnknownMember { member: String },
}

impl WriteGuard {
    pub fn check(&self, initial: &Value, current: &Value, proposed: &Value) -> Result<(), Rejection> {
        match self {
            WriteGuard::Any => Ok(()),
            WriteGuard::OneShot => {
                // Re-proposing the current value is fine; it becomes a no-op write.
                if current != initial && proposed != current {
                    Err(Rejection::OneShotSpent)
                } else {
                    Ok(())
                }
            }
            WriteGuard::IntRange { min, max } => match proposed.as_int() {
                Some(value) if value < *min || value > *max => Err(Rejection::OutOfRange {
                    value,
                    min: *min,
                    max: *max,
                }),
                _ => Ok(()),
            },
            WriteGuard::ServerOnly => Err(Rejection::ServerOnly),
        }
    }
}

/// A single server-owned value with a version counter.
///
/// The authority produces versions through [`ReplicatedValue::write`]; mirrors
/// accept them through [`ReplicatedValue::apply`] and never originate one.
#[derive(Debug, Clone)]
pub struct ReplicatedValue<T> {
    key: String,
    value: T,
    initial: T,
    version: u64,
}

impl<T: Clone + PartialEq> ReplicatedValue<T> {
    pub fn new(key: impl Into<String>, initial: T) -> Self {
        Self {
            key: key.into(),
            value: initial.clone(),
            initial,
            version: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn read(&self) -> &T {
        &self.value
    }

    pub fn initial(&self) -> &T {
        &self.initial
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Authoritative write. Returns the previous value when a new version was produced,
    /// `None` when the value was already equal.
    pub fn write(&mut self, value: T) -> Option<T> {
        if self.value == value {
            return None;
        }
        self.version += 1;
        Some(std::mem::replace(&mut self.value, value))
    }

    /// Mirror-side apply. Versions at or below the local one are duplicates and ignored.
    pub fn apply(&mut self, value: T, version: u64) -> Option<T> {
        if version <= self.version {
            return None;
        }
        self.version = version;
        Some(std::mem::replace(&mut self.value, value))
    }
}
