// Append-only replicated membership sets (collected keys, activated doors, checkpoints).

use std::collections::BTreeSet;

/// Whether peers may propose members for a set or only the authority adds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPolicy {
    Open,
    ServerOnly,
}

/// Monotonic set of string members. Members are never removed during a session,
/// so the cardinality doubles as the set's version.
#[derive(Debug, Clone)]
pub struct ReplicatedSet {
    key: String,
    policy: SetPolicy,
    members: BTreeSet<String>,
}

impl ReplicatedSet {
    pub fn new(key: impl Into<String>, policy: SetPolicy) -> Self {
        Self {
            key: key.into(),
            policy,
            members: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> SetPolicy {
        self.policy
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.members.len() as u64
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    /// Returns true only when the member was not present before.
    pub fn insert(&mut self, member: impl Into<String>) -> bool {
        self.members.insert(member.into())
    }
}
