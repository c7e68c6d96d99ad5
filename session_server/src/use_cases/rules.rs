// Convergence rules: pure functions of replicated state that the authority
// evaluates to derive dependent keys (doors from switches, lights from doors).

use super::store::ReplicatedStore;
use crate::domain::{ReplicationError, Value};
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    EveryTick,
    OnTrigger,
}

/// Read-only view of the store handed to rule effects.
pub struct RuleView<'a> {
    store: &'a ReplicatedStore,
}

impl RuleView<'_> {
    pub fn read(&self, key: &str) -> Result<Value, ReplicationError> {
        self.store.read(key)
    }

    pub fn read_bool(&self, key: &str) -> Result<bool, ReplicationError> {
        self.store.read_bool(key)
    }

    pub fn read_int(&self, key: &str) -> Result<i64, ReplicationError> {
        self.store.read_int(key)
    }

    pub fn contains(&self, set_key: &str, member: &str) -> Result<bool, ReplicationError> {
        self.store.contains(set_key, member)
    }

    pub fn cardinality(&self, set_key: &str) -> Result<usize, ReplicationError> {
        self.store.cardinality(set_key)
    }
}

type RuleEffect =
    Box<dyn Fn(&RuleView<'_>) -> Result<Vec<(String, Value)>, ReplicationError> + Send>;

pub struct ConvergenceRule {
    name: String,
    triggers: Vec<String>,
    evaluation: Evaluation,
    effect: RuleEffect,
}

impl ConvergenceRule {
    pub fn every_tick<F>(name: impl Into<String>, triggers: &[&str], effect: F) -> Self
    where
        F: Fn(&RuleView<'_>) -> Result<Vec<(String, Value)>, ReplicationError> + Send + 'static,
    {
        Self::new(name, triggers, Evaluation::EveryTick, effect)
    }

    pub fn on_trigger<F>(name: impl Into<String>, triggers: &[&str], effect: F) -> Self
    where
        F: Fn(&RuleView<'_>) -> Result<Vec<(String, Value)>, ReplicationError> + Send + 'static,
    {
        Self::new(name, triggers, Evaluation::OnTrigger, effect)
    }

    /// Keeps `target` equal to the bool at `source`.
    pub fn follow(
        name: impl Into<String>,
        source: &str,
        target: &str,
        evaluation: Evaluation,
    ) -> Self {
        let (from, to) = (source.to_string(), target.to_string());
        Self::new(name, &[source], evaluation, move |view| {
            Ok(vec![(to.clone(), Value::Bool(view.read_bool(&from)?))])
        })
    }

    fn new<F>(name: impl Into<String>, triggers: &[&str], evaluation: Evaluation, effect: F) -> Self
    where
        F: Fn(&RuleView<'_>) -> Result<Vec<(String, Value)>, ReplicationError> + Send + 'static,
    {
        Self {
            name: name.into(),
            triggers: triggers.iter().map(|key| key.to_string()).collect(),
            evaluation,
            effect: Box::new(effect),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }

    pub fn evaluation(&self) -> Evaluation {
        self.evaluation
    }

    fn is_triggered_by(&self, changed: &[String]) -> bool {
        self.triggers.iter().any(|key| changed.contains(key))
    }
}

/// Ordered rule list. Rules run in registration order and later rules read
/// the writes of earlier ones within the same pass.
#[derive(Default)]
pub struct RulesEngine {
    rules: Vec<ConvergenceRule>,
}

impl RulesEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: ConvergenceRule) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs every `EveryTick` rule once. Returns the number of writes that changed a value.
    pub fn evaluate_tick(&self, store: &mut ReplicatedStore) -> Result<usize, ReplicationError> {
        ensure_authority(store)?;

        let mut written = 0;
        for rule in self
            .rules
            .iter()
            .filter(|rule| rule.evaluation == Evaluation::EveryTick)
        {
            written += run_rule(rule, store);
        }
        Ok(written)
    }

    /// Runs the `OnTrigger` rules watching any of `changed`, then keeps going over
    /// the keys those rules changed. Passes are bounded so a cyclic rule set cannot spin.
    ///
    /// Only `changed` seeds the cascade. Keys left dirty by the caller are discarded
    /// on entry; callers collect them with [`ReplicatedStore::take_dirty`] first.
    pub fn evaluate_triggered(
        &self,
        store: &mut ReplicatedStore,
        changed: &[String],
    ) -> Result<usize, ReplicationError> {
        ensure_authority(store)?;
        let unclaimed = store.take_dirty();
        if !unclaimed.is_empty() {
            trace!(keys = ?unclaimed, "dirty keys not passed in, ignored");
        }

        let mut pending = changed.to_vec();
        let mut written = 0;
        for _ in 0..=self.rules.len() {
            if pending.is_empty() {
                break;
            }
            for rule in self.rules.iter().filter(|rule| {
                rule.evaluation == Evaluation::OnTrigger && rule.is_triggered_by(&pending)
            }) {
                written += run_rule(rule, store);
            }
            pending = store.take_dirty();
        }

        if !pending.is_empty() {
            warn!(keys = ?pending, "rule cascade did not settle");
        }
        Ok(written)
    }
}

fn ensure_authority(store: &ReplicatedStore) -> Result<(), ReplicationError> {
    if !store.is_authoritative() {
        return Err(ReplicationError::unauthorized("rules"));
    }
    Ok(())
}

fn run_rule(rule: &ConvergenceRule, store: &mut ReplicatedStore) -> usize {
    let writes = match (rule.effect)(&RuleView { store }) {
        Ok(writes) => writes,
        Err(err) => {
            warn!(rule = %rule.name, error = %err, "rule evaluation failed");
            return 0;
        }
    };

    let mut changed = 0;
    for (key, value) in writes {
        match store.write(&key, value) {
            Ok(true) => {
                trace!(rule = %rule.name, %key, %value, "rule converged key");
                changed += 1;
            }
            Ok(false) => {}
            Err(err) => warn!(rule = %rule.name, %key, error = %err, "rule write failed"),
        }
    }
    changed
}
