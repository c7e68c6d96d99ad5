// Replicated store: the named values and sets owned by one peer, with
// subscriptions, one-shot thresholds and the outbox the session broadcasts from.

use crate::domain::{
    PresentationAdapter, Rejection, ReplicatedSet, ReplicatedValue, ReplicationError,
    ReplicationMessage, Role, SetEntry, SetPolicy, Snapshot, StateChange, Value, ValueEntry,
    ValueKind, WriteGuard,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

pub type SubscriptionId = u64;

type Subscriber = Box<dyn FnMut(&StateChange) + Send>;
type ThresholdPredicate = Box<dyn Fn(usize) -> bool + Send>;
type ThresholdCallback = Box<dyn FnOnce(&mut ReplicatedStore, usize) + Send>;

struct GuardedValue {
    cell: ReplicatedValue<Value>,
    guard: WriteGuard,
}

struct Threshold {
    set_key: String,
    predicate: ThresholdPredicate,
    callback: ThresholdCallback,
}

/// What the authority did with a proposal from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOutcome {
    Applied,
    Unchanged,
    Rejected(Rejection),
}

pub struct ReplicatedStore {
    role: Role,
    values: BTreeMap<String, GuardedValue>,
    sets: BTreeMap<String, ReplicatedSet>,
    subscribers: HashMap<String, Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: SubscriptionId,
    thresholds: Vec<Threshold>,
    presentation: Option<Box<dyn PresentationAdapter>>,
    // Updates produced since the last drain; the session hands them to the transport.
    outbox: Vec<ReplicationMessage>,
    // Keys written since the last take; feeds trigger-based rule evaluation.
    dirty: Vec<String>,
    sequence: u64,
}

impl ReplicatedStore {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            values: BTreeMap::new(),
            sets: BTreeMap::new(),
            subscribers: HashMap::new(),
            next_subscription: 1,
            thresholds: Vec::new(),
            presentation: None,
            outbox: Vec::new(),
            dirty: Vec::new(),
            sequence: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_authoritative(&self) -> bool {
        self.role == Role::Authoritative
    }

    pub fn register_value(
        &mut self,
        key: impl Into<String>,
        initial: Value,
        guard: WriteGuard,
    ) -> Result<(), ReplicationError> {
        let key = key.into();
        self.ensure_unregistered(&key)?;
        self.values.insert(
            key.clone(),
            GuardedValue {
                cell: ReplicatedValue::new(key, initial),
                guard,
            },
        );
        Ok(())
    }

    pub fn register_set(
        &mut self,
        key: impl Into<String>,
        policy: SetPolicy,
    ) -> Result<(), ReplicationError> {
        let key = key.into();
        self.ensure_unregistered(&key)?;
        self.sets
            .insert(key.clone(), ReplicatedSet::new(key, policy));
        Ok(())
    }

    fn ensure_unregistered(&self, key: &str) -> Result<(), ReplicationError> {
        if self.values.contains_key(key) || self.sets.contains_key(key) {
            return Err(ReplicationError::DuplicateKey {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<&ReplicatedValue<Value>, ReplicationError> {
        self.values
            .get(key)
            .map(|entry| &entry.cell)
            .ok_or_else(|| ReplicationError::unknown(key))
    }

    pub fn get_set(&self, key: &str) -> Result<&ReplicatedSet, ReplicationError> {
        self.sets
            .get(key)
            .ok_or_else(|| ReplicationError::unknown(key))
    }

    pub fn read(&self, key: &str) -> Result<Value, ReplicationError> {
        Ok(*self.get(key)?.read())
    }

    pub fn read_bool(&self, key: &str) -> Result<bool, ReplicationError> {
        let value = self.read(key)?;
        value
            .as_bool()
            .ok_or_else(|| mismatch(key, ValueKind::Bool, value.kind()))
    }

    pub fn read_int(&self, key: &str) -> Result<i64, ReplicationError> {
        let value = self.read(key)?;
        value
            .as_int()
            .ok_or_else(|| mismatch(key, ValueKind::Int, value.kind()))
    }

    pub fn contains(&self, set_key: &str, member: &str) -> Result<bool, ReplicationError> {
        Ok(self.get_set(set_key)?.contains(member))
    }

    pub fn members(&self, set_key: &str) -> Result<Vec<String>, ReplicationError> {
        Ok(self.get_set(set_key)?.members().map(str::to_string).collect())
    }

    pub fn cardinality(&self, set_key: &str) -> Result<usize, ReplicationError> {
        Ok(self.get_set(set_key)?.len())
    }

    /// Authoritative write. Returns `Ok(false)` when the value was already equal:
    /// no version, no notification and nothing queued for broadcast.
    pub fn write(&mut self, key: &str, value: impl Into<Value>) -> Result<bool, ReplicationError> {
        let value = value.into();
        // Reject before touching anything so an observer never queues traffic.
        if !self.is_authoritative() {
            return Err(ReplicationError::unauthorized(key));
        }

        let entry = self
            .values
            .get_mut(key)
            .ok_or_else(|| ReplicationError::unknown(key))?;
        check_kind(key, entry.cell.initial(), &value)?;

        let Some(old) = entry.cell.write(value) else {
            return Ok(false);
        };
        let version = entry.cell.version();

        trace!(key, %old, new = %value, version, "value written");
        self.record(
            key,
            ReplicationMessage::ValueChanged {
                key: key.to_string(),
                value,
                version,
            },
        );
        self.notify(StateChange::Value {
            key: key.to_string(),
            old,
            new: value,
            version,
        });
        Ok(true)
    }

    /// Decides a write proposed by a peer against the key's guard, then applies it.
    pub fn decide_proposal(
        &mut self,
        key: &str,
        value: Value,
    ) -> Result<ProposalOutcome, ReplicationError> {
        if !self.is_authoritative() {
            return Err(ReplicationError::unauthorized(key));
        }

        let entry = self
            .values
            .get(key)
            .ok_or_else(|| ReplicationError::unknown(key))?;
        check_kind(key, entry.cell.initial(), &value)?;

        if let Err(rejection) = entry
            .guard
            .check(entry.cell.initial(), entry.cell.read(), &value)
        {
            debug!(key, %value, %rejection, "proposal rejected");
            return Ok(ProposalOutcome::Rejected(rejection));
        }

        if self.write(key, value)? {
            Ok(ProposalOutcome::Applied)
        } else {
            Ok(ProposalOutcome::Unchanged)
        }
    }

    /// Adds a member to an append-only set. Returns true only when the member is new;
    /// a repeated add has no replicated effect.
    pub fn try_add(
        &mut self,
        set_key: &str,
        member: impl Into<String>,
    ) -> Result<bool, ReplicationError> {
        if !self.is_authoritative() {
            return Err(ReplicationError::unauthorized(set_key));
        }

        let member = member.into();
        let set = self
            .sets
            .get_mut(set_key)
            .ok_or_else(|| ReplicationError::unknown(set_key))?;
        if !set.insert(member.clone()) {
            return Ok(false);
        }
        let len = set.len();

        trace!(set = set_key, %member, len, "member added");
        self.record(
            set_key,
            ReplicationMessage::MemberAdded {
                key: set_key.to_string(),
                member: member.clone(),
                len,
            },
        );
        self.notify(StateChange::Member {
            key: set_key.to_string(),
            member,
            len,
        });
        self.fire_thresholds(set_key, len);
        Ok(true)
    }

    /// Decides a membership proposed by a peer. Server-only sets refuse every proposal.
    pub fn decide_add_proposal(
        &mut self,
        set_key: &str,
        member: &str,
    ) -> Result<ProposalOutcome, ReplicationError> {
        if !self.is_authoritative() {
            return Err(ReplicationError::unauthorized(set_key));
        }
        if self.get_set(set_key)?.policy() == SetPolicy::ServerOnly {
            debug!(set = set_key, member, "membership proposal rejected");
            return Ok(ProposalOutcome::Rejected(Rejection::ServerOnly));
        }

        if self.try_add(set_key, member)? {
            Ok(ProposalOutcome::Applied)
        } else {
            Ok(ProposalOutcome::Unchanged)
        }
    }

    /// Registers a callback fired exactly once, the first time the set's cardinality
    /// satisfies `predicate`. Fires immediately when already satisfied.
    pub fn on_threshold_reached<P, F>(
        &mut self,
        set_key: &str,
        predicate: P,
        callback: F,
    ) -> Result<(), ReplicationError>
    where
        P: Fn(usize) -> bool + Send + 'static,
        F: FnOnce(&mut ReplicatedStore, usize) + Send + 'static,
    {
        if !self.is_authoritative() {
            return Err(ReplicationError::unauthorized(set_key));
        }

        let len = self.cardinality(set_key)?;
        if predicate(len) {
            debug!(set = set_key, len, "threshold already reached at registration");
            callback(self, len);
            return Ok(());
        }

        self.thresholds.push(Threshold {
            set_key: set_key.to_string(),
            predicate: Box::new(predicate),
            callback: Box::new(callback),
        });
        Ok(())
    }

    fn fire_thresholds(&mut self, set_key: &str, len: usize) {
        // Fired thresholds are dropped, which is what keeps them from re-firing.
        let (fired, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.thresholds)
            .into_iter()
            .partition(|threshold| threshold.set_key == set_key && (threshold.predicate)(len));
        self.thresholds = pending;

        for threshold in fired {
            debug!(set = set_key, len, "threshold reached");
            (threshold.callback)(self, len);
        }
    }

    /// Queues a transient colour preview for broadcast. Nothing is stored.
    pub fn broadcast_preview(&mut self, index: i64) -> Result<(), ReplicationError> {
        if !self.is_authoritative() {
            return Err(ReplicationError::unauthorized("color.preview"));
        }
        self.outbox.push(ReplicationMessage::ColorPreview { index });
        if let Some(presentation) = self.presentation.as_mut() {
            presentation.on_preview(index);
        }
        Ok(())
    }

    pub fn subscribe<F>(&mut self, key: &str, callback: F) -> Result<SubscriptionId, ReplicationError>
    where
        F: FnMut(&StateChange) + Send + 'static,
    {
        if !self.values.contains_key(key) && !self.sets.contains_key(key) {
            return Err(ReplicationError::unknown(key));
        }

        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers
            .entry(key.to_string())
            .or_default()
            .push((id, Box::new(callback)));
        Ok(id)
    }

    pub fn unsubscribe(&mut self, key: &str, id: SubscriptionId) -> bool {
        let Some(subscribers) = self.subscribers.get_mut(key) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn set_presentation(&mut self, adapter: Box<dyn PresentationAdapter>) {
        self.presentation = Some(adapter);
    }

    /// Mirror-side entry point for one message from the authority.
    /// Returns whether local state changed.
    pub fn apply(&mut self, message: ReplicationMessage) -> Result<bool, ReplicationError> {
        match message {
            ReplicationMessage::Snapshot(snapshot) => self.apply_snapshot(snapshot),
            ReplicationMessage::ValueChanged {
                key,
                value,
                version,
            } => {
                self.ensure_mirror(&key)?;
                self.apply_value(&key, value, version)
            }
            ReplicationMessage::MemberAdded { key, member, .. } => {
                self.ensure_mirror(&key)?;
                Ok(self.apply_member(&key, member))
            }
            ReplicationMessage::ColorPreview { index } => {
                self.ensure_mirror("color.preview")?;
                if let Some(presentation) = self.presentation.as_mut() {
                    presentation.on_preview(index);
                }
                Ok(false)
            }
        }
    }

    /// Applies a full snapshot. Entries not newer than local state are skipped,
    /// so a snapshot racing with live updates never moves a key backwards.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> Result<bool, ReplicationError> {
        self.ensure_mirror("snapshot")?;

        let mut changed = false;
        for entry in snapshot.values {
            changed |= self.apply_value(&entry.key, entry.value, entry.version)?;
        }
        for set in snapshot.sets {
            // Empty sets still exist on the authority; make them readable here too.
            if !self.sets.contains_key(&set.key) {
                self.sets.insert(
                    set.key.clone(),
                    ReplicatedSet::new(set.key.as_str(), SetPolicy::ServerOnly),
                );
                changed = true;
            }
            for member in set.members {
                changed |= self.apply_member(&set.key, member);
            }
        }
        self.sequence = self.sequence.max(snapshot.sequence);
        Ok(changed)
    }

    fn ensure_mirror(&self, key: &str) -> Result<(), ReplicationError> {
        // The authority is the only source of truth and never takes remote state.
        if self.is_authoritative() {
            return Err(ReplicationError::unauthorized(key));
        }
        Ok(())
    }

    fn apply_value(
        &mut self,
        key: &str,
        value: Value,
        version: u64,
    ) -> Result<bool, ReplicationError> {
        if !self.values.contains_key(key) {
            // First sight of a key: the authority's value becomes the local baseline.
            let mut cell = ReplicatedValue::new(key, value);
            cell.apply(value, version);
            self.values.insert(
                key.to_string(),
                GuardedValue {
                    cell,
                    guard: WriteGuard::ServerOnly,
                },
            );
            return Ok(true);
        }

        let entry = self
            .values
            .get_mut(key)
            .ok_or_else(|| ReplicationError::unknown(key))?;
        check_kind(key, entry.cell.initial(), &value)?;

        let Some(old) = entry.cell.apply(value, version) else {
            trace!(key, version, "stale or duplicate update ignored");
            return Ok(false);
        };
        // A snapshot can skip intermediate versions and land on the value we already hold.
        if old != value {
            self.notify(StateChange::Value {
                key: key.to_string(),
                old,
                new: value,
                version,
            });
        }
        Ok(true)
    }

    fn apply_member(&mut self, key: &str, member: String) -> bool {
        let set = self
            .sets
            .entry(key.to_string())
            .or_insert_with(|| ReplicatedSet::new(key, SetPolicy::ServerOnly));
        if !set.insert(member.clone()) {
            return false;
        }
        let len = set.len();
        self.notify(StateChange::Member {
            key: key.to_string(),
            member,
            len,
        });
        true
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            sequence: self.sequence,
            values: self
                .values
                .values()
                .map(|entry| ValueEntry {
                    key: entry.cell.key().to_string(),
                    value: *entry.cell.read(),
                    version: entry.cell.version(),
                })
                .collect(),
            sets: self
                .sets
                .values()
                .map(|set| SetEntry {
                    key: set.key().to_string(),
                    members: set.members().map(str::to_string).collect(),
                })
                .collect(),
        }
    }

    pub fn drain_outbox(&mut self) -> Vec<ReplicationMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_dirty(&mut self) -> Vec<String> {
        std::mem::take(&mut self.dirty)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn record(&mut self, key: &str, message: ReplicationMessage) {
        self.outbox.push(message);
        self.dirty.push(key.to_string());
        self.sequence += 1;
    }

    fn notify(&mut self, change: StateChange) {
        if let Some(presentation) = self.presentation.as_mut() {
            presentation.on_change(&change);
        }
        if let Some(subscribers) = self.subscribers.get_mut(change.key()) {
            for (_, callback) in subscribers.iter_mut() {
                callback(&change);
            }
        }
    }
}

fn check_kind(key: &str, initial: &Value, value: &Value) -> Result<(), ReplicationError> {
    if initial.kind() != value.kind() {
        return Err(mismatch(key, initial.kind(), value.kind()));
    }
    Ok(())
}

fn mismatch(key: &str, expected: ValueKind, found: ValueKind) -> ReplicationError {
    ReplicationError::TypeMismatch {
        key: key.to_string(),
        expected,
        found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn authority() -> ReplicatedStore {
        let mut store = ReplicatedStore::new(Role::Authoritative);
        store
            .register_value("switch.A", Value::Bool(false), WriteGuard::OneShot)
            .unwrap();
        store
            .register_value("door.B", Value::Bool(false), WriteGuard::ServerOnly)
            .unwrap();
        store
            .register_value("color.active", Value::Int(0), WriteGuard::IntRange { min: 0, max: 3 })
            .unwrap();
        store.register_set("doors.activated", SetPolicy::ServerOnly).unwrap();
        store.register_set("keys.collected", SetPolicy::Open).unwrap();
        store
    }

    fn record_changes(store: &mut ReplicatedStore, key: &str) -> Arc<Mutex<Vec<StateChange>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store
            .subscribe(key, move |change| {
                sink.lock().expect("changes mutex poisoned").push(change.clone());
            })
            .unwrap();
        seen
    }

    #[test]
    fn when_same_value_written_twice_then_one_notification_and_one_broadcast() {
        let mut store = authority();
        let seen = record_changes(&mut store, "door.B");

        assert!(store.write("door.B", true).unwrap());
        assert!(!store.write("door.B", true).unwrap());

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(store.drain_outbox().len(), 1);
        assert_eq!(store.get("door.B").unwrap().version(), 1);
    }

    #[test]
    fn when_member_added_twice_then_true_then_false_and_len_grows_once() {
        let mut store = authority();

        let first = store.try_add("keys.collected", "KeyA").unwrap();
        let second = store.try_add("keys.collected", "KeyA").unwrap();

        assert_eq!((first, second), (true, false));
        assert_eq!(store.cardinality("keys.collected").unwrap(), 1);
        assert_eq!(store.drain_outbox().len(), 1);
    }

    #[test]
    fn when_threshold_reached_then_fires_exactly_once() {
        let mut store = authority();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        store
            .on_threshold_reached("doors.activated", |len| len >= 3, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        for door in ["lock.A", "lock.B", "lock.C", "lock.D"] {
            store.try_add("doors.activated", door).unwrap();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn when_threshold_callback_writes_then_write_is_replicated() {
        let mut store = authority();
        store
            .on_threshold_reached("doors.activated", |len| len >= 1, |store, _| {
                store.write("door.B", true).expect("gate write");
            })
            .unwrap();

        store.try_add("doors.activated", "lock.A").unwrap();

        assert!(store.read_bool("door.B").unwrap());
        let outbox = store.drain_outbox();
        assert_eq!(outbox.len(), 2);
        assert!(matches!(outbox[1], ReplicationMessage::ValueChanged { ref key, .. } if key == "door.B"));
    }

    #[test]
    fn when_threshold_already_satisfied_then_fires_at_registration() {
        let mut store = authority();
        store.try_add("doors.activated", "lock.A").unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        store
            .on_threshold_reached("doors.activated", |len| len >= 1, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        store.try_add("doors.activated", "lock.B").unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn when_observer_writes_directly_then_rejected_without_traffic() {
        let mut store = ReplicatedStore::new(Role::Observer);
        store
            .register_value("switch.A", Value::Bool(false), WriteGuard::OneShot)
            .unwrap();

        let result = store.write("switch.A", true);

        assert!(matches!(result, Err(ReplicationError::UnauthorizedWrite { .. })));
        assert!(!store.read_bool("switch.A").unwrap());
        assert!(store.drain_outbox().is_empty());
    }

    #[test]
    fn when_key_is_unregistered_then_unknown_key() {
        let mut store = authority();

        assert!(matches!(store.read("nope"), Err(ReplicationError::UnknownKey { .. })));
        assert!(matches!(store.get_set("nope"), Err(ReplicationError::UnknownKey { .. })));
        assert!(matches!(store.try_add("nope", "x"), Err(ReplicationError::UnknownKey { .. })));
    }

    #[test]
    fn when_key_registered_twice_then_duplicate_key() {
        let mut store = authority();

        let result = store.register_set("switch.A", SetPolicy::Open);

        assert!(matches!(result, Err(ReplicationError::DuplicateKey { .. })));
    }

    #[test]
    fn when_kind_differs_then_type_mismatch() {
        let mut store = authority();

        let result = store.write("color.active", true);

        assert!(matches!(
            result,
            Err(ReplicationError::TypeMismatch {
                expected: ValueKind::Int,
                found: ValueKind::Bool,
                ..
            })
        ));
    }

    #[test]
    fn when_one_shot_switch_proposed_back_then_rejected() {
        let mut store = authority();

        assert_eq!(
            store.decide_proposal("switch.A", Value::Bool(true)).unwrap(),
            ProposalOutcome::Applied
        );
        assert_eq!(
            store.decide_proposal("switch.A", Value::Bool(true)).unwrap(),
            ProposalOutcome::Unchanged
        );
        assert_eq!(
            store.decide_proposal("switch.A", Value::Bool(false)).unwrap(),
            ProposalOutcome::Rejected(Rejection::OneShotSpent)
        );
        assert!(store.read_bool("switch.A").unwrap());
    }

    #[test]
    fn when_member_proposed_for_server_only_set_then_rejected() {
        let mut store = authority();

        let outcome = store.decide_add_proposal("doors.activated", "lock.A").unwrap();

        assert_eq!(outcome, ProposalOutcome::Rejected(Rejection::ServerOnly));
        assert_eq!(store.cardinality("doors.activated").unwrap(), 0);
    }

    #[test]
    fn when_unsubscribed_then_no_more_notifications() {
        let mut store = authority();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = store
            .subscribe("door.B", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        store.write("door.B", true).unwrap();
        assert!(store.unsubscribe("door.B", id));
        store.write("door.B", false).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!store.unsubscribe("door.B", id));
    }

    #[test]
    fn when_mirror_applies_outbox_then_it_converges_with_authority() {
        let mut server = authority();
        let mut mirror = ReplicatedStore::new(Role::Observer);

        server.write("door.B", true).unwrap();
        server.write("color.active", 2_i64).unwrap();
        server.write("color.active", 1_i64).unwrap();
        server.try_add("keys.collected", "KeyA").unwrap();
        for message in server.drain_outbox() {
            mirror.apply(message).unwrap();
        }

        assert_eq!(mirror.read("door.B").unwrap(), Value::Bool(true));
        assert_eq!(mirror.read_int("color.active").unwrap(), 1);
        assert!(mirror.contains("keys.collected", "KeyA").unwrap());
    }

    #[test]
    fn when_mirror_sees_versions_out_of_order_then_only_newer_apply() {
        let mut mirror = ReplicatedStore::new(Role::Observer);
        mirror
            .register_value("color.active", Value::Int(0), WriteGuard::ServerOnly)
            .unwrap();
        let seen = record_changes(&mut mirror, "color.active");

        let update = |value, version| ReplicationMessage::ValueChanged {
            key: "color.active".to_string(),
            value: Value::Int(value),
            version,
        };
        assert!(mirror.apply(update(2, 1)).unwrap());
        assert!(mirror.apply(update(3, 2)).unwrap());
        assert!(!mirror.apply(update(3, 2)).unwrap());
        assert!(!mirror.apply(update(2, 1)).unwrap());

        let versions: Vec<u64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|change| match change {
                StateChange::Value { version, .. } => *version,
                StateChange::Member { .. } => 0,
            })
            .collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(mirror.read_int("color.active").unwrap(), 3);
    }

    #[test]
    fn when_late_mirror_applies_snapshot_then_it_matches_authority() {
        let mut server = authority();
        server.write("switch.A", true).unwrap();
        server.try_add("doors.activated", "lock.A").unwrap();
        server.drain_outbox();

        let mut mirror = ReplicatedStore::new(Role::Observer);
        mirror.apply_snapshot(server.snapshot()).unwrap();

        assert_eq!(mirror.snapshot().values, server.snapshot().values);
        assert_eq!(mirror.snapshot().sets, server.snapshot().sets);
        assert_eq!(mirror.sequence(), server.sequence());
        // Empty on the authority, yet readable on the mirror.
        assert_eq!(mirror.contains("keys.collected", "KeyA"), Ok(false));
    }

    #[test]
    fn when_authority_is_given_remote_state_then_refuses_it() {
        let mut server = authority();

        let result = server.apply(ReplicationMessage::ValueChanged {
            key: "door.B".to_string(),
            value: Value::Bool(true),
            version: 9,
        });

        assert!(matches!(result, Err(ReplicationError::UnauthorizedWrite { .. })));
        assert!(!server.read_bool("door.B").unwrap());
    }

    #[test]
    fn when_presentation_attached_then_it_sees_changes_and_previews() {
        struct Recorder(Arc<Mutex<Vec<String>>>);

        impl PresentationAdapter for Recorder {
            fn on_change(&mut self, change: &StateChange) {
                self.0.lock().unwrap().push(change.key().to_string());
            }

            fn on_preview(&mut self, color_index: i64) {
                self.0.lock().unwrap().push(format!("preview:{color_index}"));
            }
        }

        let mut store = authority();
        let events = Arc::new(Mutex::new(Vec::new()));
        store.set_presentation(Box::new(Recorder(Arc::clone(&events))));

        store.write("door.B", true).unwrap();
        store.broadcast_preview(2).unwrap();

        assert_eq!(*events.lock().unwrap(), vec!["door.B", "preview:2"]);
        // Previews are broadcast but never change state.
        assert_eq!(store.sequence(), 1);
        assert_eq!(store.drain_outbox().len(), 2);
    }
}
