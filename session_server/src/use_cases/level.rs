// Puzzle level as data: which keys exist, how they are derived from each other,
// and the actions peers can trigger. `install` turns a layout into a running session.

use super::rules::{ConvergenceRule, Evaluation, RulesEngine};
use super::scheduler::Scheduler;
use super::store::{ProposalOutcome, ReplicatedStore};
use super::world::SessionWorld;
use crate::domain::{Rejection, ReplicationError, SetPolicy, Value, WriteGuard};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, warn};

pub const COLOR_ACTIVE: &str = "color.active";
pub const KEYS_COLLECTED: &str = "keys.collected";
pub const KEYS_ANY_COLLECTED: &str = "keys.any_collected";
pub const DOORS_ACTIVATED: &str = "doors.activated";
pub const GATE_OPEN: &str = "gate.open";
pub const VICTORY: &str = "session.victory";
pub const CHECKPOINTS_ACTIVATED: &str = "checkpoints.activated";
pub const CHECKPOINT_LAST: &str = "checkpoint.last";

pub fn switch_key(id: &str) -> String {
    format!("switch.{id}")
}

pub fn door_key(id: &str) -> String {
    format!("door.{id}")
}

pub fn plate_key(index: u32) -> String {
    format!("plate.{index}")
}

pub fn plate_door_key(index: u32) -> String {
    format!("plate_door.{index}")
}

pub fn lit_key(target: &str) -> String {
    format!("lit.{target}")
}

// Layout types double as the TOML schema; keeping serde here avoids a mirror DTO.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SwitchSpec {
    pub id: String,
    #[serde(default)]
    pub toggle: bool,
}

/// A switch in one level driving a door in the other.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CrossLink {
    pub switch: String,
    pub door: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyDoorSpec {
    pub door: String,
    pub required_key: String,
}

/// Lights `targets` once `trigger` is in the activated-doors set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DoorMapping {
    pub level: u32,
    pub trigger: String,
    pub targets: Vec<String>,
}

// Missing fields are empty rather than borrowed from the built-in level.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LevelLayout {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub switches: Vec<SwitchSpec>,
    #[serde(default)]
    pub cross_links: Vec<CrossLink>,
    #[serde(default)]
    pub plates: u32,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub key_doors: Vec<KeyDoorSpec>,
    #[serde(default)]
    pub door_mappings: Vec<DoorMapping>,
    #[serde(default)]
    pub checkpoints: u32,
    #[serde(default = "default_door_travel_ticks")]
    pub door_travel_ticks: u32,
    #[serde(default = "default_gate_delay_ms")]
    pub gate_delay_ms: u64,
}

fn default_door_travel_ticks() -> u32 {
    30
}

fn default_gate_delay_ms() -> u64 {
    2000
}

impl Default for LevelLayout {
    fn default() -> Self {
        let switch = |id: &str, toggle| SwitchSpec {
            id: id.to_string(),
            toggle,
        };
        let link = |switch: &str, door: &str| CrossLink {
            switch: switch.to_string(),
            door: door.to_string(),
        };
        let key_door = |door: &str, key: &str| KeyDoorSpec {
            door: door.to_string(),
            required_key: key.to_string(),
        };
        let mapping = |level, trigger: &str, targets: &[&str]| DoorMapping {
            level,
            trigger: trigger.to_string(),
            targets: targets.iter().map(|t| t.to_string()).collect(),
        };

        Self {
            name: "veil-of-colours".to_string(),
            switches: vec![
                switch("A", false),
                switch("B", false),
                switch("C", true),
                switch("D", true),
            ],
            cross_links: vec![link("A", "B"), link("B", "A")],
            plates: 2,
            colors: ["blue", "red", "green", "yellow"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            keys: ["KeyA", "KeyB", "KeyC"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            key_doors: vec![
                key_door("lock.A", "KeyA"),
                key_door("lock.B", "KeyB"),
                key_door("lock.C", "KeyC"),
            ],
            door_mappings: vec![
                mapping(1, "lock.A", &["lamp.A1", "lamp.A2"]),
                mapping(2, "lock.B", &["lamp.B1"]),
                mapping(2, "lock.C", &["lamp.C1"]),
            ],
            checkpoints: 3,
            door_travel_ticks: default_door_travel_ticks(),
            gate_delay_ms: default_gate_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("layout has no colours")]
    NoColors,
    #[error("cross link uses unknown switch `{0}`")]
    UnknownSwitch(String),
    #[error("key door `{door}` requires unknown key `{key}`")]
    UnknownKey { door: String, key: String },
    #[error("door mapping uses unknown trigger `{0}`")]
    UnknownTrigger(String),
}

impl LevelLayout {
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.colors.is_empty() {
            return Err(LayoutError::NoColors);
        }
        for link in &self.cross_links {
            if !self.switches.iter().any(|s| s.id == link.switch) {
                return Err(LayoutError::UnknownSwitch(link.switch.clone()));
            }
        }
        for door in &self.key_doors {
            if !self.keys.contains(&door.required_key) {
                return Err(LayoutError::UnknownKey {
                    door: door.door.clone(),
                    key: door.required_key.clone(),
                });
            }
        }
        for mapping in &self.door_mappings {
            if !self.key_doors.iter().any(|d| d.door == mapping.trigger) {
                return Err(LayoutError::UnknownTrigger(mapping.trigger.clone()));
            }
        }
        Ok(())
    }

    /// Number of doors that must be activated before the gate opens.
    pub fn all_doors(&self) -> usize {
        self.key_doors.len()
    }

    pub fn gate_delay(&self) -> Duration {
        Duration::from_millis(self.gate_delay_ms)
    }

    pub fn required_key(&self, door: &str) -> Option<&str> {
        self.key_doors
            .iter()
            .find(|d| d.door == door)
            .map(|d| d.required_key.as_str())
    }

    fn lit_targets(&self) -> BTreeSet<&str> {
        self.door_mappings
            .iter()
            .flat_map(|m| m.targets.iter().map(String::as_str))
            .collect()
    }

    fn max_color(&self) -> i64 {
        self.colors.len().saturating_sub(1) as i64
    }
}

/// Registers every key the layout uses. Observers call this too so reads of
/// unseen keys return defaults instead of `UnknownKey` before the snapshot lands.
pub fn register_keys(
    layout: &LevelLayout,
    store: &mut ReplicatedStore,
) -> Result<(), ReplicationError> {
    let derived = |store: &mut ReplicatedStore, key: &str, initial: Value| {
        store.register_value(key, initial, WriteGuard::ServerOnly)
    };

    for switch in &layout.switches {
        let guard = if switch.toggle {
            WriteGuard::Any
        } else {
            WriteGuard::OneShot
        };
        store.register_value(switch_key(&switch.id), Value::Bool(false), guard)?;
    }
    for link in &layout.cross_links {
        derived(store, &door_key(&link.door), Value::Bool(false))?;
    }
    for index in 0..layout.plates {
        store.register_value(plate_key(index), Value::Bool(false), WriteGuard::Any)?;
        derived(store, &plate_door_key(index), Value::Bool(false))?;
    }

    store.register_value(
        COLOR_ACTIVE,
        Value::Int(0),
        WriteGuard::IntRange {
            min: 0,
            max: layout.max_color(),
        },
    )?;

    store.register_set(KEYS_COLLECTED, SetPolicy::Open)?;
    derived(store, KEYS_ANY_COLLECTED, Value::Bool(false))?;
    store.register_set(DOORS_ACTIVATED, SetPolicy::ServerOnly)?;
    for target in layout.lit_targets() {
        derived(store, &lit_key(target), Value::Bool(false))?;
    }
    derived(store, GATE_OPEN, Value::Bool(false))?;
    derived(store, VICTORY, Value::Bool(false))?;

    store.register_set(CHECKPOINTS_ACTIVATED, SetPolicy::ServerOnly)?;
    derived(store, CHECKPOINT_LAST, Value::Int(-1))?;
    Ok(())
}

/// Wires a layout into an authoritative session: keys, rules, the gate
/// threshold, door motion and the delayed victory.
pub fn install(
    layout: &LevelLayout,
    world: &mut SessionWorld,
    rules: &mut RulesEngine,
    scheduler: &mut Scheduler<SessionWorld>,
) -> Result<(), ReplicationError> {
    register_keys(layout, &mut world.store)?;

    for link in &layout.cross_links {
        let door = door_key(&link.door);
        rules.register(ConvergenceRule::follow(
            format!("cross-link {} -> {}", link.switch, link.door),
            &switch_key(&link.switch),
            &door,
            Evaluation::EveryTick,
        ));
        world.doors.bind(door, layout.door_travel_ticks);
    }
    for index in 0..layout.plates {
        let door = plate_door_key(index);
        rules.register(ConvergenceRule::follow(
            format!("plate {index}"),
            &plate_key(index),
            &door,
            Evaluation::OnTrigger,
        ));
        world.doors.bind(door, layout.door_travel_ticks);
    }

    rules.register(ConvergenceRule::on_trigger(
        "any key collected",
        &[KEYS_COLLECTED],
        |view| {
            let any = view.cardinality(KEYS_COLLECTED)? > 0;
            Ok(vec![(KEYS_ANY_COLLECTED.to_string(), Value::Bool(any))])
        },
    ));

    for mapping in &layout.door_mappings {
        let trigger = mapping.trigger.clone();
        let targets: Vec<String> = mapping.targets.iter().map(|t| lit_key(t)).collect();
        rules.register(ConvergenceRule::on_trigger(
            format!("level {} lights for {}", mapping.level, mapping.trigger),
            &[DOORS_ACTIVATED],
            move |view| {
                let lit = view.contains(DOORS_ACTIVATED, &trigger)?;
                Ok(targets
                    .iter()
                    .map(|target| (target.clone(), Value::Bool(lit)))
                    .collect())
            },
        ));
    }

    // The gate only opens through a door activation; without key doors it stays shut.
    let all_doors = layout.all_doors();
    if all_doors == 0 {
        info!(level = %layout.name, "layout has no key doors, gate stays closed");
    } else {
        world.store.on_threshold_reached(
            DOORS_ACTIVATED,
            move |len| len >= all_doors,
            |store, len| {
                info!(activated = len, "all doors activated, opening gate");
                if let Err(err) = store.write(GATE_OPEN, true) {
                    warn!(error = %err, "failed to open gate");
                }
            },
        )?;
    }

    // Victory follows the gate after a delay; armed once per session.
    let delay = layout.gate_delay();
    let mut armed = false;
    scheduler.every_tick(move |world, timers, _| {
        if armed || !world.store.read_bool(GATE_OPEN).unwrap_or(false) {
            return;
        }
        armed = true;
        timers.schedule_after(delay, |world, _| {
            info!("session won");
            if let Err(err) = world.store.write(VICTORY, true) {
                warn!(error = %err, "failed to record victory");
            }
        });
    });

    scheduler.every_tick(|world, _, _| world.doors.step(&world.store));
    Ok(())
}

/// Collects a key on behalf of a peer. Keys outside the layout are refused.
pub fn collect_key(
    layout: &LevelLayout,
    store: &mut ReplicatedStore,
    key: &str,
) -> Result<ProposalOutcome, ReplicationError> {
    if !layout.keys.iter().any(|k| k == key) {
        return Ok(ProposalOutcome::Rejected(Rejection::UnknownMember {
            member: key.to_string(),
        }));
    }
    store.decide_add_proposal(KEYS_COLLECTED, key)
}

pub fn has_key(store: &ReplicatedStore, key: &str) -> Result<bool, ReplicationError> {
    store.contains(KEYS_COLLECTED, key)
}

/// Activates a key door. Returns true only when the door was newly added;
/// without the required key nothing changes.
pub fn use_key_door(
    store: &mut ReplicatedStore,
    door: &str,
    required_key: &str,
) -> Result<bool, ReplicationError> {
    if !has_key(store, required_key)? {
        info!(door, required_key, "key door used without its key");
        return Ok(false);
    }
    let added = store.try_add(DOORS_ACTIVATED, door)?;
    if added {
        info!(
            door,
            activated = store.cardinality(DOORS_ACTIVATED)?,
            "door activated"
        );
    }
    Ok(added)
}

/// Records a checkpoint and makes it the respawn point. Touching an earlier
/// checkpoint again moves `checkpoint.last` back to it.
/// Returns true when the activated set or the respawn point changed.
pub fn activate_checkpoint(
    layout: &LevelLayout,
    store: &mut ReplicatedStore,
    index: u32,
) -> Result<bool, ReplicationError> {
    if index >= layout.checkpoints {
        warn!(index, checkpoints = layout.checkpoints, "unknown checkpoint");
        return Ok(false);
    }
    let added = store.try_add(CHECKPOINTS_ACTIVATED, index.to_string())?;
    let moved = store.write(CHECKPOINT_LAST, i64::from(index))?;
    Ok(added || moved)
}

/// Broadcasts a colour the peer is hovering without changing the active layer.
pub fn preview_color(
    layout: &LevelLayout,
    store: &mut ReplicatedStore,
    index: i64,
) -> Result<ProposalOutcome, ReplicationError> {
    let max = layout.max_color();
    if !(0..=max).contains(&index) {
        return Ok(ProposalOutcome::Rejected(Rejection::OutOfRange {
            value: index,
            min: 0,
            max,
        }));
    }
    store.broadcast_preview(index)?;
    Ok(ProposalOutcome::Unchanged)
}
