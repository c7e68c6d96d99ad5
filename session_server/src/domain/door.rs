// Logical door state machine. Door motion is counted in ticks;
// the visual interpolation that goes with it belongs to presentation.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorPhase {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Door driven by a bound replicated bool.
///
/// Transitions are edge-triggered: [`DoorMotion::observe`] only reacts when the
/// bound value differs from the last one it saw. A door leaves `Closed` only
/// when the value reads true and leaves `Open` only when it reads false.
#[derive(Debug, Clone)]
pub struct DoorMotion {
    phase: DoorPhase,
    progress: u32,
    travel_ticks: u32,
    last_bound: bool,
}

impl DoorMotion {
    pub fn new(travel_ticks: u32) -> Self {
        Self {
            phase: DoorPhase::Closed,
            progress: 0,
            travel_ticks,
            last_bound: false,
        }
    }

    pub fn phase(&self) -> DoorPhase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        self.phase == DoorPhase::Open
    }

    /// Feeds the current bound value. Returns the new phase when a transition started.
    pub fn observe(&mut self, bound: bool) -> Option<DoorPhase> {
        if bound == self.last_bound {
            return None;
        }
        self.last_bound = bound;

        let next = match (self.phase, bound) {
            (DoorPhase::Closed | DoorPhase::Closing, true) => DoorPhase::Opening,
            (DoorPhase::Open | DoorPhase::Opening, false) => DoorPhase::Closing,
            _ => return None,
        };
        self.phase = next;
        Some(next)
    }

    /// Moves one tick toward the target. Returns the resting phase when motion completes.
    pub fn advance(&mut self) -> Option<DoorPhase> {
        match self.phase {
            DoorPhase::Opening => {
                self.progress = (self.progress + 1).min(self.travel_ticks);
                if self.progress >= self.travel_ticks {
                    self.phase = DoorPhase::Open;
                    return Some(DoorPhase::Open);
                }
                None
            }
            DoorPhase::Closing => {
                self.progress = self.progress.saturating_sub(1);
                if self.progress == 0 {
                    self.phase = DoorPhase::Closed;
                    return Some(DoorPhase::Closed);
                }
                None
            }
            DoorPhase::Open | DoorPhase::Closed => None,
        }
    }
}
