//! Bounded conversational memory the parser consults to resolve elliptical
//! commands ("a bit higher", or a bare command with no drone id when the
//! previous one named a target).

use crate::ids::DroneId;
use crate::intent::{Action, Intent, SlotValue};
use std::collections::VecDeque;

const CAPACITY: usize = 8;

#[derive(Debug, Clone)]
struct ContextEntry {
    action: Action,
    target_drone: Option<DroneId>,
    parameters: std::collections::HashMap<String, SlotValue>,
}

/// Fixed-size FIFO of the most recently resolved intents.
#[derive(Debug, Clone, Default)]
pub struct ContextMemory {
    entries: VecDeque<ContextEntry>,
}

impl ContextMemory {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(CAPACITY),
        }
    }

    pub fn record(&mut self, intent: &Intent) {
        if self.entries.len() >= CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(ContextEntry {
            action: intent.action,
            target_drone: intent.target_drone.clone(),
            parameters: intent.parameters.clone(),
        });
    }

    /// Most recently named target drone, searching back through the
    /// window — used when an utterance omits a drone id entirely.
    pub fn last_target_drone(&self) -> Option<DroneId> {
        self.entries
            .iter()
            .rev()
            .find_map(|e| e.target_drone.clone())
    }

    /// Most recent numeric slot value recorded for `action`, used to
    /// resolve relative follow-ups like "go a bit higher" against the
    /// last absolute altitude command.
    pub fn last_number_for(&self, action: Action, slot: &str) -> Option<f64> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.action == action)
            .and_then(|e| e.parameters.get(slot))
            .and_then(SlotValue::as_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_last_target_drone() {
        let mut ctx = ContextMemory::new();
        let drone = DroneId::parse("D1").unwrap();
        let intent = Intent::new(Action::Takeoff).with_target(drone.clone());
        ctx.record(&intent);
        assert_eq!(ctx.last_target_drone(), Some(drone));
    }

    #[test]
    fn drops_oldest_past_capacity() {
        let mut ctx = ContextMemory::new();
        for i in 0..(CAPACITY + 3) {
            let drone = DroneId::parse(format!("D{i}")).unwrap();
            ctx.record(&Intent::new(Action::Status).with_target(drone));
        }
        assert_eq!(ctx.entries.len(), CAPACITY);
    }
}
