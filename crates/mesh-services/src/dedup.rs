//! Duplicate suppression by message id.
//!
//! Flood relay lets one message reach a node over several paths. Only the
//! first copy is delivered and relayed; later copies are dropped here.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

/// Bounded set of recently seen message ids. Oldest ids are forgotten first.
#[derive(Debug)]
pub struct SeenMessages {
    capacity: usize,
    state: Mutex<SeenState>,
}

#[derive(Debug, Default)]
struct SeenState {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl SeenMessages {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(SeenState::default()),
        }
    }

    /// Record `id`. Returns true the first time an id is seen.
    pub fn first_sighting(&self, id: Uuid) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.ids.insert(id) {
            return false;
        }
        state.order.push_back(id);
        while state.order.len() > self.capacity {
            if let Some(old) = state.order.pop_front() {
                state.ids.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
