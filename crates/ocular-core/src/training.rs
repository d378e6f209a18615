use serde::Serialize;

use crate::store::StoreError;

/// Which class, if any, is receiving examples right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrainingState {
    pub active_class: Option<usize>,
}

/// Press-and-hold training input.
///
/// At most one class trains at a time: a second press replaces the first
/// (last press wins) and a release clears it, whichever class was held.
#[derive(Debug, Clone)]
pub struct TrainingController {
    num_classes: usize,
    state: TrainingState,
}

impl TrainingController {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            state: TrainingState::default(),
        }
    }

    pub fn press_class(&mut self, index: usize) -> Result<(), StoreError> {
        if index >= self.num_classes {
            return Err(StoreError::InvalidClass {
                index,
                num_classes: self.num_classes,
            });
        }
        if let Some(prev) = self.state.active_class.filter(|&c| c != index) {
            tracing::debug!(prev, next = index, "training class replaced before release");
        }
        self.state.active_class = Some(index);
        Ok(())
    }

    pub fn release(&mut self) {
        self.state.active_class = None;
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn active_class(&self) -> Option<usize> {
        self.state.active_class
    }
}
