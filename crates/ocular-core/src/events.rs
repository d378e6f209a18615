/// Counts entries into one class across consecutive predictions.
///
/// With the closed-eye class as target this is a blink counter: every
/// transition from another class into the target counts once, however long
/// the target class is held.
#[derive(Debug, Clone, Default)]
pub struct EventCounter {
    target: Option<usize>,
    last: Option<usize>,
    count: u64,
}

impl EventCounter {
    pub fn new(target: Option<usize>) -> Self {
        Self {
            target,
            last: None,
            count: 0,
        }
    }

    /// Feed the winning class of a published prediction.
    pub fn observe(&mut self, class_index: usize) {
        if let Some(target) = self.target {
            if class_index == target && self.last.is_some_and(|prev| prev != target) {
                self.count += 1;
            }
        }
        self.last = Some(class_index);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.count = 0;
    }
}
