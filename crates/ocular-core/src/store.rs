use std::collections::VecDeque;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use thiserror::Error;

use crate::embedding::Embedding;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid class index {index} (expected 0..{num_classes})")]
    InvalidClass { index: usize, num_classes: usize },
    #[error("embedding has {got} values, stored examples have {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Per-class labelled examples for the online classifier.
///
/// Each class list sits behind its own lock: an append is atomic for its
/// class, and a reader snapshots one class at a time, so a classification
/// pass never observes a half-written example. There is no cross-class
/// snapshot.
///
/// Unbounded by default. With `max_per_class` set, appending to a full class
/// evicts its oldest example.
///
/// The first example fixes the embedding dimension for the store's lifetime.
pub struct ExampleStore {
    classes: Vec<RwLock<VecDeque<Arc<[f32]>>>>,
    max_per_class: Option<usize>,
    dimension: OnceLock<usize>,
}

impl ExampleStore {
    pub fn new(num_classes: usize) -> Self {
        Self::with_capacity_limit(num_classes, None)
    }

    pub fn with_capacity_limit(num_classes: usize, max_per_class: Option<usize>) -> Self {
        Self {
            classes: (0..num_classes).map(|_| RwLock::new(VecDeque::new())).collect(),
            max_per_class: max_per_class.filter(|&cap| cap > 0),
            dimension: OnceLock::new(),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn check_class(&self, index: usize) -> Result<(), StoreError> {
        if index < self.classes.len() {
            Ok(())
        } else {
            Err(StoreError::InvalidClass {
                index,
                num_classes: self.classes.len(),
            })
        }
    }

    /// Embedding length shared by every stored example, once one exists.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    /// Append a copy of `embedding` to class `index`.
    pub fn add_example(&self, index: usize, embedding: &Embedding) -> Result<(), StoreError> {
        self.check_class(index)?;
        let expected = *self.dimension.get_or_init(|| embedding.len());
        if embedding.len() != expected {
            return Err(StoreError::DimensionMismatch {
                expected,
                got: embedding.len(),
            });
        }
        let example = embedding.to_example();

        let mut list = self.classes[index]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cap) = self.max_per_class {
            while list.len() >= cap {
                list.pop_front();
            }
        }
        list.push_back(example);
        Ok(())
    }

    /// Example count per class, in class-index order.
    pub fn count_per_class(&self) -> Vec<usize> {
        self.classes
            .iter()
            .map(|c| c.read().unwrap_or_else(PoisonError::into_inner).len())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.count_per_class().iter().sum()
    }

    /// Read-only view of every class list, oldest example first.
    pub fn all_examples(&self) -> Vec<Vec<Arc<[f32]>>> {
        self.classes
            .iter()
            .map(|c| {
                c.read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .cloned()
                    .collect()
            })
            .collect()
    }
}
