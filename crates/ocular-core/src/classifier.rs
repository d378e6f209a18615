//! Online k-nearest-neighbour classifier over the example store.
//!
//! Similarity is cosine (normalised dot product). The top-`k` examples are
//! chosen globally across classes and each class scores the fraction of
//! those neighbours it owns. Ties on similarity favour the lower class
//! index, then the older example; ties on votes favour the lower class
//! index, so results are stable across runs.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::store::ExampleStore;

/// Winning class and per-class vote share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub class_index: usize,
    /// One entry per class in `[0, 1]`, summing to at most 1.
    pub confidences: Vec<f32>,
}

/// Cosine similarity; zero when either vector has zero norm.
/// Vectors of different lengths are not comparable and also score zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KnnClassifier {
    k: usize,
}

struct Neighbour {
    similarity: f32,
    class: usize,
    order: usize,
}

impl KnnClassifier {
    pub fn new(k: usize) -> Self {
        Self { k: k.max(1) }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Vote among the `k` stored examples most similar to `query`.
    ///
    /// With fewer than `k` examples stored, all of them vote and confidences
    /// are shares of that smaller neighbour set. Callers must not invoke this
    /// on an empty store; if they do, every confidence is zero and class 0
    /// is reported.
    pub fn predict(&self, query: &[f32], store: &ExampleStore) -> PredictionResult {
        let examples = store.all_examples();
        let num_classes = examples.len();

        let mut neighbours: Vec<Neighbour> = examples
            .iter()
            .enumerate()
            .flat_map(|(class, list)| {
                list.iter().enumerate().map(move |(order, example)| Neighbour {
                    similarity: cosine_similarity(query, example),
                    class,
                    order,
                })
            })
            .collect();

        neighbours.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then(a.class.cmp(&b.class))
                .then(a.order.cmp(&b.order))
        });
        neighbours.truncate(self.k);

        let mut votes = vec![0usize; num_classes];
        for n in &neighbours {
            votes[n.class] += 1;
        }

        let voters = neighbours.len();
        let confidences: Vec<f32> = votes
            .iter()
            .map(|&v| if voters == 0 { 0.0 } else { v as f32 / voters as f32 })
            .collect();

        // First maximum wins, which is the lowest class index on a tie.
        let mut class_index = 0;
        for (i, &v) in votes.iter().enumerate() {
            if v > votes[class_index] {
                class_index = i;
            }
        }

        PredictionResult {
            class_index,
            confidences,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedding;

    fn add(store: &ExampleStore, class: usize, values: &[f32]) {
        store.add_example(class, &Embedding::new(values.to_vec())).unwrap();
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        // a prefix match must not count as similar
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 5.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0, 5.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_stored_example_gets_half_the_votes_of_even_store() {
        // k examples split evenly across two classes, queried with one of them
        let examples: [(usize, [f32; 3]); 4] = [
            (0, [1.0, 0.1, 0.0]),
            (0, [0.2, 1.0, 0.3]),
            (1, [0.0, 0.3, 1.0]),
            (1, [-0.5, 1.0, 0.4]),
        ];
        let store = ExampleStore::new(2);
        for (class, values) in &examples {
            add(&store, *class, values);
        }

        let k = examples.len();
        for (class, values) in &examples {
            let result = KnnClassifier::new(k).predict(values, &store);
            let votes = (result.confidences[*class] * k as f32).round() as usize;
            assert!(votes >= k / 2, "class {class} got {votes} of {k} votes");
            assert_eq!(result.confidences, vec![0.5, 0.5]);
        }
    }

    #[test]
    fn test_single_example_wins_for_any_k() {
        for k in [1, 3, 10, 50] {
            let store = ExampleStore::new(3);
            add(&store, 2, &[0.3, -0.7, 0.1]);
            let result = KnnClassifier::new(k).predict(&[-1.0, 0.2, 0.5], &store);
            assert_eq!(result.class_index, 2);
            assert_eq!(result.confidences, vec![0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn test_scenario_two_classes_k3() {
        let store = ExampleStore::new(2);
        add(&store, 0, &[1.0, 0.0, 0.0]);
        add(&store, 0, &[0.9, 0.1, 0.0]);
        add(&store, 1, &[0.0, 0.0, 1.0]);

        let result = KnnClassifier::new(3).predict(&[1.0, 0.0, 0.0], &store);
        assert_eq!(result.class_index, 0);
        assert!(result.confidences[0] >= 2.0 / 3.0 - 1e-6);
        let total: f32 = result.confidences.iter().sum();
        assert!(total <= 1.0 + 1e-6);
    }

    #[test]
    fn test_exact_match_is_among_neighbours() {
        let store = ExampleStore::new(2);
        add(&store, 0, &[1.0, 0.0]);
        add(&store, 0, &[0.0, 1.0]);
        add(&store, 1, &[0.7, 0.7]);
        add(&store, 1, &[-1.0, 0.2]);

        // k = 1: only the identical example votes
        let result = KnnClassifier::new(1).predict(&[-1.0, 0.2], &store);
        assert_eq!(result.class_index, 1);
        assert_eq!(result.confidences, vec![0.0, 1.0]);
    }

    #[test]
    fn test_vote_tie_prefers_lower_class() {
        // k = 4, each class takes exactly two of the four neighbours.
        for _ in 0..10 {
            let store = ExampleStore::new(3);
            add(&store, 2, &[1.0, 0.0]);
            add(&store, 2, &[0.9, 0.2]);
            add(&store, 1, &[1.0, 0.1]);
            add(&store, 1, &[0.8, 0.3]);
            add(&store, 0, &[-1.0, 0.0]);

            let result = KnnClassifier::new(4).predict(&[1.0, 0.05], &store);
            assert_eq!(result.class_index, 1);
            assert_eq!(result.confidences, vec![0.0, 0.5, 0.5]);
        }
    }

    #[test]
    fn test_similarity_tie_is_deterministic() {
        let store = ExampleStore::new(2);
        add(&store, 1, &[1.0, 0.0]);
        add(&store, 0, &[1.0, 0.0]);
        let result = KnnClassifier::new(1).predict(&[1.0, 0.0], &store);
        assert_eq!(result.class_index, 0);
    }

    #[test]
    fn test_fewer_examples_than_k() {
        let store = ExampleStore::new(2);
        add(&store, 0, &[1.0, 0.0]);
        add(&store, 1, &[0.0, 1.0]);
        add(&store, 1, &[0.1, 1.0]);
        let result = KnnClassifier::new(10).predict(&[0.0, 1.0], &store);
        assert_eq!(result.class_index, 1);
        assert!((result.confidences[0] - 1.0 / 3.0).abs() < 1e-6);
        assert!((result.confidences[1] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_store_reports_zero_confidence() {
        let store = ExampleStore::new(2);
        let result = KnnClassifier::new(3).predict(&[1.0], &store);
        assert_eq!(result.class_index, 0);
        assert_eq!(result.confidences, vec![0.0, 0.0]);
    }
}
