//! Incremental matrix builder
//!
//! Turns a stream of batched change events into a stream of matrix
//! snapshots. Each change pairs an index with a stream of values: every
//! emitted value is `set` at the index, and completion `remove`s it again.

use std::collections::HashSet;

use futures::stream::{self, BoxStream, SelectAll, StreamExt};

use super::{Index, Matrix};

/// One indexed change: the values that will occupy `index` over time
pub struct MatrixChange<V> {
    pub index: Index,
    pub values: BoxStream<'static, V>,
}

impl<V: Send + 'static> MatrixChange<V> {
    pub fn new(index: Index, values: BoxStream<'static, V>) -> Self {
        Self { index, values }
    }

    /// A change that sets `value` and then never completes.
    pub fn constant(index: Index, value: V) -> Self {
        Self::new(
            index,
            stream::once(async move { value })
                .chain(stream::pending())
                .boxed(),
        )
    }
}

enum Signal<V> {
    Batch(Vec<MatrixChange<V>>),
    Set(usize, Index, V),
    Complete(usize, Index),
}

/// Apply change events in arrival order, emitting a snapshot after each
/// `set` or `remove`.
///
/// Changes on disjoint paths commute; on the same path the last applied
/// wins. A change whose stream completes without emitting removes nothing.
pub fn build<V>(
    changes: impl futures::Stream<Item = Vec<MatrixChange<V>>> + Send + 'static,
) -> BoxStream<'static, Matrix<V>>
where
    V: Clone + Send + 'static,
{
    let mut signals: SelectAll<BoxStream<'static, Signal<V>>> = SelectAll::new();
    signals.push(changes.map(Signal::Batch).boxed());

    let state = BuilderState {
        matrix: Matrix::Empty,
        signals,
        next_id: 0,
        live: HashSet::new(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            match state.signals.next().await? {
                Signal::Batch(batch) => {
                    for change in batch {
                        let id = state.next_id;
                        state.next_id += 1;
                        let index = change.index.clone();
                        let values = change
                            .values
                            .map(move |value| Signal::Set(id, change.index.clone(), value))
                            .chain(stream::once(async move { Signal::Complete(id, index) }));
                        state.signals.push(values.boxed());
                    }
                }
                Signal::Set(id, index, value) => {
                    state.live.insert(id);
                    state.matrix.set(&index, value);
                    return Some((state.matrix.clone(), state));
                }
                Signal::Complete(id, index) => {
                    if state.live.remove(&id) {
                        state.matrix.remove(&index);
                        return Some((state.matrix.clone(), state));
                    }
                }
            }
        }
    })
    .boxed()
}

struct BuilderState<V> {
    matrix: Matrix<V>,
    signals: SelectAll<BoxStream<'static, Signal<V>>>,
    next_id: usize,
    live: HashSet<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forever(values: Vec<i32>) -> BoxStream<'static, i32> {
        stream::iter(values).chain(stream::pending()).boxed()
    }

    #[tokio::test]
    async fn test_build_applies_sets() {
        let batch = vec![
            MatrixChange::new(vec![0], forever(vec![1, 2])),
            MatrixChange::new(vec![1], forever(vec![3])),
        ];
        let snapshots: Vec<Matrix<i32>> = build(stream::iter(vec![batch]).chain(stream::pending()))
            .take(3)
            .collect()
            .await;
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[2], Matrix::from_list(vec![2, 3]));
    }

    #[tokio::test]
    async fn test_completion_removes_index() {
        let batch = vec![
            MatrixChange::new(vec![0], forever(vec![1])),
            MatrixChange::new(vec![1], stream::iter(vec![5]).boxed()),
            MatrixChange::new(vec![2], stream::empty().boxed()),
        ];
        let snapshots: Vec<Matrix<i32>> = build(stream::iter(vec![batch]))
            .take(3)
            .collect()
            .await;
        assert_eq!(snapshots.last(), Some(&Matrix::from_list(vec![1])));
    }

    #[tokio::test]
    async fn test_same_path_last_applied_wins() {
        let first = vec![MatrixChange::constant(vec![0], "a")];
        let later = stream::once(async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            vec![MatrixChange::constant(vec![0], "b")]
        });
        let snapshots: Vec<Matrix<&str>> = build(stream::iter(vec![first]).chain(later))
            .take(2)
            .collect()
            .await;
        assert_eq!(snapshots[1], Matrix::from_list(vec!["b"]));
    }
}
