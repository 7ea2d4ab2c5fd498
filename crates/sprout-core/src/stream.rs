//! Stream plumbing shared by the interpreter and the dependency cache
//!
//! Every stream here carries full snapshots, so a subscriber that misses an
//! intermediate item loses nothing: only the latest item matters.
//!
//! # Panics
//!
//! [`fan_out`], [`fork`] and [`detach`] spawn a driver task and must be
//! called from within a Tokio runtime.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::watch;

/// Share one upstream among `count` subscribers.
///
/// Each subscriber first receives the latest item (if any) and then every
/// later one it has not yet seen. The upstream is dropped once it ends or
/// every subscriber is gone.
pub fn fan_out<X>(upstream: BoxStream<'static, X>, count: usize) -> Vec<BoxStream<'static, X>>
where
    X: Clone + Send + Sync + 'static,
{
    let (sender, receiver) = watch::channel(None);
    let branches = (0..count).map(|_| follow(receiver.clone())).collect();
    drop(receiver);
    tokio::spawn(drive(upstream, sender));
    branches
}

/// [`fan_out`] into exactly two subscribers.
pub fn fork<X>(upstream: BoxStream<'static, X>) -> (BoxStream<'static, X>, BoxStream<'static, X>)
where
    X: Clone + Send + Sync + 'static,
{
    let (sender, receiver) = watch::channel(None);
    let first = follow(receiver.clone());
    let second = follow(receiver);
    tokio::spawn(drive(upstream, sender));
    (first, second)
}

/// Drive `upstream` on a task of its own and follow it from there.
///
/// Polling the returned stream only reads a channel, so however many
/// detached stages are chained, each poll stays shallow. The task stops
/// once the returned stream is dropped.
pub fn detach<X>(upstream: BoxStream<'static, X>) -> BoxStream<'static, X>
where
    X: Clone + Send + Sync + 'static,
{
    let (sender, receiver) = watch::channel(None);
    tokio::spawn(drive(upstream, sender));
    follow(receiver)
}

async fn drive<X>(mut upstream: BoxStream<'static, X>, sender: watch::Sender<Option<X>>)
where
    X: Send + Sync + 'static,
{
    loop {
        tokio::select! {
            _ = sender.closed() => break,
            item = upstream.next() => match item {
                Some(item) => {
                    sender.send_replace(Some(item));
                }
                None => break,
            },
        }
    }
}

/// Stream every unseen item of a replaying channel until its sender is gone.
pub fn follow<X>(receiver: watch::Receiver<Option<X>>) -> BoxStream<'static, X>
where
    X: Clone + Send + Sync + 'static,
{
    stream::unfold(receiver, |mut receiver| async move {
        loop {
            receiver.changed().await.ok()?;
            let latest = receiver.borrow_and_update().clone();
            if let Some(item) = latest {
                return Some((item, receiver));
            }
        }
    })
    .boxed()
}

/// Combine the latest item of every stream.
///
/// Emits once every stream has produced a value and again whenever any of
/// them updates. The first error is forwarded and ends the combined stream.
pub fn combine_latest<X, E>(
    streams: Vec<BoxStream<'static, Result<X, E>>>,
) -> BoxStream<'static, Result<Vec<X>, E>>
where
    X: Clone + Send + 'static,
    E: Send + 'static,
{
    let count = streams.len();
    if count == 0 {
        return stream::once(future::ready(Ok(Vec::new()))).boxed();
    }

    let tagged = stream::select_all(
        streams
            .into_iter()
            .enumerate()
            .map(|(slot, inner)| inner.map(move |item| (slot, item)).boxed()),
    );
    let latest: Vec<Option<X>> = (0..count).map(|_| None).collect();

    stream::unfold(
        (tagged, latest, false),
        |(mut tagged, mut latest, failed)| async move {
            if failed {
                return None;
            }
            loop {
                let (slot, item) = tagged.next().await?;
                match item {
                    Err(err) => return Some((Err(err), (tagged, latest, true))),
                    Ok(value) => {
                        latest[slot] = Some(value);
                        if latest.iter().all(Option::is_some) {
                            let combined = latest.iter().flatten().cloned().collect();
                            return Some((Ok(combined), (tagged, latest, false)));
                        }
                    }
                }
            }
        },
    )
    .boxed()
}

/// End the stream right after its first error.
pub fn until_error<X, E>(input: BoxStream<'static, Result<X, E>>) -> BoxStream<'static, Result<X, E>>
where
    X: Send + 'static,
    E: Send + 'static,
{
    input
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

enum Deferred<X, E, F> {
    Waiting(BoxStream<'static, Result<X, E>>, F),
    Running(BoxStream<'static, Result<X, E>>),
    Done,
}

/// Build the downstream only once `input` yields an item accepted by `ready`.
///
/// Earlier items pass through unchanged, an early error is forwarded and
/// ends the stream, and the accepting item is replayed into the built
/// downstream.
pub fn defer_until<X, E, F>(
    input: BoxStream<'static, Result<X, E>>,
    ready: fn(&X) -> bool,
    build: F,
) -> BoxStream<'static, Result<X, E>>
where
    X: Send + 'static,
    E: Send + 'static,
    F: FnOnce(BoxStream<'static, Result<X, E>>) -> BoxStream<'static, Result<X, E>>
        + Send
        + 'static,
{
    stream::unfold(Deferred::Waiting(input, build), move |state| async move {
        match state {
            Deferred::Waiting(mut input, build) => match input.next().await? {
                Err(err) => Some((Err(err), Deferred::Done)),
                Ok(item) if ready(&item) => {
                    let replayed = stream::once(future::ready(Ok(item))).chain(input).boxed();
                    let mut running = build(replayed);
                    let first = running.next().await?;
                    Some((first, Deferred::Running(running)))
                }
                Ok(item) => Some((Ok(item), Deferred::Waiting(input, build))),
            },
            Deferred::Running(mut running) => {
                let item = running.next().await?;
                Some((item, Deferred::Running(running)))
            }
            Deferred::Done => None,
        }
    })
    .boxed()
}

/// Map every outer item to an inner stream, following only the newest one.
///
/// A new outer item drops the previous inner stream. The result ends once
/// the outer stream and the current inner stream have both ended.
pub fn switch_latest<X, Y>(
    outer: BoxStream<'static, X>,
    project: impl FnMut(X) -> BoxStream<'static, Y> + Send + 'static,
) -> BoxStream<'static, Y>
where
    X: Send + 'static,
    Y: Send + 'static,
{
    SwitchLatest {
        outer: Some(outer),
        inner: None,
        project: Box::new(project),
    }
    .boxed()
}

struct SwitchLatest<X, Y> {
    outer: Option<BoxStream<'static, X>>,
    inner: Option<BoxStream<'static, Y>>,
    project: Box<dyn FnMut(X) -> BoxStream<'static, Y> + Send>,
}

impl<X, Y> Stream for SwitchLatest<X, Y> {
    type Item = Y;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Y>> {
        let this = &mut *self;

        // Drain the outer stream so only its newest item is projected
        while let Some(outer) = this.outer.as_mut() {
            match outer.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => this.inner = Some((this.project)(item)),
                Poll::Ready(None) => this.outer = None,
                Poll::Pending => break,
            }
        }

        if let Some(inner) = this.inner.as_mut() {
            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => this.inner = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.outer.is_none() && this.inner.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_replays_latest() {
        let branches = fan_out(stream::iter(vec![1, 2, 3]).boxed(), 2);
        for branch in branches {
            let items: Vec<i32> = branch.collect().await;
            assert_eq!(items.last(), Some(&3));
        }
    }

    #[tokio::test]
    async fn test_detach_delivers_final_item() {
        let items: Vec<i32> = detach(stream::iter(vec![1, 2, 3]).boxed()).collect().await;
        assert_eq!(items.last(), Some(&3));
    }

    #[tokio::test]
    async fn test_detach_stops_driver_when_dropped() {
        let (dropped_tx, dropped_rx) = tokio::sync::oneshot::channel::<()>();
        let upstream = stream::pending::<i32>()
            .map(move |item| {
                let _guard = &dropped_tx;
                item
            })
            .boxed();
        drop(detach(upstream));

        let stopped = tokio::time::timeout(std::time::Duration::from_secs(1), dropped_rx).await;
        assert!(matches!(stopped, Ok(Err(_))));
    }

    #[tokio::test]
    async fn test_combine_latest_waits_for_every_slot() {
        let left = stream::iter(vec![Ok::<i32, String>(1)]).boxed();
        let right = stream::iter(vec![Ok(10), Ok(20)]).boxed();
        let combined: Vec<Result<Vec<i32>, String>> =
            combine_latest(vec![left, right]).collect().await;
        assert!(!combined.is_empty());
        assert_eq!(combined.last(), Some(&Ok(vec![1, 20])));
    }

    #[tokio::test]
    async fn test_combine_latest_ends_after_error() {
        let failing = stream::iter(vec![Err::<i32, String>("boom".to_string()), Ok(1)]).boxed();
        let other = stream::iter(vec![Ok(2)]).boxed();
        let combined: Vec<Result<Vec<i32>, String>> =
            combine_latest(vec![failing, other]).collect().await;
        assert_eq!(combined.last(), Some(&Err("boom".to_string())));
        assert_eq!(combined.iter().filter(|item| item.is_err()).count(), 1);
    }

    #[tokio::test]
    async fn test_until_error() {
        let items: Vec<Result<i32, &str>> =
            until_error(stream::iter(vec![Ok(1), Err("x"), Ok(2)]).boxed())
                .collect()
                .await;
        assert_eq!(items, vec![Ok(1), Err("x")]);
    }

    #[tokio::test]
    async fn test_defer_until_builds_lazily() {
        let input = stream::iter(vec![Ok::<i32, String>(0), Ok(5), Ok(6)]).boxed();
        let items: Vec<Result<i32, String>> = defer_until(
            input,
            |value| *value > 0,
            |rest| rest.map(|item| item.map(|value| value * 10)).boxed(),
        )
        .collect()
        .await;
        assert_eq!(items, vec![Ok(0), Ok(50), Ok(60)]);
    }

    #[tokio::test]
    async fn test_switch_latest_follows_newest_inner() {
        let outer = stream::iter(vec![1, 2]).boxed();
        let items: Vec<i32> = switch_latest(outer, |value| {
            stream::iter(vec![value * 10, value * 10 + 1]).boxed()
        })
        .collect()
        .await;
        assert_eq!(items, vec![20, 21]);
    }
}
