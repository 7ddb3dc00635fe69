//! Futures over groups of futures

use crate::future::{Future, Promise};
use crate::scheduler::Context;
use parking_lot::Mutex;
use std::sync::Arc;

/// A future that is ready once every input is ready
///
/// The inputs are handed back unchanged so each value can be taken with
/// [`Future::get`]. An empty input is ready immediately.
pub fn when_all<T>(cx: &Context, futures: Vec<Future<T>>) -> Future<Vec<Future<T>>>
where
    T: Send + 'static,
{
    if futures.is_empty() {
        return ready(cx, Vec::new());
    }

    cx.spawn(move |cx| {
        for future in &futures {
            future.wait(cx);
        }
        futures
    })
}

/// A future that is ready once any input is ready
///
/// Resolves to the index of the first input seen ready together with all
/// inputs. An empty input is ready immediately with no index.
pub fn when_any<T>(cx: &Context, futures: Vec<Future<T>>) -> Future<(Option<usize>, Vec<Future<T>>)>
where
    T: Send + 'static,
{
    if futures.is_empty() {
        return ready(cx, (None, Vec::new()));
    }

    if let Some(index) = futures.iter().position(Future::is_ready) {
        return ready(cx, (Some(index), futures));
    }

    let states: Vec<_> = futures.iter().map(Future::state).collect();
    let (promise, result) = Promise::pair(cx.shared());
    let race = Arc::new(Race {
        futures: Mutex::new(Some(futures)),
        promise,
    });

    for (index, state) in states.into_iter().enumerate() {
        let race = race.clone();
        // Watchers outlive the race; each retires once its input is ready.
        let _watcher = cx.spawn(move |cx| {
            state.wait(cx);
            let futures = race.futures.lock().take();
            if let Some(futures) = futures {
                race.promise.fulfil(cx, Ok((Some(index), futures)));
            }
        });
    }

    result
}

/// Shared by the watcher tasks of one `when_any`; the first to finish wins
struct Race<T> {
    futures: Mutex<Option<Vec<Future<T>>>>,
    promise: Promise<(Option<usize>, Vec<Future<T>>)>,
}

fn ready<T: Send + 'static>(cx: &Context, value: T) -> Future<T> {
    let (promise, future) = Promise::pair(cx.shared());
    promise.fulfil(cx, Ok(value));
    future
}
