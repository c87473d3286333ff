use std::error::Error;
use std::future::{poll_fn, Future};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;

use watchbuild::stream::ValueStream;
use watchbuild_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

async fn drain<T: Clone + Send + 'static>(
    follower: &mut watchbuild::stream::Follower<T>,
) -> Vec<T> {
    let mut out = Vec::new();
    while let Some(v) = follower.next().await {
        out.push(v);
    }
    out
}

#[tokio::test]
async fn early_follower_sees_every_value_in_order() -> TestResult {
    init_tracing();
    let stream = ValueStream::new("numbers");
    let mut early = stream.subscribe();

    for v in 1..=5 {
        stream.push(v);
    }
    stream.stop();

    assert_eq!(with_timeout(drain(&mut early)).await, vec![1, 2, 3, 4, 5]);
    Ok(())
}

#[tokio::test]
async fn late_follower_replays_current_then_continues() -> TestResult {
    let stream = ValueStream::new("numbers");
    stream.push(1);
    stream.push(2);
    stream.push(3);

    let mut late = stream.subscribe();
    stream.push(4);
    stream.push(5);
    stream.stop();

    assert_eq!(with_timeout(drain(&mut late)).await, vec![3, 4, 5]);
    Ok(())
}

#[tokio::test]
async fn followers_consume_independently() -> TestResult {
    let stream = ValueStream::new("letters");
    let mut a = stream.subscribe();
    let mut b = stream.subscribe();

    stream.push("x");
    assert_eq!(a.next().await, Some("x"));

    stream.push("y");
    assert_eq!(b.buffered(), 2);
    assert_eq!(b.next().await, Some("x"));
    assert_eq!(b.next().await, Some("y"));
    assert_eq!(a.next().await, Some("y"));
    Ok(())
}

#[tokio::test]
async fn blocked_follower_wakes_on_push() -> TestResult {
    let stream = ValueStream::new("wake");
    let mut follower = stream.subscribe();

    let producer = stream.clone();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        producer.push(42);
    });

    assert_eq!(with_timeout(follower.next()).await, Some(42));
    Ok(())
}

#[tokio::test]
async fn value_pushed_to_an_abandoned_next_is_not_lost() -> TestResult {
    let stream = ValueStream::new("abandon");
    let mut follower = stream.subscribe();

    {
        let mut waiting = Box::pin(follower.next());
        let pending = poll_fn(|cx| Poll::Ready(waiting.as_mut().poll(cx).is_pending())).await;
        assert!(pending);
        stream.push(7);
    }
    stream.push(8);

    assert_eq!(follower.buffered(), 2);
    assert_eq!(with_timeout(follower.next()).await, Some(7));
    assert_eq!(with_timeout(follower.next()).await, Some(8));
    Ok(())
}

#[tokio::test]
async fn stop_ends_followers_after_buffered_values() -> TestResult {
    let stream = ValueStream::new("stop");
    let mut follower = stream.subscribe();
    stream.push(1);
    stream.push(2);

    assert!(stream.stop());
    assert!(!stream.stop(), "second stop is a no-op");
    assert!(stream.is_stopped());

    assert_eq!(follower.next().await, Some(1));
    assert_eq!(follower.next().await, Some(2));
    assert_eq!(follower.next().await, None);

    stream.push(3);
    assert_eq!(stream.current(), Some(2), "push after stop is dropped");
    Ok(())
}

#[tokio::test]
async fn stop_wakes_a_waiting_follower() -> TestResult {
    let stream: ValueStream<u32> = ValueStream::new("stop-wait");
    let mut follower = stream.subscribe();

    let stopper = stream.clone();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        stopper.stop();
    });

    assert_eq!(with_timeout(follower.next()).await, None);
    Ok(())
}

#[tokio::test]
async fn dropping_a_follower_detaches_it() -> TestResult {
    let stream: ValueStream<u32> = ValueStream::new("detach");
    let follower = stream.subscribe();
    let _kept = stream.subscribe();
    assert_eq!(stream.follower_count(), 2);

    drop(follower);
    assert_eq!(stream.follower_count(), 1);
    Ok(())
}

#[tokio::test]
async fn on_next_once_fires_a_single_time() -> TestResult {
    let stream = ValueStream::new("callbacks");
    let every = Arc::new(Mutex::new(Vec::new()));
    let once = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&every);
    let _all = stream.on_next(move |v: &u32| seen.lock().unwrap().push(*v), false);
    let count = Arc::clone(&once);
    let _one = stream.on_next(
        move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        },
        true,
    );

    stream.push(1);
    stream.push(2);
    stream.push(3);

    assert_eq!(*every.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(once.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn unsubscribe_removes_the_callback() -> TestResult {
    let stream = ValueStream::new("unsubscribe");
    let calls = Arc::new(AtomicUsize::new(0));

    let count = Arc::clone(&calls);
    let sub = stream.on_next(
        move |_: &&str| {
            count.fetch_add(1, Ordering::SeqCst);
        },
        false,
    );

    stream.push("a");
    sub.unsubscribe();
    stream.push("b");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn callbacks_may_push_to_other_streams() -> TestResult {
    let upstream = ValueStream::new("up");
    let downstream = ValueStream::new("down");

    let down = downstream.clone();
    let _sub = upstream.on_next(move |v: &u32| down.push(v * 10), false);

    upstream.push(4);
    assert_eq!(downstream.current(), Some(40));
    Ok(())
}

#[tokio::test]
async fn wait_current_returns_existing_or_next_value() -> TestResult {
    let seeded = ValueStream::with_value("seeded", 7);
    assert_eq!(seeded.wait_current().await, Some(7));

    let empty = ValueStream::new("empty");
    let producer = empty.clone();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        producer.push(9);
    });
    assert_eq!(with_timeout(empty.wait_current()).await, Some(9));
    Ok(())
}

#[tokio::test]
async fn wait_current_is_none_when_stopped_empty() -> TestResult {
    let stream: ValueStream<u32> = ValueStream::new("never");
    let stopper = stream.clone();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        stopper.stop();
    });

    assert_eq!(with_timeout(stream.wait_current()).await, None);
    assert!(!stream.has_current());
    Ok(())
}
