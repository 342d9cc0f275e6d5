//! Integration tests for cancellation of queued and running tasks.
//!
//! Cancellation is cooperative: a cancelled current task unblocks the
//! queue immediately while its body is left to finish on its own, and a
//! task cancelled while still queued never runs at all.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

use gleis::{CancelReason, SerialQueue};

const TIMEOUT: Duration = Duration::from_secs(5);
const LONG: Duration = Duration::from_secs(30);

#[tokio::test]
async fn cancelling_a_queued_task_skips_its_body() {
    let queue: SerialQueue<()> = SerialQueue::new("cancel");
    let ran = Arc::new(AtomicBool::new(false));

    // Hold the queue busy so the victim stays queued.
    let gate = Arc::new(Notify::new());
    let hold = Arc::clone(&gate);
    let blocker = queue
        .push(move |_token| async move {
            hold.notified().await;
            Ok(())
        })
        .expect("queue is open");

    let flag = Arc::clone(&ran);
    let victim = queue
        .push(move |_token| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .expect("queue is open");

    let after = queue.push(|_token| async { Ok(()) }).expect("queue is open");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(victim.cancel());
    gate.notify_one();

    let err = timeout(TIMEOUT, victim)
        .await
        .expect("victim should settle")
        .expect_err("victim was cancelled");
    assert_eq!(err.reason(), Some(&CancelReason::User));

    timeout(TIMEOUT, blocker)
        .await
        .expect("blocker should settle")
        .expect("blocker should succeed");
    timeout(TIMEOUT, after)
        .await
        .expect("the task after the victim should settle")
        .expect("it should succeed");
    assert!(!ran.load(Ordering::SeqCst), "cancelled body must never run");
}

#[tokio::test]
async fn cancelling_the_current_task_unblocks_the_next() {
    let queue: SerialQueue<u32> = SerialQueue::new("cancel");

    let stuck = queue
        .push(|_token| async {
            tokio::time::sleep(LONG).await;
            Ok(0)
        })
        .expect("queue is open");
    let next = queue.push(|_token| async { Ok(9) }).expect("queue is open");

    tokio::time::sleep(Duration::from_millis(50)).await;
    stuck.cancel();

    // The next task runs long before the cancelled body's sleep ends.
    let value = timeout(Duration::from_secs(2), next)
        .await
        .expect("next task should run promptly")
        .expect("next task should succeed");
    assert_eq!(value, 9);

    let err = timeout(TIMEOUT, stuck)
        .await
        .expect("cancelled ticket should settle")
        .expect_err("it was cancelled");
    assert_eq!(err.reason(), Some(&CancelReason::User));
}

#[tokio::test]
async fn cancel_after_completion_is_a_noop() {
    let queue: SerialQueue<u32> = SerialQueue::new("cancel");
    let ticket = queue.push(|_token| async { Ok(1) }).expect("queue is open");
    let token = ticket.token().clone();

    let value = timeout(TIMEOUT, ticket)
        .await
        .expect("ticket should resolve")
        .expect("task should succeed");
    assert_eq!(value, 1);

    assert!(!token.cancel(), "completed tasks cannot be cancelled");
    assert!(!token.is_cancelled());
}

#[tokio::test]
async fn a_cancelled_body_may_still_finish_on_its_own() {
    let queue: SerialQueue<()> = SerialQueue::new("cancel");
    let finished = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&finished);
    let ticket = queue
        .push(move |_token| async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .expect("queue is open");

    tokio::time::sleep(Duration::from_millis(50)).await;
    ticket.cancel();

    let err = timeout(TIMEOUT, ticket)
        .await
        .expect("ticket should settle")
        .expect_err("it was cancelled");
    assert!(err.is_cancelled());

    // Cancellation is cooperative: the body was not interrupted.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        finished.load(Ordering::SeqCst),
        "the abandoned body should have run to completion"
    );
}

#[tokio::test]
async fn a_cooperative_body_can_observe_its_token() {
    let queue: SerialQueue<()> = SerialQueue::new("cancel");
    let observed = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&observed);
    let ticket = queue
        .push(move |token| async move {
            tokio::select! {
                _ = token.cancelled() => {
                    flag.store(true, Ordering::SeqCst);
                }
                _ = tokio::time::sleep(LONG) => {}
            }
            Ok(())
        })
        .expect("queue is open");

    tokio::time::sleep(Duration::from_millis(50)).await;
    ticket.cancel();

    let err = timeout(TIMEOUT, ticket)
        .await
        .expect("ticket should settle")
        .expect_err("it was cancelled");
    assert_eq!(err.reason(), Some(&CancelReason::User));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        observed.load(Ordering::SeqCst),
        "the body should see the cancellation through its token"
    );
}

#[tokio::test]
async fn the_first_cancel_reason_wins() {
    let queue: SerialQueue<()> = SerialQueue::new("cancel");

    let blocker = queue
        .push(|_token| async {
            tokio::time::sleep(LONG).await;
            Ok(())
        })
        .expect("queue is open");
    let victim = queue.push(|_token| async { Ok(()) }).expect("queue is open");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(victim.cancel_with(CancelReason::Other("superseded".into())));
    assert!(!victim.cancel());

    blocker.cancel();

    let err = timeout(TIMEOUT, victim)
        .await
        .expect("victim should settle")
        .expect_err("it was cancelled");
    assert_eq!(
        err.reason(),
        Some(&CancelReason::Other("superseded".into()))
    );

    let _ = timeout(TIMEOUT, blocker)
        .await
        .expect("blocker should settle");
}

#[tokio::test]
async fn cancel_all_sweeps_current_and_queued() {
    let queue: SerialQueue<()> = SerialQueue::new("cancel");
    let ran = Arc::new(AtomicUsize::new(0));

    let current = queue
        .push(|_token| async {
            tokio::time::sleep(LONG).await;
            Ok(())
        })
        .expect("queue is open");

    let mut queued = Vec::new();
    for _ in 0..3 {
        let counter = Arc::clone(&ran);
        queued.push(
            queue
                .push(move |_token| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .expect("queue is open"),
        );
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    timeout(TIMEOUT, queue.cancel_all())
        .await
        .expect("cancel_all should resolve");

    let err = timeout(TIMEOUT, current)
        .await
        .expect("current should settle")
        .expect_err("it was cancelled");
    assert_eq!(err.reason(), Some(&CancelReason::Shutdown));

    for ticket in queued {
        let err = timeout(TIMEOUT, ticket)
            .await
            .expect("queued entries should settle")
            .expect_err("they were cancelled");
        assert_eq!(err.reason(), Some(&CancelReason::Shutdown));
    }

    assert_eq!(ran.load(Ordering::SeqCst), 0, "no queued body should have run");
    assert!(queue.is_idle());
}

#[tokio::test]
async fn the_queue_keeps_working_after_cancel_all() {
    let queue: SerialQueue<u32> = SerialQueue::new("cancel");

    let stuck = queue
        .push(|_token| async {
            tokio::time::sleep(LONG).await;
            Ok(0)
        })
        .expect("queue is open");

    tokio::time::sleep(Duration::from_millis(30)).await;
    timeout(TIMEOUT, queue.cancel_all())
        .await
        .expect("cancel_all should resolve");
    let _ = timeout(TIMEOUT, stuck).await.expect("stuck should settle");

    // cancel_all discards work but does not close the queue.
    let fresh = queue.push(|_token| async { Ok(5) }).expect("queue is still open");
    let value = timeout(TIMEOUT, fresh)
        .await
        .expect("fresh task should resolve")
        .expect("it should succeed");
    assert_eq!(value, 5);
}
