use std::time::Duration;

use client_core::Notice;
use shared::domain::SessionCode;
use tokio::{sync::oneshot, time::timeout};

use super::*;

#[tokio::test]
async fn stop_signal_is_honored_while_events_keep_arriving() {
    let (tx, mut events) = broadcast::channel(64);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    for _ in 0..16 {
        tx.send(SessionEvent::RosterUpdated(RosterSnapshot::default()))
            .expect("send");
    }
    stop_tx.send(()).expect("stop");

    let exit = timeout(Duration::from_secs(2), watch_events(&mut events, stop_rx))
        .await
        .expect("watch returns while the channel is still open");

    assert_eq!(exit, WatchExit::Stopped);
    drop(tx);
}

#[tokio::test]
async fn stop_signal_fired_after_watch_starts_is_seen() {
    let (tx, mut events) = broadcast::channel(64);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let watcher = tokio::spawn(async move { watch_events(&mut events, stop_rx).await });
    tx.send(SessionEvent::Notice(Notice::info("still running")))
        .expect("send");
    tokio::task::yield_now().await;
    stop_tx.send(()).expect("stop");

    let exit = timeout(Duration::from_secs(2), watcher)
        .await
        .expect("watch returns")
        .expect("join");
    assert_eq!(exit, WatchExit::Stopped);
    drop(tx);
}

#[tokio::test]
async fn expiry_ends_the_watch() {
    let (tx, mut events) = broadcast::channel(8);
    tx.send(SessionEvent::PhaseChanged {
        phase: SessionPhase::Expired,
        code: Some(SessionCode::new("QR7K2M")),
    })
    .expect("send");

    let exit = watch_events(&mut events, std::future::pending::<()>()).await;

    assert_eq!(exit, WatchExit::Expired);
}

#[tokio::test]
async fn backend_sign_out_ends_the_watch() {
    let (tx, mut events) = broadcast::channel(8);
    tx.send(SessionEvent::LoginRequired { route: "/login" })
        .expect("send");

    let exit = watch_events(&mut events, std::future::pending::<()>()).await;

    assert_eq!(exit, WatchExit::SignedOut);
}

#[tokio::test]
async fn closed_channel_ends_the_watch() {
    let (tx, mut events) = broadcast::channel::<SessionEvent>(8);
    drop(tx);

    let exit = watch_events(&mut events, std::future::pending::<()>()).await;

    assert_eq!(exit, WatchExit::Closed);
}
