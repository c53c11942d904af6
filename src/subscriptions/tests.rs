#![allow(non_snake_case)]

use super::*;
use crate::{
    codec::AnchorGameCodec,
    pubsub::ProgramNotification,
    test_helpers::{
        InMemoryPubSub,
        arb_address,
    },
    types::{
        Board,
        GameStatus,
        Sign,
    },
};
use std::time::Duration;
use tokio::{
    sync::mpsc::UnboundedReceiver,
    time::timeout,
};

const WAIT: Duration = Duration::from_millis(500);

fn program_id() -> Address {
    arb_address(9)
}

fn game() -> Address {
    arb_address(3)
}

fn manager(pubsub: &InMemoryPubSub) -> SubscriptionManager<InMemoryPubSub, AnchorGameCodec> {
    SubscriptionManager::new(
        Arc::new(pubsub.clone()),
        Arc::new(AnchorGameCodec::new()),
        program_id(),
        game(),
    )
}

fn arb_state(sign: Sign) -> GameState {
    let mut board = Board::default();
    board[1][2] = Some(sign);
    GameState {
        players: [arb_address(1), arb_address(2)],
        turn: 2,
        board,
        status: GameStatus::Active,
    }
}

async fn next<T>(rx: &mut UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("callback not invoked in time")
        .expect("callback channel closed")
}

async fn assert_silent<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<T>) {
    tokio::task::yield_now().await;
    let outcome = timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(
        matches!(outcome, Err(_) | Ok(None)),
        "unexpected callback: {outcome:?}"
    );
}

#[tokio::test]
async fn subscribe_balance__every_push__is_forwarded_without_dedup() {
    // given
    let pubsub = InMemoryPubSub::new();
    let manager = manager(&pubsub);
    let watched = arb_address(1);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = manager
        .subscribe_balance(&watched, move |lamports| {
            let _ = tx.send(lamports);
        })
        .await
        .unwrap();

    // when
    pubsub.push_account(&watched, 10);
    pubsub.push_account(&watched, 10);
    pubsub.push_account(&watched, 25);

    // then
    assert_eq!(next(&mut rx).await, 10);
    assert_eq!(next(&mut rx).await, 10);
    assert_eq!(next(&mut rx).await, 25);
}

#[tokio::test]
async fn subscribe_game_state__empty_payload__produces_no_callback() {
    // given
    let pubsub = InMemoryPubSub::new();
    let manager = manager(&pubsub);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = manager
        .subscribe_game_state(move |state| {
            let _ = tx.send(state);
        })
        .await
        .unwrap();

    // when
    pubsub.push_program(
        &program_id(),
        ProgramNotification {
            address: game(),
            data: None,
        },
    );
    pubsub.push_program(
        &program_id(),
        ProgramNotification {
            address: game(),
            data: Some(Vec::new()),
        },
    );

    // then
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn subscribe_game_state__other_account__produces_no_callback() {
    // given
    let pubsub = InMemoryPubSub::new();
    let manager = manager(&pubsub);
    let codec = AnchorGameCodec::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = manager
        .subscribe_game_state(move |state| {
            let _ = tx.send(state);
        })
        .await
        .unwrap();

    // when
    pubsub.push_program(
        &program_id(),
        ProgramNotification {
            address: arb_address(200),
            data: Some(codec.encode(&arb_state(Sign::X)).unwrap()),
        },
    );

    // then
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn subscribe_game_state__matching_payload__decodes_once_per_push() {
    // given
    let pubsub = InMemoryPubSub::new();
    let manager = manager(&pubsub);
    let codec = AnchorGameCodec::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = manager
        .subscribe_game_state(move |state| {
            let _ = tx.send(state);
        })
        .await
        .unwrap();
    let first = arb_state(Sign::X);
    let second = arb_state(Sign::O);

    // when
    for state in [&first, &second] {
        pubsub.push_program(
            &program_id(),
            ProgramNotification {
                address: game(),
                data: Some(codec.encode(state).unwrap()),
            },
        );
    }

    // then
    assert_eq!(next(&mut rx).await, first);
    assert_eq!(next(&mut rx).await, second);
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn subscribe_game_state__undecodable_payload__is_skipped() {
    // given
    let pubsub = InMemoryPubSub::new();
    let manager = manager(&pubsub);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = manager
        .subscribe_game_state(move |state| {
            let _ = tx.send(state);
        })
        .await
        .unwrap();

    // when
    pubsub.push_program(
        &program_id(),
        ProgramNotification {
            address: game(),
            data: Some(vec![0xde, 0xad]),
        },
    );

    // then
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn cancel__called_twice__releases_remote_id_once() {
    // given
    let pubsub = InMemoryPubSub::new();
    let manager = manager(&pubsub);
    let handle = manager.subscribe_balance(&arb_address(1), |_| {}).await.unwrap();
    let id = handle.id();

    // when
    handle.cancel();
    handle.cancel();

    // then
    assert_eq!(handle.state(), SubscriptionState::Released);
    assert_eq!(pubsub.released(), vec![(id, SubscriptionKind::Account)]);
    assert_eq!(pubsub.active(), 0);
}

#[tokio::test]
async fn cancel__then_drop__does_not_release_again() {
    // given
    let pubsub = InMemoryPubSub::new();
    let manager = manager(&pubsub);
    let handle = manager.subscribe_game_state(|_| {}).await.unwrap();

    // when
    handle.cancel();
    drop(handle);

    // then
    assert_eq!(pubsub.released().len(), 1);
}

#[tokio::test]
async fn drop__active_handle__releases_subscription() {
    // given
    let pubsub = InMemoryPubSub::new();
    let manager = manager(&pubsub);
    let handle = manager.subscribe_game_state(|_| {}).await.unwrap();
    let id = handle.id();
    assert_eq!(handle.state(), SubscriptionState::Active);

    // when
    drop(handle);

    // then
    assert_eq!(pubsub.released(), vec![(id, SubscriptionKind::Program)]);
}

#[tokio::test]
async fn cancel__after_cancel__later_pushes_are_not_delivered() {
    // given
    let pubsub = InMemoryPubSub::new();
    let manager = manager(&pubsub);
    let watched = arb_address(1);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = manager
        .subscribe_balance(&watched, move |lamports| {
            let _ = tx.send(lamports);
        })
        .await
        .unwrap();
    pubsub.push_account(&watched, 1);
    assert_eq!(next(&mut rx).await, 1);

    // when
    handle.cancel();
    let reached = pubsub.push_account(&watched, 2);

    // then
    assert_eq!(reached, 0);
    assert_silent(&mut rx).await;
}
