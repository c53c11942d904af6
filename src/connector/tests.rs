#![allow(non_snake_case)]

use super::*;
use crate::test_helpers::{
    FakeControlPlaneFactory,
    ProbeBehavior,
    RecordingNotifier,
};

fn modern() -> Endpoint {
    Endpoint::new("localhost", 60001)
}

fn legacy() -> Endpoint {
    Endpoint::new("localhost", 50051)
}

fn ledger_rejection() -> ControlPlaneError {
    ControlPlaneError::Rejected {
        status: 500,
        message: "SolanaSdkTransactionError(InstructionError(0, Custom(1)))".to_string(),
    }
}

fn refused() -> ControlPlaneError {
    ControlPlaneError::Transport("connection refused".to_string())
}

#[test]
fn is_ledger_rejection__transport_failure__is_not_a_signal() {
    assert!(!is_ledger_rejection(&refused(), LEDGER_REJECTION_MARKER));
}

#[test]
fn is_ledger_rejection__front_door_rejection__is_not_a_signal() {
    let err = ControlPlaneError::Rejected {
        status: 404,
        message: "unknown method".to_string(),
    };
    assert!(!is_ledger_rejection(&err, LEDGER_REJECTION_MARKER));
}

#[test]
fn is_ledger_rejection__ledger_error__is_a_signal() {
    assert!(is_ledger_rejection(&ledger_rejection(), LEDGER_REJECTION_MARKER));
}

#[tokio::test]
async fn get_connection__modern_alive__resolves_modern_without_touching_legacy() {
    // given
    let factory = FakeControlPlaneFactory::new()
        .with_ping(&modern(), ProbeBehavior::Succeed)
        .with_airdrop(&legacy(), ProbeBehavior::Succeed);
    let probes = factory.calls();
    let connector = Connector::new(factory, RecordingNotifier::new(), modern(), legacy());

    // when
    let handle = connector.get_connection().await.unwrap();

    // then
    assert_eq!(handle.tier(), Tier::Modern);
    assert_eq!(handle.endpoint(), &modern());
    assert_eq!(connector.state(), NegotiationState::Modern);
    assert_eq!(probes.airdrops(&legacy()), 0);
    assert_eq!(probes.connects(&legacy()), 0);
}

#[tokio::test]
async fn get_connection__called_twice__probes_once() {
    // given
    let factory = FakeControlPlaneFactory::new().with_ping(&modern(), ProbeBehavior::Succeed);
    let probes = factory.calls();
    let connector = Connector::new(factory, RecordingNotifier::new(), modern(), legacy());

    // when
    connector.get_connection().await.unwrap();
    connector.get_connection().await.unwrap();

    // then
    assert_eq!(probes.pings(&modern()), 1);
    assert_eq!(probes.connects(&modern()), 1);
}

#[tokio::test]
async fn get_connection__concurrent_callers__share_one_negotiation() {
    // given
    let factory = FakeControlPlaneFactory::new().with_ping(&modern(), ProbeBehavior::Succeed);
    let probes = factory.calls();
    let connector = Connector::new(factory, RecordingNotifier::new(), modern(), legacy());

    // when
    let (first, second, third) = tokio::join!(
        connector.get_connection(),
        connector.get_connection(),
        connector.get_connection()
    );

    // then
    for handle in [first.unwrap(), second.unwrap(), third.unwrap()] {
        assert_eq!(handle.tier(), Tier::Modern);
    }
    assert_eq!(probes.pings(&modern()), 1);
    assert_eq!(probes.connects(&modern()), 1);
    assert_eq!(probes.connects(&legacy()), 0);
}

#[tokio::test]
async fn get_connection__concurrent_callers_both_down__all_fail_and_cache_nothing() {
    // given
    let factory = FakeControlPlaneFactory::new()
        .with_ping(&modern(), ProbeBehavior::Fail(refused()))
        .with_airdrop(&legacy(), ProbeBehavior::Fail(refused()));
    let probes = factory.calls();
    let notifier = RecordingNotifier::new();
    let messages = notifier.messages();
    let connector = Connector::new(factory, notifier, modern(), legacy());

    // when
    let (first, second, third) = tokio::join!(
        connector.get_connection(),
        connector.get_connection(),
        connector.get_connection()
    );

    // then
    for result in [first, second, third] {
        assert!(matches!(result, Err(Error::ControlPlaneUnreachable { .. })));
    }
    assert_eq!(connector.state(), NegotiationState::Failed);
    assert_eq!(messages.lock().unwrap().len(), probes.pings(&modern()));

    // when
    probes.set_ping(&modern(), ProbeBehavior::Succeed);
    let handle = connector.get_connection().await.unwrap();

    // then
    assert_eq!(handle.tier(), Tier::Modern);
    assert_eq!(connector.state(), NegotiationState::Modern);
}

#[tokio::test]
async fn get_connection__modern_down_and_legacy_ledger_rejection__resolves_legacy() {
    // given
    let factory = FakeControlPlaneFactory::new()
        .with_ping(&modern(), ProbeBehavior::Fail(refused()))
        .with_airdrop(&legacy(), ProbeBehavior::Fail(ledger_rejection()));
    let connector = Connector::new(factory, RecordingNotifier::new(), modern(), legacy());

    // when
    let handle = connector.get_connection().await.unwrap();

    // then
    assert_eq!(handle.tier(), Tier::Legacy);
    assert_eq!(handle.endpoint(), &legacy());
    assert_eq!(connector.state(), NegotiationState::Legacy);
}

#[tokio::test]
async fn get_connection__legacy_airdrop_succeeds__resolves_legacy() {
    // given
    let factory = FakeControlPlaneFactory::new()
        .with_ping(&modern(), ProbeBehavior::Fail(refused()))
        .with_airdrop(&legacy(), ProbeBehavior::Succeed);
    let connector = Connector::new(factory, RecordingNotifier::new(), modern(), legacy());

    // when
    let handle = connector.get_connection().await.unwrap();

    // then
    assert_eq!(handle.tier(), Tier::Legacy);
}

#[tokio::test]
async fn get_connection__legacy_airdrop_answers_unexpected_body__resolves_legacy() {
    // given
    let malformed =
        ControlPlaneError::InvalidResponse("/rpc/request-airdrop: missing field `signature`".into());
    let factory = FakeControlPlaneFactory::new()
        .with_ping(&modern(), ProbeBehavior::Fail(refused()))
        .with_airdrop(&legacy(), ProbeBehavior::Fail(malformed));
    let notifier = RecordingNotifier::new();
    let messages = notifier.messages();
    let connector = Connector::new(factory, notifier, modern(), legacy());

    // when
    let handle = connector.get_connection().await.unwrap();

    // then
    assert_eq!(handle.tier(), Tier::Legacy);
    assert_eq!(connector.state(), NegotiationState::Legacy);
    assert!(messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn get_connection__both_down__fails_notifies_and_caches_nothing() {
    // given
    let factory = FakeControlPlaneFactory::new()
        .with_ping(&modern(), ProbeBehavior::Fail(refused()))
        .with_airdrop(&legacy(), ProbeBehavior::Fail(refused()));
    let probes = factory.calls();
    let notifier = RecordingNotifier::new();
    let messages = notifier.messages();
    let connector = Connector::new(factory, notifier, modern(), legacy());

    // when
    let first = connector.get_connection().await;
    let state_after_first = connector.state();
    let second = connector.get_connection().await;

    // then
    assert!(matches!(first, Err(Error::ControlPlaneUnreachable { .. })));
    assert!(matches!(second, Err(Error::ControlPlaneUnreachable { .. })));
    assert_eq!(state_after_first, NegotiationState::Failed);
    assert_eq!(probes.pings(&modern()), 2);
    assert_eq!(probes.airdrops(&legacy()), 2);
    assert_eq!(
        messages.lock().unwrap().clone(),
        vec![UNREACHABLE_MESSAGE.to_string(); 2]
    );
}

#[tokio::test]
async fn get_connection__legacy_front_door_rejection__is_unreachable() {
    // given
    let front_door = ControlPlaneError::Rejected {
        status: 401,
        message: "unauthorized".to_string(),
    };
    let factory = FakeControlPlaneFactory::new()
        .with_ping(&modern(), ProbeBehavior::Fail(refused()))
        .with_airdrop(&legacy(), ProbeBehavior::Fail(front_door));
    let connector = Connector::new(factory, RecordingNotifier::new(), modern(), legacy());

    // when
    let result = connector.get_connection().await;

    // then
    assert!(matches!(result, Err(Error::ControlPlaneUnreachable { .. })));
}

#[tokio::test]
async fn get_connection__after_failure_service_comes_up__recovers() {
    // given
    let factory = FakeControlPlaneFactory::new()
        .with_ping(&modern(), ProbeBehavior::Fail(refused()))
        .with_airdrop(&legacy(), ProbeBehavior::Fail(refused()));
    let probes = factory.calls();
    let connector = Connector::new(factory, RecordingNotifier::new(), modern(), legacy());
    assert!(connector.get_connection().await.is_err());

    // when
    probes.set_ping(&modern(), ProbeBehavior::Succeed);
    let handle = connector.get_connection().await.unwrap();

    // then
    assert_eq!(handle.tier(), Tier::Modern);
    assert_eq!(connector.state(), NegotiationState::Modern);
}

#[tokio::test]
async fn get_connection__custom_classifier__decides_legacy_liveness() {
    // given
    struct AnyRejection;
    impl ProbeClassifier for AnyRejection {
        fn is_liveness_signal(&self, err: &ControlPlaneError) -> bool {
            matches!(err, ControlPlaneError::Rejected { .. })
        }
    }
    let front_door = ControlPlaneError::Rejected {
        status: 400,
        message: "bad request".to_string(),
    };
    let factory = FakeControlPlaneFactory::new()
        .with_ping(&modern(), ProbeBehavior::Fail(refused()))
        .with_airdrop(&legacy(), ProbeBehavior::Fail(front_door));
    let connector = Connector::new(factory, RecordingNotifier::new(), modern(), legacy())
        .with_classifier(AnyRejection);

    // when
    let handle = connector.get_connection().await.unwrap();

    // then
    assert_eq!(handle.tier(), Tier::Legacy);
}

#[test]
fn state__before_first_use__is_unresolved() {
    let connector = Connector::new(
        FakeControlPlaneFactory::new(),
        RecordingNotifier::new(),
        modern(),
        legacy(),
    );
    assert_eq!(connector.state(), NegotiationState::Unresolved);
}
