use bytes::Bytes;
use qrchat::peer::mock::{MockNetwork, MockTransportFactory};
use qrchat::peer::transport::{ConnectionState, TransportEvent};
use qrchat::peer::types::Description;
use qrchat::{
    from_url, pack, to_url, unpack, Direction, NegotiationPayload, PayloadKind, Phase, Role,
    Session, SessionConfig, SessionError, SessionEvent,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

const GATHERING_TIMEOUT: Duration = Duration::from_millis(50);

fn config() -> SessionConfig {
    SessionConfig::default().with_gathering_timeout(GATHERING_TIMEOUT)
}

fn factory(network: &Arc<MockNetwork>) -> Arc<MockTransportFactory> {
    Arc::new(MockTransportFactory::new(network.clone()))
}

async fn expect_event(session: &mut Session) -> SessionEvent {
    timeout(Duration::from_secs(2), session.next_event())
        .await
        .expect("timed out waiting for a session event")
        .expect("event queue closed")
}

async fn assert_quiet(session: &mut Session) {
    let res = timeout(Duration::from_millis(50), session.next_event()).await;
    assert!(res.is_err(), "unexpected event: {:?}", res);
}

struct Pair {
    alice: Session,
    bob: Session,
    alice_factory: Arc<MockTransportFactory>,
    bob_factory: Arc<MockTransportFactory>,
}

/// Full handshake, with the payloads travelling as QR text and as a link
async fn connected_pair(network: &Arc<MockNetwork>) -> Pair {
    let alice_factory = factory(network);
    let bob_factory = factory(network);
    let mut alice = Session::new(alice_factory.clone(), config());
    let mut bob = Session::new(bob_factory.clone(), config());

    let offer = alice.create_offer("Alice").await.unwrap();
    let scanned = unpack(&pack(&offer).unwrap()).unwrap();
    let answer = bob.accept_offer_produce_answer(&scanned, "Bob").await.unwrap();
    let link = to_url("https://chat.example.org/", &answer).unwrap();
    alice.accept_answer(&from_url(&link).unwrap()).await.unwrap();

    assert_eq!(
        expect_event(&mut alice).await,
        SessionEvent::Connected {
            remote_name: "Bob".into()
        }
    );
    assert_eq!(
        expect_event(&mut bob).await,
        SessionEvent::Connected {
            remote_name: "Alice".into()
        }
    );

    Pair {
        alice,
        bob,
        alice_factory,
        bob_factory,
    }
}

fn answer_payload(name: &str) -> NegotiationPayload {
    NegotiationPayload::new(
        PayloadKind::Answer,
        name,
        Description(json!({
            "type": "answer",
            "sdp": "v=0\r\no=- 0000000000000000 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n"
        })),
    )
}

#[tokio::test]
async fn alice_and_bob_chat() {
    let network = MockNetwork::new();
    let mut pair = connected_pair(&network).await;

    assert_eq!(pair.alice.phase(), Phase::Connected);
    assert_eq!(pair.bob.phase(), Phase::Connected);
    assert_eq!(pair.alice.role(), Some(Role::Initiator));
    assert_eq!(pair.bob.role(), Some(Role::Responder));
    assert!(pair.alice.is_connected());
    assert_eq!(pair.alice.status_text(), "Connected to Bob");

    assert!(pair.alice.send_message("hi").await);
    match expect_event(&mut pair.bob).await {
        SessionEvent::Message(msg) => {
            assert_eq!(msg.sender, "Alice");
            assert_eq!(msg.body, "hi");
        }
        other => panic!("expected a message, got {other:?}"),
    }

    assert!(pair.bob.send_message("hello back").await);
    match expect_event(&mut pair.alice).await {
        SessionEvent::Message(msg) => assert_eq!(msg.body, "hello back"),
        other => panic!("expected a message, got {other:?}"),
    }

    let alice_log = pair.alice.transcript();
    assert_eq!(alice_log.len(), 2);
    assert_eq!(alice_log[0].direction, Direction::Sent);
    assert_eq!(alice_log[1].direction, Direction::Received);
    assert_eq!(alice_log[1].message.sender, "Bob");

    pair.bob.clear_transcript();
    assert!(pair.bob.transcript().is_empty());
}

#[tokio::test]
async fn offer_carries_gathered_candidates() {
    let network = MockNetwork::new();
    let mut alice = Session::new(factory(&network), config());

    let offer = alice.create_offer("Alice").await.unwrap();
    assert_eq!(offer.kind, PayloadKind::Offer);
    assert_eq!(offer.display_name, "Alice");
    assert_eq!(offer.description.0["type"], "offer");
    let sdp = offer.description.0["sdp"].as_str().unwrap();
    assert!(sdp.contains("a=candidate:"));
    assert_eq!(alice.phase(), Phase::AwaitingAnswer);
}

#[tokio::test]
async fn gathering_timeout_still_yields_a_payload() {
    let network = MockNetwork::new();
    let stalled = Arc::new(MockTransportFactory::new(network.clone()).with_gathering_delay(None));
    let mut alice = Session::new(stalled, config());

    let started = Instant::now();
    let offer = alice.create_offer("Alice").await.unwrap();
    assert!(started.elapsed() >= GATHERING_TIMEOUT);

    let sdp = offer.description.0["sdp"].as_str().unwrap();
    assert!(sdp.starts_with("v=0"));
    assert!(!sdp.contains("a=candidate:"));
    assert_eq!(alice.phase(), Phase::AwaitingAnswer);
}

#[tokio::test]
async fn empty_display_name_is_rejected() {
    let network = MockNetwork::new();
    let alice_factory = factory(&network);
    let mut alice = Session::new(alice_factory.clone(), config());

    let err = alice.create_offer("   ").await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert_eq!(alice.phase(), Phase::Idle);
    assert_eq!(alice_factory.created_count(), 0);
}

#[tokio::test]
async fn answer_cannot_be_accepted_as_offer() {
    let network = MockNetwork::new();
    let bob_factory = factory(&network);
    let mut bob = Session::new(bob_factory.clone(), config());

    let err = bob
        .accept_offer_produce_answer(&answer_payload("Mallory"), "Bob")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert!(err.is_retryable());
    assert_eq!(bob.phase(), Phase::Idle);
    assert_eq!(bob_factory.created_count(), 0);
}

#[tokio::test]
async fn accept_answer_requires_awaiting_answer() {
    let network = MockNetwork::new();
    let mut alice = Session::new(factory(&network), config());

    let err = alice.accept_answer(&answer_payload("Bob")).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert_eq!(alice.phase(), Phase::Idle);
}

#[tokio::test]
async fn wrong_kind_answer_can_be_rescanned() {
    let network = MockNetwork::new();
    let mut alice = Session::new(factory(&network), config());
    let mut bob = Session::new(factory(&network), config());

    let offer = alice.create_offer("Alice").await.unwrap();

    // Alice scans her own QR code by mistake
    let err = alice.accept_answer(&offer).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert_eq!(alice.phase(), Phase::AwaitingAnswer);

    let answer = bob.accept_offer_produce_answer(&offer, "Bob").await.unwrap();
    alice.accept_answer(&answer).await.unwrap();

    // at most one answer per offer
    let again = alice.accept_answer(&answer).await.unwrap_err();
    assert!(matches!(again, SessionError::Validation(_)));

    assert_eq!(
        expect_event(&mut alice).await,
        SessionEvent::Connected {
            remote_name: "Bob".into()
        }
    );
}

#[tokio::test]
async fn answer_for_another_offer_fails_the_session() {
    let network = MockNetwork::new();
    let alice_factory = factory(&network);
    let mut alice = Session::new(alice_factory.clone(), config());
    let mut carol = Session::new(factory(&network), config());
    let mut bob = Session::new(factory(&network), config());

    alice.create_offer("Alice").await.unwrap();
    let carols_offer = carol.create_offer("Carol").await.unwrap();
    let answer = bob
        .accept_offer_produce_answer(&carols_offer, "Bob")
        .await
        .unwrap();

    let err = alice.accept_answer(&answer).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert_eq!(alice.phase(), Phase::Failed);
    assert!(alice_factory.last_created().unwrap().is_closed());
    assert!(!alice.send_message("anyone?").await);
}

#[tokio::test]
async fn unparsable_offer_description_fails_the_responder() {
    let network = MockNetwork::new();
    let bob_factory = factory(&network);
    let mut bob = Session::new(bob_factory.clone(), config());
    let offer = NegotiationPayload::new(
        PayloadKind::Offer,
        "Alice",
        Description(json!({"type": "offer", "sdp": "hello"})),
    );

    let err = bob
        .accept_offer_produce_answer(&offer, "Bob")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert_eq!(bob.phase(), Phase::Failed);
    assert_eq!(bob_factory.created_count(), 1);
    assert!(bob_factory.last_created().unwrap().is_closed());
}

#[tokio::test]
async fn transport_creation_failure_is_a_negotiation_error() {
    let network = MockNetwork::new();
    let broken = Arc::new(MockTransportFactory::new(network.clone()).failing());
    let mut alice = Session::new(broken, config());

    let err = alice.create_offer("Alice").await.unwrap_err();
    assert!(matches!(err, SessionError::Negotiation(_)));
    assert!(!err.is_retryable());
    assert_eq!(alice.phase(), Phase::Failed);
    assert_eq!(alice.last_error(), Some(&err));

    // a failed session is not reused
    let again = alice.create_offer("Alice").await.unwrap_err();
    assert!(matches!(again, SessionError::Validation(_)));
}

#[tokio::test]
async fn send_requires_an_open_channel() {
    let network = MockNetwork::new();
    let mut alice = Session::new(factory(&network), config());
    assert!(!alice.send_message("too early").await);

    alice.create_offer("Alice").await.unwrap();
    assert!(!alice.send_message("still too early").await);

    alice.close().await;
    assert!(!alice.send_message("too late").await);
    assert!(alice.transcript().is_empty());
}

#[tokio::test]
async fn malformed_inbound_data_is_dropped() {
    let network = MockNetwork::new();
    let mut pair = connected_pair(&network).await;
    let bob_transport = pair.bob_factory.last_created().unwrap();

    bob_transport.inject(TransportEvent::ChannelMessage(Bytes::from_static(b"garbage")));
    bob_transport.inject(TransportEvent::ChannelMessage(Bytes::from_static(
        br#"{"type":"typing","username":"Alice","message":"","timestamp":1}"#,
    )));
    assert!(pair.alice.send_message("hi").await);

    match expect_event(&mut pair.bob).await {
        SessionEvent::Message(msg) => assert_eq!(msg.body, "hi"),
        other => panic!("expected a message, got {other:?}"),
    }
    assert_eq!(pair.bob.phase(), Phase::Connected);
    assert_eq!(pair.bob.transcript().len(), 1);
}

#[tokio::test]
async fn close_is_idempotent_and_reaches_the_peer() {
    let network = MockNetwork::new();
    let mut pair = connected_pair(&network).await;
    let alice_transport = pair.alice_factory.last_created().unwrap();

    pair.alice.close().await;
    pair.alice.close().await;
    assert_eq!(pair.alice.phase(), Phase::Closed);
    assert!(alice_transport.is_closed());
    assert_eq!(alice_transport.close_calls(), 1);
    assert!(!pair.alice.send_message("bye").await);
    assert!(pair.alice.next_event().await.is_none());

    assert_eq!(expect_event(&mut pair.bob).await, SessionEvent::Disconnected);
    assert_eq!(pair.bob.phase(), Phase::Closed);
    assert!(pair.bob_factory.last_created().unwrap().is_closed());
    assert_eq!(pair.bob.status_text(), "Disconnected");
}

#[tokio::test]
async fn closing_a_fresh_session_is_harmless() {
    let network = MockNetwork::new();
    let mut alice = Session::new(factory(&network), config());
    alice.close().await;
    alice.close().await;
    assert_eq!(alice.phase(), Phase::Closed);
}

#[tokio::test]
async fn connectivity_loss_is_reported() {
    let network = MockNetwork::new();
    let mut pair = connected_pair(&network).await;
    let alice_transport = pair.alice_factory.last_created().unwrap();

    alice_transport.inject(TransportEvent::ConnectionStateChanged(
        ConnectionState::Disconnected,
    ));
    assert_eq!(
        expect_event(&mut pair.alice).await,
        SessionEvent::ConnectionProblem
    );
    assert_eq!(pair.alice.phase(), Phase::Connected);

    alice_transport.inject(TransportEvent::ConnectionStateChanged(ConnectionState::Failed));
    match expect_event(&mut pair.alice).await {
        SessionEvent::Failed(SessionError::Channel(_)) => {}
        other => panic!("expected a channel failure, got {other:?}"),
    }
    assert_eq!(pair.alice.phase(), Phase::Failed);
    assert!(alice_transport.is_closed());
    assert!(!pair.alice.send_message("hello?").await);

    // failure is terminal
    pair.alice.close().await;
    assert_eq!(pair.alice.phase(), Phase::Failed);
}

#[tokio::test]
async fn channel_error_fails_the_session() {
    let network = MockNetwork::new();
    let mut pair = connected_pair(&network).await;
    let bob_transport = pair.bob_factory.last_created().unwrap();

    bob_transport.inject(TransportEvent::ChannelError("sctp abort".into()));
    assert_eq!(
        expect_event(&mut pair.bob).await,
        SessionEvent::Failed(SessionError::Channel("sctp abort".into()))
    );
    assert_eq!(pair.bob.phase(), Phase::Failed);
    assert!(pair.bob.status_text().contains("sctp abort"));
}

#[tokio::test]
async fn concurrent_sessions_stay_separate() {
    let network = MockNetwork::new();
    let mut first = connected_pair(&network).await;
    let mut second = connected_pair(&network).await;

    assert!(first.alice.send_message("to first bob").await);
    assert!(second.alice.send_message("to second bob").await);

    match expect_event(&mut first.bob).await {
        SessionEvent::Message(msg) => assert_eq!(msg.body, "to first bob"),
        other => panic!("expected a message, got {other:?}"),
    }
    match expect_event(&mut second.bob).await {
        SessionEvent::Message(msg) => assert_eq!(msg.body, "to second bob"),
        other => panic!("expected a message, got {other:?}"),
    }
    assert_quiet(&mut first.bob).await;
    assert_quiet(&mut second.bob).await;
}

#[tokio::test]
async fn failure_during_gathering_aborts_negotiation() {
    let network = MockNetwork::new();
    let stalled = Arc::new(MockTransportFactory::new(network.clone()).with_gathering_delay(None));
    let slow = SessionConfig::default().with_gathering_timeout(Duration::from_millis(300));
    let mut alice = Session::new(stalled.clone(), slow);

    let watcher = stalled.clone();
    tokio::spawn(async move {
        loop {
            if let Some(transport) = watcher.last_created() {
                tokio::time::sleep(Duration::from_millis(20)).await;
                transport.inject(TransportEvent::ConnectionStateChanged(ConnectionState::Failed));
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let started = Instant::now();
    let err = alice.create_offer("Alice").await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(matches!(err, SessionError::Channel(_)));
    assert_eq!(alice.phase(), Phase::Failed);
    assert!(stalled.last_created().unwrap().is_closed());

    match expect_event(&mut alice).await {
        SessionEvent::Failed(SessionError::Channel(_)) => {}
        other => panic!("expected a channel failure, got {other:?}"),
    }
}

#[tokio::test]
async fn accept_answer_after_negotiation_changes_nothing() {
    let network = MockNetwork::new();
    let mut pair = connected_pair(&network).await;
    let stray = answer_payload("Mallory");

    let err = pair.alice.accept_answer(&stray).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert_eq!(pair.alice.phase(), Phase::Connected);
    assert_eq!(pair.alice.remote_name(), Some("Bob"));
    assert!(pair.alice.is_connected());

    let err = pair.bob.accept_answer(&stray).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert_eq!(pair.bob.phase(), Phase::Connected);

    // Failed
    let alice_transport = pair.alice_factory.last_created().unwrap();
    alice_transport.inject(TransportEvent::ChannelError("sctp abort".into()));
    assert_eq!(
        expect_event(&mut pair.alice).await,
        SessionEvent::Failed(SessionError::Channel("sctp abort".into()))
    );
    let err = pair.alice.accept_answer(&stray).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert_eq!(pair.alice.phase(), Phase::Failed);
    assert_eq!(
        pair.alice.last_error(),
        Some(&SessionError::Channel("sctp abort".into()))
    );

    // Closed
    assert_eq!(expect_event(&mut pair.bob).await, SessionEvent::Disconnected);
    let err = pair.bob.accept_answer(&stray).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert_eq!(pair.bob.phase(), Phase::Closed);
    assert_eq!(pair.bob.remote_name(), Some("Alice"));
}

#[tokio::test]
async fn browser_offer_link_can_be_answered() {
    let network = MockNetwork::new();
    let mut alice = Session::new(factory(&network), config());
    let mut bob = Session::new(factory(&network), config());

    // a URL-only client shares just the description
    let offer = alice.create_offer("Alice").await.unwrap();
    let bare = serde_json::to_string(&offer.description).unwrap();
    let link = format!(
        "https://chat.example.org/#offer={}",
        qrchat::peer::lz::compress_to_uri(&bare)
    );

    let scanned = from_url(&link).unwrap();
    assert_eq!(scanned.display_name, qrchat::peer::codec::UNNAMED_PEER);
    let answer = bob.accept_offer_produce_answer(&scanned, "Bob").await.unwrap();
    alice.accept_answer(&answer).await.unwrap();

    assert_eq!(
        expect_event(&mut bob).await,
        SessionEvent::Connected {
            remote_name: "peer".into()
        }
    );
}
