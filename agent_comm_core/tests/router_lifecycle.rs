mod common;

use common::{BroadcastMessage, LoopbackBackend, Probe, SampleMessage};

use agent_comm_core::{AgentHandle, Channel, ChannelPattern, Router, RouterError, TypeRegistry};
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    // Given
    let backend = LoopbackBackend::new();
    let router = Router::new(backend.clone());

    // When
    router.start().await.unwrap();
    router.start().await.unwrap();

    // Then
    assert!(router.is_running());
    assert_eq!(1, backend.state().connects.load(Ordering::SeqCst));

    // When
    router.stop().await;
    router.stop().await;

    // Then
    assert!(!router.is_running());
    assert_eq!(1, backend.state().teardowns.load(Ordering::SeqCst));
}

#[tokio::test]
async fn cold_router_rejects_operations() {
    // Given
    let router = Router::new(LoopbackBackend::new());
    let agent = AgentHandle::from_arc(Probe::receiving::<SampleMessage>());

    // Then
    let error = router
        .publish(
            SampleMessage { content: "x".into() },
            &Channel::parse("SampleMessage:request:s").unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, RouterError::NotRunning { .. }));

    let error = router.subscribe(&agent, "SampleMessage:*:*").await.unwrap_err();
    assert!(matches!(error, RouterError::NotRunning { .. }));
}

#[tokio::test]
async fn stop_clears_subscriptions() {
    // Given
    let backend = LoopbackBackend::new();
    let router = Router::new(backend.clone());
    router.start().await.unwrap();

    let probe = Probe::receiving::<SampleMessage>();
    let agent = AgentHandle::from_arc(probe.clone());
    router.subscribe(&agent, "SampleMessage:*:*").await.unwrap();

    // When
    router.stop().await;
    router.start().await.unwrap();

    router
        .publish(
            SampleMessage { content: "x".into() },
            &Channel::parse("SampleMessage:request:s").unwrap(),
        )
        .await
        .unwrap();

    // Then: the subscription did not survive the restart
    assert_eq!(0, probe.received_count());
}

#[tokio::test]
async fn backend_subscription_follows_first_and_last_subscriber() {
    // Given
    let backend = LoopbackBackend::new();
    let router = Router::new(backend.clone());
    router.start().await.unwrap();

    let first = AgentHandle::from_arc(Probe::receiving::<SampleMessage>());
    let second = AgentHandle::from_arc(Probe::receiving::<SampleMessage>());
    let pattern = ChannelPattern::new("SampleMessage:*:*");

    // When: two agents subscribe to the same pattern
    router.subscribe(&first, pattern.clone()).await.unwrap();
    router.subscribe(&second, pattern.clone()).await.unwrap();

    // Then: exactly one backend subscription
    assert_eq!(1, backend.subscribe_count("SampleMessage:*:*"));

    // When: the first agent leaves
    router.unsubscribe(&first, Some(&pattern)).await.unwrap();

    // Then: the backend subscription is still alive
    assert_eq!(0, backend.unsubscribe_count("SampleMessage:*:*"));

    // When: the last agent leaves
    router.unsubscribe(&second, Some(&pattern)).await.unwrap();

    // Then: exactly one backend unsubscription
    assert_eq!(1, backend.unsubscribe_count("SampleMessage:*:*"));
}

#[tokio::test]
async fn auto_subscribe_is_idempotent() {
    // Given
    let backend = LoopbackBackend::new();
    let router = Router::new(backend.clone());
    router.start().await.unwrap();

    let probe = Probe::receiving::<SampleMessage>();
    let agent = AgentHandle::from_arc(probe.clone());
    agent.bind(&router);

    // When
    agent.subscribe().await.unwrap();
    agent.subscribe().await.unwrap();

    // Then
    assert!(agent.is_auto_subscribed());
    assert_eq!(1, backend.subscribe_count("SampleMessage:*:*"));

    // When
    agent.unsubscribe().await.unwrap();

    // Then
    assert!(!agent.is_auto_subscribed());
    assert_eq!(1, backend.unsubscribe_count("SampleMessage:*:*"));
}

#[tokio::test]
async fn disallowed_outgoing_type_never_reaches_the_backend() {
    // Given: an agent with an empty outgoing set
    let backend = LoopbackBackend::new();
    let router = Router::new(backend.clone());
    router.start().await.unwrap();

    let agent = AgentHandle::from_arc(Probe::new(Vec::new(), Vec::new()));
    agent.bind(&router);

    // When
    let error = agent
        .publish(
            SampleMessage { content: "x".into() },
            &Channel::parse("SampleMessage:request:t").unwrap(),
        )
        .await
        .unwrap_err();

    // Then
    match error {
        RouterError::DisallowedOutgoingType { type_name, .. } => {
            assert_eq!("SampleMessage", type_name);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(0, backend.publish_count());
}

#[tokio::test]
async fn broadcast_rejects_wildcard_arguments() {
    // Given
    let backend = LoopbackBackend::new();
    let router = Router::new(backend.clone());
    router.start().await.unwrap();

    // When
    let error = router
        .broadcast(BroadcastMessage { data: "u".into() }, "response", "*")
        .await
        .unwrap_err();

    // Then
    assert!(matches!(error, RouterError::WildcardBroadcast { .. }));
    assert_eq!(0, backend.publish_count());
}

#[tokio::test]
async fn unknown_message_type_is_reported_with_known_types() {
    // Given: a subscriber for SampleMessage only
    let backend = LoopbackBackend::new();
    let router = Router::new(backend.clone());
    router.start().await.unwrap();

    let agent = AgentHandle::from_arc(Probe::receiving::<SampleMessage>());
    router.subscribe(&agent, "*:*:*").await.unwrap();

    // When: a payload of an undeclared type arrives
    router
        .publish(
            BroadcastMessage { data: "u".into() },
            &Channel::parse("BroadcastMessage:request:s").unwrap(),
        )
        .await
        .unwrap();

    // Then: the delivery failed inside the core, naming the known types
    let errors = backend.state().delivery_errors.lock().clone();
    assert_eq!(1, errors.len());
    assert!(errors[0].contains("BroadcastMessage"));
    assert!(errors[0].contains("SampleMessage"));
}

#[tokio::test]
async fn fallback_registry_keeps_types_decodable() {
    // Given: the only subscriber declares no incoming types, so the type is
    // not reachable through the subscription table; the fallback registry
    // carries it instead
    let backend = LoopbackBackend::new();
    let mut fallback = TypeRegistry::new();
    fallback.register::<SampleMessage>();
    let router = Router::with_fallback(backend.clone(), fallback);
    router.start().await.unwrap();

    let probe = Probe::new(Vec::new(), Vec::new());
    let agent = AgentHandle::from_arc(probe.clone());
    router.subscribe(&agent, "*:*:*").await.unwrap();

    // When
    router
        .publish(
            SampleMessage { content: "x".into() },
            &Channel::parse("SampleMessage:request:s").unwrap(),
        )
        .await
        .unwrap();

    // Then: the payload decoded cleanly; nobody was eligible to receive it
    assert!(backend.state().delivery_errors.lock().is_empty());
    assert_eq!(0, probe.received_count());
}

#[tokio::test]
async fn agents_can_move_between_routers() {
    // Given
    let first_backend = LoopbackBackend::new();
    let first = Router::new(first_backend.clone());
    first.start().await.unwrap();

    let second_backend = LoopbackBackend::new();
    let second = Router::new(second_backend.clone());
    second.start().await.unwrap();

    let probe = Probe::receiving::<SampleMessage>();
    let agent = AgentHandle::from_arc(probe.clone());

    // When: the agent binds and subscribes on the first router, then moves
    agent.bind(&first);
    agent.subscribe().await.unwrap();
    agent.unsubscribe().await.unwrap();

    agent.bind(&second);
    agent.subscribe().await.unwrap();

    second
        .broadcast(SampleMessage { content: "moved".into() }, "request", "s")
        .await
        .unwrap();

    // Then
    assert_eq!(vec!["moved"], probe.contents());
    assert_eq!(1, first_backend.subscribe_count("SampleMessage:*:*"));
    assert_eq!(1, second_backend.subscribe_count("SampleMessage:*:*"));
}
