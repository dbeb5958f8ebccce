use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use klogs_core::{
    memory_transport, serve, CloseReason, LogSourceProvider, MemoryInstance, MemoryProvider,
    Script, ServerMessage, SessionConfig, SessionReport, SessionState, SourceDescriptor,
    StreamOptions, SubscribeMessage, TailerExit,
};
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("klogs_core=debug")
        .with_test_writer()
        .try_init();
}

fn subscribe(namespace: &str) -> SubscribeMessage {
    SubscribeMessage {
        namespace: namespace.to_string(),
        ..Default::default()
    }
}

/// Serve one session over an in-memory transport and collect everything the
/// subscriber receives.
async fn run_to_close(
    provider: Arc<dyn LogSourceProvider>,
    request: &SubscribeMessage,
) -> (SessionReport, Vec<ServerMessage>) {
    let (sink, inbound, mut client) = memory_transport(64);
    client.subscribe(request);
    let session = tokio::spawn(serve(
        "test".to_string(),
        provider,
        sink,
        inbound,
        SessionConfig::default(),
        CancellationToken::new(),
    ));
    let messages = client.collect().await;
    let report = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session did not close")
        .unwrap();
    (report, messages)
}

fn logs_by_container(messages: &[ServerMessage]) -> HashMap<String, Vec<String>> {
    let mut logs: HashMap<String, Vec<String>> = HashMap::new();
    for message in messages {
        if let ServerMessage::Log(log) = message {
            assert_eq!(log.instance, "pod-a");
            logs.entry(log.sub_component.clone())
                .or_default()
                .push(log.log.clone());
        }
    }
    logs
}

#[tokio::test]
async fn empty_namespace_closes_with_no_sources_found() {
    init_tracing();
    let provider = Arc::new(MemoryProvider::new());
    let request = SubscribeMessage {
        tail: Some(0),
        selector: Some(Default::default()),
        ..subscribe("ns1")
    };

    let (report, messages) = run_to_close(provider.clone(), &request).await;

    assert!(matches!(
        report.reason,
        CloseReason::Rejected { kind: "no_sources_found", .. }
    ));
    assert_eq!(report.state, SessionState::Closed);
    assert_eq!(report.delivered, 0);
    assert_eq!(messages.len(), 1);
    let ServerMessage::Error(error) = &messages[0] else {
        panic!("expected an error payload, got {:?}", messages[0]);
    };
    assert_eq!(error.error.r#type, "no_sources_found");
    assert_eq!(provider.open_count(), 0);
}

#[tokio::test]
async fn healthy_containers_deliver_every_line_in_order() {
    init_tracing();
    let provider = Arc::new(
        MemoryProvider::new().with_instance(
            MemoryInstance::new("ns1", "pod-a")
                .sub_component("app", Script::lines(["L1", "L2"]))
                .sub_component("sidecar", Script::lines(["L1", "L2"])),
        ),
    );
    let request = SubscribeMessage {
        instance: Some("pod-a".to_string()),
        ..subscribe("ns1")
    };

    let (report, messages) = run_to_close(provider.clone(), &request).await;

    assert_eq!(report.reason, CloseReason::SourcesExhausted);
    assert_eq!(report.delivered, 4);
    assert_eq!(messages.len(), 4);
    let logs = logs_by_container(&messages);
    assert_eq!(logs["app"], vec!["L1", "L2"]);
    assert_eq!(logs["sidecar"], vec!["L1", "L2"]);
    assert_eq!(report.count_exits(&TailerExit::EndOfStream), 2);
    assert_eq!(provider.live_streams(), 0);
}

#[tokio::test]
async fn failed_container_does_not_fail_the_session() {
    init_tracing();
    let provider = Arc::new(
        MemoryProvider::new().with_instance(
            MemoryInstance::new("ns1", "pod-a")
                .sub_component("app", Script::lines(["L1", "L2"]))
                .sub_component("sidecar", Script::unreachable("container is waiting to start")),
        ),
    );
    let request = SubscribeMessage {
        instance: Some("pod-a".to_string()),
        ..subscribe("ns1")
    };

    let (report, messages) = run_to_close(provider, &request).await;

    assert_eq!(report.reason, CloseReason::SourcesExhausted);
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| matches!(m, ServerMessage::Log(_))));
    let logs = logs_by_container(&messages);
    assert_eq!(logs["app"], vec!["L1", "L2"]);
    assert!(!logs.contains_key("sidecar"));
    assert_eq!(
        report
            .tailers
            .iter()
            .filter(|r| matches!(r.exit, TailerExit::OpenFailed(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn disconnect_cancels_every_active_tailer() {
    init_tracing();
    let provider = Arc::new(
        MemoryProvider::new().with_instance(
            MemoryInstance::new("ns1", "pod-a")
                .sub_component("app", Script::lines(["a"]).follow())
                .sub_component("proxy", Script::lines(["p"]).follow())
                .sub_component("metrics", Script::lines(["m"]).follow()),
        ),
    );
    let (sink, inbound, mut client) = memory_transport(64);
    client.subscribe(&SubscribeMessage {
        instance: Some("pod-a".to_string()),
        ..subscribe("ns1")
    });
    let session = tokio::spawn(serve(
        "test".to_string(),
        provider.clone(),
        sink,
        inbound,
        SessionConfig::default(),
        CancellationToken::new(),
    ));

    for _ in 0..3 {
        assert!(matches!(client.recv().await, Some(ServerMessage::Log(_))));
    }
    assert_eq!(provider.live_streams(), 3);
    client.disconnect();

    let report = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session hung after disconnect")
        .unwrap();
    assert_eq!(report.reason, CloseReason::SubscriberDisconnected);
    assert_eq!(report.state, SessionState::Closed);
    assert_eq!(report.count_exits(&TailerExit::Cancelled), 3);
    assert_eq!(provider.live_streams(), 0);
}

#[tokio::test]
async fn disconnect_after_a_source_ended_cancels_only_the_rest() {
    init_tracing();
    let provider = Arc::new(
        MemoryProvider::new().with_instance(
            MemoryInstance::new("ns1", "pod-a")
                .sub_component("init", Script::lines(["done"]))
                .sub_component("app", Script::lines(["a"]).follow())
                .sub_component("proxy", Script::lines(["p"]).follow()),
        ),
    );
    let (sink, inbound, mut client) = memory_transport(64);
    client.subscribe(&SubscribeMessage {
        instance: Some("pod-a".to_string()),
        ..subscribe("ns1")
    });
    let session = tokio::spawn(serve(
        "test".to_string(),
        provider.clone(),
        sink,
        inbound,
        SessionConfig::default(),
        CancellationToken::new(),
    ));

    for _ in 0..3 {
        assert!(matches!(client.recv().await, Some(ServerMessage::Log(_))));
    }
    // the finished source has released its stream, the followers still hold theirs
    tokio::time::timeout(Duration::from_secs(2), async {
        while provider.live_streams() != 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("finished source kept its stream open");
    client.disconnect();

    let report = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session hung after disconnect")
        .unwrap();
    assert_eq!(report.reason, CloseReason::SubscriberDisconnected);
    let exits: Vec<(String, TailerExit)> = report
        .tailers
        .iter()
        .map(|r| (r.source.sub_component.clone(), r.exit.clone()))
        .collect();
    assert_eq!(
        exits,
        vec![
            ("init".to_string(), TailerExit::EndOfStream),
            ("app".to_string(), TailerExit::Cancelled),
            ("proxy".to_string(), TailerExit::Cancelled),
        ]
    );
    assert_eq!(report.delivered, 3);
    assert_eq!(provider.live_streams(), 0);
}

#[tokio::test]
async fn selector_session_tags_events_with_their_instance() {
    init_tracing();
    let provider = Arc::new(
        MemoryProvider::new()
            .with_instance(
                MemoryInstance::new("ns1", "web-0")
                    .label("app", "web")
                    .sub_component("app", Script::lines(["w0"])),
            )
            .with_instance(
                MemoryInstance::new("ns1", "web-1")
                    .label("app", "web")
                    .sub_component("app", Script::lines(["w1"])),
            )
            .with_instance(
                MemoryInstance::new("ns1", "db-0")
                    .label("app", "db")
                    .sub_component("postgres", Script::lines(["db"])),
            ),
    );
    let request = SubscribeMessage {
        selector: Some([("app".to_string(), "web".to_string())].into_iter().collect()),
        ..subscribe("ns1")
    };

    let (report, messages) = run_to_close(provider, &request).await;

    assert_eq!(
        report.sources,
        vec![
            SourceDescriptor::new("ns1", "web-0", "app"),
            SourceDescriptor::new("ns1", "web-1", "app"),
        ]
    );
    let mut seen: Vec<(String, String)> = messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Log(log) => Some((log.instance.clone(), log.log.clone())),
            ServerMessage::Error(_) => None,
        })
        .collect();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("web-0".to_string(), "w0".to_string()),
            ("web-1".to_string(), "w1".to_string()),
        ]
    );
}

#[tokio::test]
async fn request_options_reach_the_provider() {
    init_tracing();
    let provider = Arc::new(MemoryProvider::new().with_instance(
        MemoryInstance::new("ns1", "pod-a").sub_component("app", Script::lines(["x"])),
    ));
    let request = SubscribeMessage {
        instance: Some("pod-a".to_string()),
        timestamps: true,
        since: Some(0),
        tail: Some(10),
        ..subscribe("ns1")
    };

    run_to_close(provider.clone(), &request).await;

    let opened = provider.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(
        opened[0].1,
        StreamOptions {
            timestamps: true,
            since_seconds: Some(0),
            tail_lines: Some(10),
            follow: true,
        }
    );
}

#[tokio::test]
async fn server_cancel_closes_session_and_is_idempotent() {
    init_tracing();
    let provider = Arc::new(MemoryProvider::new().with_instance(
        MemoryInstance::new("ns1", "pod-a").sub_component("app", Script::lines(["x"]).follow()),
    ));
    let (sink, inbound, mut client) = memory_transport(64);
    client.subscribe(&SubscribeMessage {
        instance: Some("pod-a".to_string()),
        ..subscribe("ns1")
    });
    let cancel = CancellationToken::new();
    let session = tokio::spawn(serve(
        "test".to_string(),
        provider.clone(),
        sink,
        inbound,
        SessionConfig::default(),
        cancel.clone(),
    ));

    assert!(matches!(client.recv().await, Some(ServerMessage::Log(_))));
    cancel.cancel();
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session did not close")
        .unwrap();
    assert_eq!(report.reason, CloseReason::Cancelled);
    assert!(client.recv().await.is_none());
    assert_eq!(provider.live_streams(), 0);
}

#[tokio::test]
async fn invalid_request_is_answered_with_an_error() {
    init_tracing();
    let provider = Arc::new(MemoryProvider::new());
    let request = SubscribeMessage {
        tail: Some(-1),
        ..subscribe("ns1")
    };

    let (report, messages) = run_to_close(provider, &request).await;

    assert!(matches!(
        report.reason,
        CloseReason::Rejected { kind: "invalid_request", .. }
    ));
    assert_eq!(messages.len(), 1);
    assert!(matches!(&messages[0], ServerMessage::Error(e) if e.error.r#type == "invalid_request"));
}
