//! Remote session creation against a fake transport

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use common::{capture, host, hosts, FakeTransport};
use keystone_lib::credential::CredentialPromptEvent;
use keystone_lib::{
    BrokerConfig, CreateSessionRequest, CreationError, ProgressStep, SessionBroker, SessionTarget,
};

fn broker_with(transport: FakeTransport, hosts_list: Vec<keystone_lib::HostConfig>) -> Arc<SessionBroker> {
    broker_with_config(transport, hosts_list, BrokerConfig::default())
}

fn broker_with_config(
    transport: FakeTransport,
    hosts_list: Vec<keystone_lib::HostConfig>,
    config: BrokerConfig,
) -> Arc<SessionBroker> {
    Arc::new(
        SessionBroker::builder()
            .config(config)
            .hosts(hosts(hosts_list))
            .transport(Arc::new(transport))
            .pty_spawner(common::FakeSpawner::new())
            .build(),
    )
}

fn prompt_channel(broker: &SessionBroker) -> mpsc::UnboundedReceiver<CredentialPromptEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    // Dropping the handle keeps the listener registered
    let _ = broker.on_credential_prompt(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

fn spawn_create(
    broker: &Arc<SessionBroker>,
    host_id: &str,
) -> tokio::task::JoinHandle<Result<String, CreationError>> {
    let broker = broker.clone();
    let target = SessionTarget::remote(host_id);
    tokio::spawn(async move { broker.try_create_session(target).await })
}

#[tokio::test]
async fn prompt_fires_before_auth_and_secret_reaches_transport() {
    let transport = FakeTransport::expecting("typed-pw");
    let log = transport.log.clone();
    let broker = broker_with(transport, vec![host("web", None)]);

    let timeline = Arc::new(Mutex::new(Vec::<String>::new()));
    let t1 = timeline.clone();
    let _status = broker.on_session_status(move |e| t1.lock().push(e.step.to_string()));
    let t2 = timeline.clone();
    let _prompt_log = broker.on_credential_prompt(move |_| t2.lock().push("prompt".into()));
    let mut prompts = prompt_channel(&broker);

    let creating = spawn_create(&broker, "web");
    let prompt = prompts.recv().await.unwrap();
    assert_eq!(prompt.username, "deploy");
    assert_eq!(prompt.host, "web.example.net");
    assert!(prompt.prompt_label.contains("deploy@web.example.net"));

    broker.respond_to_credential_prompt(&prompt.request_id, Some("typed-pw".into()));
    let id = creating.await.unwrap().unwrap();

    assert_eq!(id, prompt.session_id);
    assert_eq!(
        timeline.lock().as_slice(),
        &["init", "connect", "prompt", "auth", "shell"]
    );
    assert_eq!(log.last_secret().as_deref(), Some("typed-pw"));
    assert!(broker.session(&id).is_some());
}

#[tokio::test]
async fn null_response_cancels_and_leaves_no_session() {
    let transport = FakeTransport::new();
    let log = transport.log.clone();
    let broker = broker_with(transport, vec![host("web", None)]);
    let mut prompts = prompt_channel(&broker);

    let creating = spawn_create(&broker, "web");
    let prompt = prompts.recv().await.unwrap();
    broker.respond_to_credential_prompt(&prompt.request_id, None);

    let err = creating.await.unwrap().unwrap_err();
    assert_eq!(err, CreationError::AuthenticationCancelled);
    assert!(broker.session(&prompt.session_id).is_none());
    assert!(broker.sessions().is_empty());
    assert_eq!(log.connect_count(), 0);
}

#[tokio::test]
async fn stored_secret_skips_prompt() {
    let transport = FakeTransport::expecting("stored-pw");
    let log = transport.log.clone();
    let broker = broker_with(transport, vec![host("db", Some("stored-pw"))]);

    let prompts = Arc::new(Mutex::new(0usize));
    let counter = prompts.clone();
    let _sub = broker.on_credential_prompt(move |_| *counter.lock() += 1);

    let id = broker
        .try_create_session(SessionTarget::remote("db"))
        .await
        .unwrap();

    assert_eq!(*prompts.lock(), 0);
    assert_eq!(log.last_secret().as_deref(), Some("stored-pw"));
    assert!(broker.session(&id).is_some());
}

#[tokio::test]
async fn empty_stored_password_still_prompts() {
    let broker = broker_with(FakeTransport::new(), vec![host("web", Some(""))]);
    let mut prompts = prompt_channel(&broker);

    let creating = spawn_create(&broker, "web");
    let prompt = prompts.recv().await.unwrap();
    broker.respond_to_credential_prompt(&prompt.request_id, Some("x".into()));
    assert!(creating.await.unwrap().is_ok());
}

#[tokio::test]
async fn status_steps_are_ordered_per_request() {
    let broker = broker_with(FakeTransport::new(), vec![host("db", Some("pw"))]);

    let steps = Arc::new(Mutex::new(Vec::new()));
    let sink = steps.clone();
    let _sub = broker.on_session_status(move |e| sink.lock().push((e.request_id.clone(), e.step)));

    let id = broker
        .try_create_session(SessionTarget::remote("db"))
        .await
        .unwrap();

    let mine: Vec<ProgressStep> = steps
        .lock()
        .iter()
        .filter(|(req, _)| *req == id)
        .map(|(_, step)| *step)
        .collect();
    assert_eq!(
        mine,
        vec![
            ProgressStep::Init,
            ProgressStep::Connect,
            ProgressStep::Auth,
            ProgressStep::Shell
        ]
    );
}

#[tokio::test]
async fn rejected_stored_secret_fails_without_prompt() {
    let broker = broker_with(FakeTransport::expecting("right"), vec![host("db", Some("wrong"))]);

    let prompts = Arc::new(Mutex::new(0usize));
    let counter = prompts.clone();
    let _sub = broker.on_credential_prompt(move |_| *counter.lock() += 1);

    let err = broker
        .try_create_session(SessionTarget::remote("db"))
        .await
        .unwrap_err();

    assert!(matches!(err, CreationError::ConnectFailed(ref m) if m.contains("rejected")));
    assert_eq!(*prompts.lock(), 0);
    assert!(broker.sessions().is_empty());
}

#[tokio::test]
async fn unknown_host_fails() {
    let broker = broker_with(FakeTransport::new(), vec![]);
    let response = broker
        .create_session(CreateSessionRequest::remote("ghost"))
        .await;

    assert!(!response.ok);
    assert_eq!(response.code.as_deref(), Some("unknown_host"));
    assert!(broker.sessions().is_empty());

    let blank = broker.create_session(CreateSessionRequest::remote("   ")).await;
    assert_eq!(blank.code.as_deref(), Some("unknown_host"));
}

#[tokio::test]
async fn empty_host_id_is_rejected_before_registration() {
    let broker = broker_with(FakeTransport::new(), vec![]);

    let steps = Arc::new(Mutex::new(0usize));
    let counter = steps.clone();
    let _sub = broker.on_session_status(move |_| *counter.lock() += 1);

    let response = broker.create_session(CreateSessionRequest::remote("")).await;
    assert_eq!(response.code.as_deref(), Some("invalid_request"));
    assert_eq!(*steps.lock(), 0);
}

#[tokio::test]
async fn connect_error_detail_is_kept() {
    let mut transport = FakeTransport::new();
    transport.connect_error = Some("Connection refused".into());
    let broker = broker_with(transport, vec![host("db", Some("pw"))]);

    let err = broker
        .try_create_session(SessionTarget::remote("db"))
        .await
        .unwrap_err();
    assert_eq!(err, CreationError::ConnectFailed("Connection refused".into()));
    assert!(broker.sessions().is_empty());
}

#[tokio::test]
async fn shell_failure_tears_down_connection() {
    let mut transport = FakeTransport::new();
    transport.shell_error = Some("Shell request failed".into());
    let log = transport.log.clone();
    let broker = broker_with(transport, vec![host("db", Some("pw"))]);

    let err = broker
        .try_create_session(SessionTarget::remote("db"))
        .await
        .unwrap_err();

    assert!(matches!(err, CreationError::ShellFailed(_)));
    assert_eq!(log.connection_closes.load(Ordering::SeqCst), 1);
    assert!(broker.sessions().is_empty());
}

#[tokio::test]
async fn close_during_credential_wait_aborts_creation() {
    let transport = FakeTransport::new();
    let log = transport.log.clone();
    let broker = broker_with(transport, vec![host("web", None)]);
    let mut prompts = prompt_channel(&broker);

    let creating = spawn_create(&broker, "web");
    let prompt = prompts.recv().await.unwrap();
    assert_eq!(broker.pending_credentials().len(), 1);

    broker.close_session(&prompt.session_id).await;

    let err = creating.await.unwrap().unwrap_err();
    assert!(matches!(err, CreationError::NotFound(_)));
    assert!(broker.session(&prompt.session_id).is_none());
    assert!(broker.pending_credentials().is_empty());
    assert_eq!(log.connect_count(), 0);
    assert!(log.shells.lock().is_empty());

    // A late answer finds nothing to resolve
    broker.respond_to_credential_prompt(&prompt.request_id, Some("late".into()));
    assert!(broker.sessions().is_empty());
}

#[tokio::test]
async fn close_during_connect_aborts_creation() {
    let mut transport = FakeTransport::new();
    let gate = Arc::new(Notify::new());
    transport.gate = Some(gate.clone());
    let log = transport.log.clone();
    let broker = broker_with(transport, vec![host("db", Some("pw"))]);

    let (tx, mut status) = mpsc::unbounded_channel();
    let _sub = broker.on_session_status(move |e| {
        let _ = tx.send((e.request_id.clone(), e.step));
    });

    let creating = spawn_create(&broker, "db");
    let session_id = loop {
        let (id, step) = status.recv().await.unwrap();
        if step == ProgressStep::Auth {
            break id;
        }
    };
    // Connect is now parked on the gate
    while log.connect_count() == 0 {
        tokio::task::yield_now().await;
    }

    broker.close_session(&session_id).await;
    let err = creating.await.unwrap().unwrap_err();
    assert!(matches!(err, CreationError::NotFound(_)));
    assert!(broker.session(&session_id).is_none());
    assert!(log.shells.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn credential_timeout_cancels() {
    let config = BrokerConfig {
        credential_timeout_secs: Some(5),
        ..BrokerConfig::default()
    };
    let broker = broker_with_config(FakeTransport::new(), vec![host("web", None)], config);

    let err = broker
        .try_create_session(SessionTarget::remote("web"))
        .await
        .unwrap_err();
    assert_eq!(err, CreationError::AuthenticationCancelled);
    assert!(broker.pending_credentials().is_empty());
    assert!(broker.sessions().is_empty());
}

#[tokio::test]
async fn unknown_and_duplicate_responses_are_ignored() {
    let broker = broker_with(FakeTransport::new(), vec![host("web", None)]);
    let mut prompts = prompt_channel(&broker);

    broker.respond_to_credential_prompt("no-such-request", Some("pw".into()));
    broker.respond_to_credential_prompt("no-such-request", None);

    let creating = spawn_create(&broker, "web");
    let prompt = prompts.recv().await.unwrap();
    broker.respond_to_credential_prompt(&prompt.request_id, Some("pw".into()));
    broker.respond_to_credential_prompt(&prompt.request_id, None);

    assert!(creating.await.unwrap().is_ok());
}

#[tokio::test]
async fn close_twice_and_no_data_after_close() {
    let transport = FakeTransport::new();
    let log = transport.log.clone();
    let broker = broker_with(transport, vec![host("db", Some("pw"))]);

    let id = broker
        .try_create_session(SessionTarget::remote("db"))
        .await
        .unwrap();
    let backend = log.shells.lock()[0].clone();

    let (seen, sink) = capture();
    let _sub = broker.on_session_data(&id, sink);

    broker.write_to_session(&id, b"ls\n").await;
    backend.emit("out");
    assert_eq!(seen.lock().as_slice(), b"ls\nout");

    broker.close_session(&id).await;
    broker.close_session(&id).await;

    assert!(!backend.emit("late"));
    assert_eq!(seen.lock().as_slice(), b"ls\nout");
    assert_eq!(backend.close_count(), 1);

    // Operations on a closed session are silent
    broker.write_to_session(&id, b"more").await;
    broker.resize_session(&id, 100, 30).await;
    assert!(backend.resizes.lock().is_empty());
}

#[tokio::test]
async fn remote_output_before_subscribe_is_replayed() {
    let transport = FakeTransport::new();
    let log = transport.log.clone();
    let broker = broker_with(transport, vec![host("db", Some("pw"))]);

    let id = broker
        .try_create_session(SessionTarget::remote("db"))
        .await
        .unwrap();
    let backend = log.shells.lock()[0].clone();

    // Emitted before anyone subscribed: replayed from the backlog
    backend.emit("motd\n");

    let (seen, sink) = capture();
    let _sub = broker.on_session_data(&id, sink);
    backend.emit("a");
    backend.emit("b");

    assert_eq!(seen.lock().as_slice(), b"motd\nab");
}

#[tokio::test]
async fn resize_forwarded_and_zero_ignored() {
    let transport = FakeTransport::new();
    let log = transport.log.clone();
    let broker = broker_with(transport, vec![host("db", Some("pw"))]);

    let id = broker
        .try_create_session(SessionTarget::remote("db"))
        .await
        .unwrap();
    let backend = log.shells.lock()[0].clone();

    broker.resize_session(&id, 0, 40).await;
    broker.resize_session(&id, 120, 40).await;
    broker.resize_session("missing", 120, 40).await;

    assert_eq!(backend.resizes.lock().as_slice(), &[(120, 40)]);
}

#[tokio::test]
async fn shutdown_closes_sessions_and_prompts() {
    let transport = FakeTransport::new();
    let log = transport.log.clone();
    let broker = broker_with(transport, vec![host("db", Some("pw")), host("web", None)]);
    let mut prompts = prompt_channel(&broker);

    broker
        .try_create_session(SessionTarget::remote("db"))
        .await
        .unwrap();
    let waiting = spawn_create(&broker, "web");
    prompts.recv().await.unwrap();

    broker.shutdown().await;

    assert!(waiting.await.unwrap().is_err());
    assert!(broker.sessions().is_empty());
    assert_eq!(log.shells.lock()[0].close_count(), 1);
    assert!(broker.pending_credentials().is_empty());
}
