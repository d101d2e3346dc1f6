/// Actor plumbing tests
///
/// Checks what the actor puts on the wire, using scripted replies.
/// Run with: cargo test --test actor_plumbing_tests
mod support;

use std::collections::BTreeMap;
use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use storecheck::actor::lifecycle::destroy_confirmation;
use storecheck::core::{ErrorKind, StoreError, Timestamp};
use storecheck::requirements::fixtures::Contact;
use storecheck::marshal::UploadTarget;
use storecheck::transport::proto::{GdprToken, MutateResult, StreamEvent, Task};
use storecheck::transport::{Request, Response};
use storecheck::{EntityId, EntityState, Entity, MutateOptions};
use support::{MemoryStore, ScriptedTransport, connect, http_once, test_caller, test_config};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn event(id: &str) -> StreamEvent {
    StreamEvent {
        id: id.to_string(),
        schema: Contact::schema_key(),
        entity: EntityId::new("c-1"),
        event_type: "created".to_string(),
        data: BTreeMap::new(),
    }
}

fn task(id: &str) -> Task {
    Task {
        id: id.to_string(),
        queue: "jobs".to_string(),
        payload: id.as_bytes().to_vec(),
        attempt: 1,
    }
}

#[tokio::test]
async fn test_event_stream_acks_handled_batch() {
    let transport = Arc::new(ScriptedTransport::new([
        Ok(Response::StreamEvents(vec![event("ev-1"), event("ev-2")])),
        Ok(Response::Ack),
    ]));
    let connection = connect(transport.clone());
    let token = CancellationToken::new();
    let actor = connection.actor(test_caller()).with_cancellation(token.clone());

    let mut seen = Vec::new();
    let delivered = actor
        .event_stream("audit", Some("worker-1"), |event| {
            seen.push(event.id);
            if seen.len() == 2 {
                token.cancel();
            }
            ready(Ok(()))
        })
        .await
        .unwrap();

    assert_eq!(delivered, 2);
    assert_eq!(seen, vec!["ev-1", "ev-2"]);
    assert_eq!(transport.sent_kinds(), vec!["event_pull", "event_ack"]);
    match &transport.sent_requests()[1] {
        Request::EventAck { group, own_key, event_ids } => {
            assert_eq!(group, "audit");
            assert_eq!(own_key.as_deref(), Some("worker-1"));
            assert_eq!(event_ids, &vec!["ev-1".to_string(), "ev-2".to_string()]);
        }
        other => panic!("expected an event ack, got {:?}", other),
    }
}

#[tokio::test]
async fn test_task_handler_error_skips_ack() {
    let transport = Arc::new(ScriptedTransport::new([Ok(Response::Tasks(vec![task("t-1"), task("t-2")]))]));
    let connection = connect(transport.clone());
    let actor = connection.actor(test_caller());

    let outcome = actor
        .task_stream("jobs", |_task| ready(Err(StoreError::Transport("refused".into()))))
        .await;

    assert!(outcome.is_err());
    assert_eq!(transport.sent_kinds(), vec!["task_pull"]);
}

#[tokio::test]
async fn test_task_stream_stops_when_cancelled_mid_batch() {
    let transport = Arc::new(ScriptedTransport::new([
        Ok(Response::Tasks(vec![task("t-1"), task("t-2"), task("t-3")])),
        Ok(Response::Ack),
    ]));
    let connection = connect(transport.clone());
    let token = CancellationToken::new();
    let actor = connection.actor(test_caller()).with_cancellation(token.clone());

    let delivered = actor
        .task_stream("jobs", |_task| {
            token.cancel();
            ready(Ok(()))
        })
        .await
        .unwrap();

    // The first task is acknowledged, the rest are left for redelivery.
    assert_eq!(delivered, 1);
    assert_eq!(transport.sent_kinds(), vec!["task_pull", "task_ack"]);
}

#[tokio::test]
async fn test_cancelled_actor_sends_nothing() {
    let transport = Arc::new(ScriptedTransport::default());
    let connection = connect(transport.clone());
    let token = CancellationToken::new();
    token.cancel();
    let actor = connection.actor(test_caller()).with_cancellation(token);

    let err = actor.akv_get("k").await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_transition_sends_state_only() {
    let transport = Arc::new(ScriptedTransport::new([Ok(Response::Mutated(MutateResult {
        id: EntityId::new("c-1"),
        ..MutateResult::default()
    }))]));
    let connection = connect(transport.clone());
    let actor = connection.actor(test_caller());

    let mut contact = Contact {
        name: "ann".into(),
        city: "leeds".into(),
        ..Contact::default()
    };
    contact.base.set_id("c-1");
    actor.archive(&mut contact).await.unwrap();

    assert_eq!(contact.base.state(), EntityState::Archived);
    match &transport.sent_requests()[0] {
        Request::Mutate(request) => {
            assert_eq!(request.id, Some(EntityId::new("c-1")));
            assert_eq!(request.state, Some(EntityState::Archived));
            assert!(request.properties.is_empty());
            assert!(request.deltas.is_empty());
            assert!(request.pending.is_empty());
        }
        other => panic!("expected a mutate, got {:?}", other),
    }
}

#[tokio::test]
async fn test_transition_requires_id() {
    let transport = Arc::new(ScriptedTransport::default());
    let connection = connect(transport.clone());
    let actor = connection.actor(test_caller());

    let mut contact = Contact::default();
    let err = actor.restore(&mut contact).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_destroy_sends_confirmation_hash() {
    let transport = Arc::new(ScriptedTransport::new([Ok(Response::Ack)]));
    let connection = connect(transport.clone());
    let actor = connection.actor(test_caller());
    let id = EntityId::new("c-9");

    actor.destroy::<Contact>(&id, "cleanup").await.unwrap();

    match &transport.sent_requests()[0] {
        Request::Destroy { confirmation, reason, .. } => {
            assert_eq!(confirmation, &destroy_confirmation(&id));
            assert_eq!(confirmation.len(), 64);
            assert_eq!(reason, "cleanup");
        }
        other => panic!("expected a destroy, got {:?}", other),
    }
}

#[tokio::test]
async fn test_mutate_writes_back_id_and_clears_pending() {
    let transport = Arc::new(ScriptedTransport::new([Ok(Response::Mutated(MutateResult {
        id: EntityId::new("c-7"),
        created: true,
        ..MutateResult::default()
    }))]));
    let connection = connect(transport.clone());
    let actor = connection.actor(test_caller());

    let mut contact = Contact {
        name: "bob".into(),
        ..Contact::default()
    };
    contact.base.add_label("vip");
    let result = actor.mutate(&mut contact, MutateOptions::new()).await.unwrap();

    assert!(result.created);
    assert_eq!(contact.base.id(), &EntityId::new("c-7"));
    assert!(contact.base.pending().is_empty());
    match &transport.sent_requests()[0] {
        Request::Mutate(request) => {
            assert_eq!(request.schema, "fixtures.contact");
            assert_eq!(request.id, None);
            assert_eq!(request.pending.labels.add, vec!["vip".to_string()]);
        }
        other => panic!("expected a mutate, got {:?}", other),
    }
}

#[tokio::test]
async fn test_caller_identity_travels_with_request() {
    let transport = Arc::new(ScriptedTransport::new([Ok(Response::Akv(None))]));
    let connection = connect(transport.clone());
    let actor = connection.actor(test_caller());

    assert_eq!(actor.akv_get("k").await.unwrap(), None);

    let sent = transport.sent();
    assert_eq!(sent[0].actor.user_id, "tester");
    assert_eq!(sent[0].authorization.tenant(), connection.owner());
}

#[tokio::test]
async fn test_unscripted_reply_kind_is_codec_error() {
    let transport = Arc::new(ScriptedTransport::new([Ok(Response::Ack)]));
    let connection = connect(transport);
    let actor = connection.actor(test_caller());

    let err = actor.squid("sq").await.unwrap_err();
    assert!(matches!(err, StoreError::Codec(_)));
}

#[tokio::test]
async fn test_past_recovery_deadline_is_conflict() {
    let past = chrono::Utc::now() - chrono::Duration::hours(1);
    let transport = Arc::new(ScriptedTransport::new([Ok(Response::Anonymized(Timestamp::from_datetime(&past)))]));
    let connection = connect(transport);
    let actor = connection.actor(test_caller());
    let token = GdprToken {
        token: "tok-1".to_string(),
        reference: "ref-1".to_string(),
        region: "eu".to_string(),
        expires: Timestamp::from_datetime(&chrono::Utc::now()),
    };

    let err = actor.anonymize(&token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.status(), Some(http::StatusCode::CONFLICT));
}

#[tokio::test]
async fn test_missing_credentials_rejected() {
    let store = Arc::new(MemoryStore::new());
    let config = test_config().access_token("");
    let connection = storecheck::Connection::with_transport(config, store.clone());

    connection.register::<Contact>().unwrap();
    let err = connection.sync_schema().wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    // A failed sync keeps the definition queued for the next attempt.
    let retry = connection.sync_schema().wait().await.unwrap_err();
    assert_eq!(retry.kind(), ErrorKind::Authorization);
    assert_eq!(store.request_kinds(), vec!["define_types", "define_types"]);
}

#[tokio::test]
async fn test_empty_task_pull_waits_briefly() {
    let store = Arc::new(MemoryStore::new());
    let connection = connect(store.clone());
    let token = CancellationToken::new();
    let actor = connection.actor(test_caller()).with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let delivered = tokio::time::timeout(
        Duration::from_secs(5),
        actor.task_stream("idle", |_task| ready(Ok(()))),
    )
    .await
    .unwrap()
    .unwrap();
    canceller.await.unwrap();

    assert_eq!(delivered, 0);
    let pulls = store.request_kinds().len();
    assert!(pulls >= 1 && pulls < 50, "pulled {} times", pulls);
}

fn upload_reply(url: String) -> Response {
    let mut headers = BTreeMap::new();
    headers.insert("x-object-acl".to_string(), "private".to_string());
    Response::Mutated(MutateResult {
        id: EntityId::new("c-3"),
        created: true,
        uploads: vec![UploadTarget {
            path: "avatar".to_string(),
            url,
            headers,
        }],
        ..MutateResult::default()
    })
}

#[tokio::test]
async fn test_upload_put_to_presigned_url() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(http_once(listener, "200 OK"));

    let transport = Arc::new(ScriptedTransport::new([Ok(upload_reply(format!(
        "http://{}/bucket/avatar",
        addr
    )))]));
    let connection = connect(transport.clone());
    let actor = connection.actor(test_caller());

    let mut contact = Contact {
        name: "with-avatar".into(),
        ..Contact::default()
    };
    let options = MutateOptions::new().upload("avatar", "image/png", b"png-bytes".to_vec());
    actor.mutate(&mut contact, options).await.unwrap();

    let (head, body) = server.await.unwrap();
    let head = head.to_ascii_lowercase();
    assert!(head.starts_with("put /bucket/avatar"), "{}", head);
    assert!(head.contains("content-type: image/png"), "{}", head);
    assert!(head.contains("x-object-acl: private"), "{}", head);
    assert_eq!(body, b"png-bytes".to_vec());

    match &transport.sent_requests()[0] {
        Request::Mutate(request) => {
            assert_eq!(request.uploads.len(), 1);
            assert_eq!(request.uploads[0].size, 9);
        }
        other => panic!("expected a mutate, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_upload_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(http_once(listener, "403 Forbidden"));

    let transport = Arc::new(ScriptedTransport::new([Ok(upload_reply(format!(
        "http://{}/bucket/avatar",
        addr
    )))]));
    let connection = connect(transport);
    let actor = connection.actor(test_caller());

    let mut contact = Contact::default();
    let options = MutateOptions::new().upload("avatar", "image/png", vec![1, 2, 3]);
    let err = actor.mutate(&mut contact, options).await.unwrap_err();
    server.await.unwrap();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("avatar"), "{}", err);
}

#[tokio::test]
async fn test_upload_without_target_fails() {
    let transport = Arc::new(ScriptedTransport::new([Ok(Response::Mutated(MutateResult {
        id: EntityId::new("c-4"),
        ..MutateResult::default()
    }))]));
    let connection = connect(transport);
    let actor = connection.actor(test_caller());

    let mut contact = Contact::default();
    let options = MutateOptions::new().upload("avatar", "image/png", vec![1]);
    let err = actor.mutate(&mut contact, options).await.unwrap_err();
    assert!(err.to_string().contains("no upload target"), "{}", err);
}
