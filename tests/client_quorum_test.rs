use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use log::LevelFilter;
use rand_core::OsRng;

use quorum_smr::{
    client::{CertifierConfiguration, InvokeError, InvokeOutcome, QuorumCertifier},
    messages::{Message, ReplyContent, ReplyMessage, RequestMessage},
    networking::Network,
    types::basic::{CryptoHash, ReplicaId, SessionId, ViewId},
    types::batch::RequestType,
    types::view::{FaultModel, View},
};

mod common;

use common::{
    logging::setup_logger,
    network::{mock_network, NetworkStub},
};

const SESSION: SessionId = SessionId::new(9);

/// A scripted replica: answers every incoming request with whatever replies `behavior`
/// produces for it.
fn spawn_responder(
    mut stub: NetworkStub,
    mut behavior: impl FnMut(&RequestMessage) -> Vec<ReplyMessage> + Send + 'static,
) {
    thread::spawn(move || loop {
        let Some((origin, message)) = stub.recv() else {
            thread::sleep(Duration::from_millis(5));
            continue;
        };
        if let Message::Request(request) = message {
            for reply in behavior(&request) {
                stub.send(origin, Message::Reply(reply));
            }
        }
    });
}

fn full_reply(me: ReplicaId, request: &RequestMessage, payload: &[u8]) -> ReplyMessage {
    ReplyMessage {
        sender: me,
        session: request.request.session,
        sequence: request.request.sequence,
        request_type: request.request.request_type,
        view: ViewId::new(0),
        content: ReplyContent::Full(payload.to_vec()),
        new_view: None,
    }
}

/// Four replica ids, their network stubs, the client's stub, and the view over the four.
fn test_group(client_key: &SigningKey) -> (Vec<ReplicaId>, Vec<NetworkStub>, NetworkStub, View) {
    let replica_ids: Vec<ReplicaId> = (1..=4u8).map(|i| ReplicaId::new([i; 32])).collect();
    let client_id = ReplicaId::from(&client_key.verifying_key());

    let mut stubs = mock_network(replica_ids.iter().copied().chain([client_id]));
    let client_stub = stubs.pop().unwrap();
    let view = View::new(ViewId::new(0), replica_ids.clone(), 1);
    (replica_ids, stubs, client_stub, view)
}

fn certifier(
    client_key: SigningKey,
    client_stub: NetworkStub,
    view: View,
) -> QuorumCertifier<NetworkStub> {
    let configuration = CertifierConfiguration::builder()
        .me(client_key)
        .session(SESSION)
        .initial_view(view)
        .fault_model(FaultModel::Byzantine)
        .invoke_timeout(Duration::from_secs(5))
        .build();
    QuorumCertifier::new(configuration, client_stub)
}

/// With `n = 4, f = 1` the Byzantine certification quorum is four; four byte-identical replies
/// certify the result.
#[test]
fn matching_replies_certify() {
    setup_logger(LevelFilter::Trace);

    let client_key = SigningKey::generate(&mut OsRng {});
    let (ids, stubs, client_stub, view) = test_group(&client_key);
    for (stub, me) in stubs.into_iter().zip(ids) {
        spawn_responder(stub, move |request| vec![full_reply(me, request, b"ok")]);
    }

    let mut client = certifier(client_key, client_stub, view);
    let outcome = client.invoke_ordered(b"operation").unwrap();
    assert_eq!(outcome, InvokeOutcome::Certified(b"ok".to_vec()));
}

/// Three matching replies out of four are below the quorum: once the fourth, divergent reply
/// arrives, the invocation fails rather than certifying on three.
#[test]
fn three_matching_replies_are_not_a_quorum() {
    setup_logger(LevelFilter::Trace);

    let client_key = SigningKey::generate(&mut OsRng {});
    let (ids, stubs, client_stub, view) = test_group(&client_key);
    for (index, (stub, me)) in stubs.into_iter().zip(ids).enumerate() {
        let payload: &[u8] = if index == 0 { b"bad" } else { b"ok" };
        spawn_responder(stub, move |request| vec![full_reply(me, request, payload)]);
    }

    let mut client = certifier(client_key, client_stub, view);
    let result = client.invoke_ordered(b"operation");
    assert_eq!(result, Err(InvokeError::QuorumNotReached));
}

/// An unordered read whose replies diverge is transparently re-issued through consensus.
#[test]
fn divergent_unordered_reads_fall_back_to_ordered() {
    setup_logger(LevelFilter::Trace);

    let client_key = SigningKey::generate(&mut OsRng {});
    let (ids, stubs, client_stub, view) = test_group(&client_key);
    for (index, (stub, me)) in stubs.into_iter().zip(ids).enumerate() {
        spawn_responder(stub, move |request| {
            let payload = match request.request.request_type {
                // Each replica's local state disagrees.
                RequestType::Unordered => vec![index as u8],
                _ => b"agreed".to_vec(),
            };
            vec![full_reply(me, request, &payload)]
        });
    }

    let mut client = certifier(client_key, client_stub, view);
    let outcome = client.invoke_unordered(b"read").unwrap();
    assert_eq!(outcome, InvokeOutcome::Certified(b"agreed".to_vec()));
}

/// In hashed mode only the designated full responder ships the payload; the digests of the
/// other replicas certify it.
#[test]
fn hashed_reads_certify_against_digests() {
    setup_logger(LevelFilter::Trace);

    let client_key = SigningKey::generate(&mut OsRng {});
    let (ids, stubs, client_stub, view) = test_group(&client_key);
    for (stub, me) in stubs.into_iter().zip(ids) {
        spawn_responder(stub, move |request| {
            let content = if request.full_responder == Some(me) {
                ReplyContent::Full(b"the full payload".to_vec())
            } else {
                ReplyContent::Digest(CryptoHash::digest_of(b"the full payload"))
            };
            vec![ReplyMessage {
                sender: me,
                session: request.request.session,
                sequence: request.request.sequence,
                request_type: request.request.request_type,
                view: ViewId::new(0),
                content,
                new_view: None,
            }]
        });
    }

    let mut client = certifier(client_key, client_stub, view);
    let outcome = client.invoke_unordered_hashed(b"read").unwrap();
    assert_eq!(
        outcome,
        InvokeOutcome::Certified(b"the full payload".to_vec())
    );
}

/// With only two of four replicas answering, the quorum can never form and the invocation
/// times out with [InvokeOutcome::NoReply].
#[test]
fn a_silent_group_times_out_with_no_reply() {
    setup_logger(LevelFilter::Trace);

    let client_key = SigningKey::generate(&mut OsRng {});
    let (ids, stubs, client_stub, view) = test_group(&client_key);
    for (index, (stub, me)) in stubs.into_iter().zip(ids).enumerate() {
        spawn_responder(stub, move |request| {
            if index < 2 {
                vec![full_reply(me, request, b"ok")]
            } else {
                Vec::new()
            }
        });
    }

    let configuration = CertifierConfiguration::builder()
        .me(client_key)
        .session(SESSION)
        .initial_view(view)
        .fault_model(FaultModel::Byzantine)
        .invoke_timeout(Duration::from_millis(800))
        .build();
    let mut client = QuorumCertifier::new(configuration, client_stub);

    let outcome = client.invoke_ordered(b"operation").unwrap();
    assert_eq!(outcome, InvokeOutcome::NoReply);
}

/// Replies tagged with a view id older than the client's own are never counted toward the
/// certification quorum, however many of them agree.
#[test]
fn replies_from_an_older_view_are_ignored() {
    setup_logger(LevelFilter::Trace);

    let client_key = SigningKey::generate(&mut OsRng {});
    let (ids, stubs, client_stub, _) = test_group(&client_key);
    let view = View::new(ViewId::new(5), ids.clone(), 1);
    for (stub, me) in stubs.into_iter().zip(ids) {
        // full_reply tags its replies with view 0, five views behind the client.
        spawn_responder(stub, move |request| {
            vec![full_reply(me, request, b"stale result")]
        });
    }

    let configuration = CertifierConfiguration::builder()
        .me(client_key)
        .session(SESSION)
        .initial_view(view)
        .fault_model(FaultModel::Byzantine)
        .invoke_timeout(Duration::from_millis(800))
        .build();
    let mut client = QuorumCertifier::new(configuration, client_stub);

    let outcome = client.invoke_ordered(b"operation").unwrap();
    assert_eq!(outcome, InvokeOutcome::NoReply);
}

/// Replies carrying a newer view make the certifier reconfigure and re-issue the request once;
/// the returned result is the one certified under the new view.
#[test]
fn a_newer_view_in_replies_triggers_one_reissue() {
    setup_logger(LevelFilter::Trace);

    let client_key = SigningKey::generate(&mut OsRng {});
    let (ids, stubs, client_stub, view) = test_group(&client_key);
    let newer_view = View::new(ViewId::new(1), ids.clone(), 1);

    for (stub, me) in stubs.into_iter().zip(ids) {
        let newer_view = newer_view.clone();
        let mut seen_one = false;
        spawn_responder(stub, move |request| {
            let reply = if !seen_one {
                seen_one = true;
                ReplyMessage {
                    new_view: Some(newer_view.clone()),
                    ..full_reply(me, request, b"stale")
                }
            } else {
                ReplyMessage {
                    view: ViewId::new(1),
                    ..full_reply(me, request, b"fresh")
                }
            };
            vec![reply]
        });
    }

    let mut client = certifier(client_key, client_stub, view);
    let outcome = client.invoke_ordered(b"operation").unwrap();
    assert_eq!(outcome, InvokeOutcome::Certified(b"fresh".to_vec()));
    assert_eq!(client.view().id(), ViewId::new(1));
}

/// With flow control on, the certifier waits for an acknowledgment quorum before collecting
/// execution replies.
#[test]
fn flow_control_handshake_precedes_certification() {
    setup_logger(LevelFilter::Trace);

    let client_key = SigningKey::generate(&mut OsRng {});
    let (ids, stubs, client_stub, view) = test_group(&client_key);
    for (stub, me) in stubs.into_iter().zip(ids) {
        spawn_responder(stub, move |request| {
            vec![
                ReplyMessage {
                    sender: me,
                    session: request.request.session,
                    sequence: request.request.sequence,
                    request_type: RequestType::Ack,
                    view: ViewId::new(0),
                    content: ReplyContent::Ack(me),
                    new_view: None,
                },
                full_reply(me, request, b"done"),
            ]
        });
    }

    let configuration = CertifierConfiguration::builder()
        .me(client_key)
        .session(SESSION)
        .initial_view(view)
        .fault_model(FaultModel::Byzantine)
        .invoke_timeout(Duration::from_secs(5))
        .flow_control(true)
        .build();
    let mut client = QuorumCertifier::new(configuration, client_stub);

    let outcome = client.invoke_ordered(b"operation").unwrap();
    assert_eq!(outcome, InvokeOutcome::Certified(b"done".to_vec()));
}

/// Replicas that never acknowledge make the handshake re-multicast the request until the retry
/// budget runs out, after which the invocation gives up with [InvokeOutcome::NoReply].
#[test]
fn an_unacknowledged_request_is_remulticast_then_given_up() {
    setup_logger(LevelFilter::Trace);

    let client_key = SigningKey::generate(&mut OsRng {});
    let (ids, stubs, client_stub, view) = test_group(&client_key);
    let retries_seen: Arc<Mutex<HashSet<u32>>> = Arc::new(Mutex::new(HashSet::new()));

    for (stub, _me) in stubs.into_iter().zip(ids) {
        let retries_seen = Arc::clone(&retries_seen);
        spawn_responder(stub, move |request| {
            retries_seen.lock().unwrap().insert(request.retry);
            Vec::new()
        });
    }

    let configuration = CertifierConfiguration::builder()
        .me(client_key)
        .session(SESSION)
        .initial_view(view)
        .fault_model(FaultModel::Byzantine)
        .invoke_timeout(Duration::from_secs(10))
        .flow_control(true)
        .ack_timeout(Duration::from_millis(100))
        .ack_retry_budget(2)
        .build();
    let mut client = QuorumCertifier::new(configuration, client_stub);

    let outcome = client.invoke_ordered(b"operation").unwrap();
    assert_eq!(outcome, InvokeOutcome::NoReply);
    // The original multicast plus two re-multicasts, each with a distinct retry counter.
    assert_eq!(
        *retries_seen.lock().unwrap(),
        HashSet::from([0u32, 1, 2])
    );
}
