use std::net::SocketAddr;
use std::time::Duration;

use lattice_client::concept::codec::decode_concept;
use lattice_client::message::{
    kind, ConceptRecord, Operation, Payload, Request, Response, ResponseBody,
};
use lattice_client::{Concept, Error, Options, Transaction};
use lattice_wire::codec::BincodeCodec;
use lattice_wire::transport::TcpAcceptor;
use lattice_wire::Channel;

/// Helper to get a bound acceptor on a free port
async fn get_acceptor() -> (TcpAcceptor, SocketAddr) {
    let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = acceptor.local_addr().unwrap();
    (acceptor, addr)
}

async fn server_channel(acceptor: &TcpAcceptor) -> Channel<BincodeCodec> {
    let (transport, _) = acceptor.accept().await.unwrap();
    Channel::from_transport(transport, BincodeCodec)
}

async fn open_transaction(addr: SocketAddr, options: Options) -> Transaction {
    let channel = Channel::tcp(addr, BincodeCodec).await.unwrap();
    Transaction::open(channel, options)
}

fn entity_record(iid: &str) -> ConceptRecord {
    ConceptRecord {
        kind: kind::ENTITY,
        id: iid.to_string(),
        value_kind: None,
        value: None,
    }
}

fn role_type_record(label: &str) -> ConceptRecord {
    ConceptRecord {
        kind: kind::ROLE_TYPE,
        id: label.to_string(),
        value_kind: None,
        value: None,
    }
}

#[tokio::test]
async fn concurrent_calls_receive_their_own_responses() {
    let (acceptor, addr) = get_acceptor().await;

    // Server reads both requests, then answers in reverse arrival order
    let server = tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        let first: Request = channel.receive().await.unwrap();
        let second: Request = channel.receive().await.unwrap();
        for request in [second, first] {
            let iid = match &request.operation {
                Operation::GetThing { iid } => iid.clone(),
                op => panic!("unexpected operation {op:?}"),
            };
            let response = Response {
                correlation_id: request.correlation_id,
                body: ResponseBody::Ok(Payload::OptionalConcept(Some(entity_record(&iid)))),
            };
            channel.send(&response).await.unwrap();
        }
    });

    let tx = open_transaction(addr, Options::new()).await;
    let concepts = tx.concepts();
    let (a, b) = tokio::join!(
        concepts.get_thing("0xa"),
        concepts.get_thing("0xb"),
    );

    assert_eq!(a.unwrap(), Some(Concept::Entity { iid: "0xa".to_string() }));
    assert_eq!(b.unwrap(), Some(Concept::Entity { iid: "0xb".to_string() }));
    server.await.unwrap();
}

#[tokio::test]
async fn stream_pages_through_batches_transparently() {
    let (acceptor, addr) = get_acceptor().await;

    // Five items, batch hint 2: the server returns one bounded batch per
    // request and counts the continuations it sees.
    let server = tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        let initial: Request = channel.receive().await.unwrap();
        assert!(matches!(initial.operation, Operation::ThingGetPlays { .. }));
        assert_eq!(initial.streaming.unwrap().batch_size, 2);
        let id = initial.correlation_id;

        let items: Vec<ConceptRecord> =
            (0..5).map(|i| role_type_record(&format!("role-{i}"))).collect();

        channel
            .send(&Response {
                correlation_id: id,
                body: ResponseBody::Batch(items[..2].to_vec()),
            })
            .await
            .unwrap();

        let mut served = 2;
        let mut continuations = 0;
        loop {
            let request: Request = channel.receive().await.unwrap();
            assert!(matches!(request.operation, Operation::Continue));
            assert_eq!(request.correlation_id, id);
            continuations += 1;

            if served < items.len() {
                let end = (served + 2).min(items.len());
                channel
                    .send(&Response {
                        correlation_id: id,
                        body: ResponseBody::Batch(items[served..end].to_vec()),
                    })
                    .await
                    .unwrap();
                served = end;
            } else {
                channel
                    .send(&Response {
                        correlation_id: id,
                        body: ResponseBody::Done,
                    })
                    .await
                    .unwrap();
                return continuations;
            }
        }
    });

    let tx = open_transaction(addr, Options::new().batch_size(2)).await;
    let entity = Concept::Entity { iid: "0x1".to_string() };
    let mut stream = entity.bind(&tx).playing().await.unwrap();

    let mut labels = Vec::new();
    for _ in 0..5 {
        let concept = stream.next().await.unwrap().unwrap();
        labels.push(concept.id().to_string());
    }
    assert_eq!(labels, vec!["role-0", "role-1", "role-2", "role-3", "role-4"]);

    // Sixth pull drains the final continuation and yields a clean end
    assert_eq!(stream.next().await.unwrap(), None);
    // Pulling past exhaustion stays clean, never an error
    assert_eq!(stream.next().await.unwrap(), None);

    let continuations = server.await.unwrap();
    assert_eq!(continuations, 3);
}

#[tokio::test]
async fn close_fails_all_outstanding_work() {
    let (acceptor, addr) = get_acceptor().await;

    // Server reads requests but never replies
    tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        loop {
            let request: Result<Request, _> = channel.receive().await;
            if request.is_err() {
                return;
            }
        }
    });

    let tx = open_transaction(addr, Options::new()).await;

    let mut tasks = Vec::new();
    for i in 0..2 {
        let tx = tx.clone();
        tasks.push(tokio::spawn(async move {
            tx.execute(Operation::ThingIsInferred { iid: format!("0x{i}") })
                .await
                .map(|_| ())
        }));
    }
    for i in 0..3 {
        let tx = tx.clone();
        tasks.push(tokio::spawn(async move {
            let mut stream = tx
                .stream(Operation::ThingGetPlays { iid: format!("0x{i}") }, decode_concept)
                .await
                .unwrap();
            stream.next().await.map(|_| ())
        }));
    }

    // Let all five suspend on their correlation ids
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.close().await.unwrap();

    for task in tasks {
        let result = task.await.unwrap();
        assert_eq!(result.unwrap_err(), Error::ChannelClosed);
    }

    // Closing again is a no-op
    tx.close().await.unwrap();
    assert!(tx.is_closed());
}

#[tokio::test]
async fn server_errors_surface_verbatim() {
    let (acceptor, addr) = get_acceptor().await;

    let server = tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        let first: Request = channel.receive().await.unwrap();
        channel
            .send(&Response {
                correlation_id: first.correlation_id,
                body: ResponseBody::Error("no such thing: 0xdead".to_string()),
            })
            .await
            .unwrap();

        // The transaction survives a server-side rejection
        let second: Request = channel.receive().await.unwrap();
        channel
            .send(&Response {
                correlation_id: second.correlation_id,
                body: ResponseBody::Ok(Payload::OptionalConcept(None)),
            })
            .await
            .unwrap();
    });

    let tx = open_transaction(addr, Options::new()).await;

    let result = tx.concepts().get_thing("0xdead").await;
    assert_eq!(
        result.unwrap_err(),
        Error::Server("no such thing: 0xdead".to_string())
    );

    let missing = tx.concepts().get_thing("0xbeef").await.unwrap();
    assert_eq!(missing, None);
    server.await.unwrap();
}

#[tokio::test]
async fn mismatched_response_shape_fails_the_transaction() {
    let (acceptor, addr) = get_acceptor().await;

    tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        let request: Request = channel.receive().await.unwrap();
        // GetThing expects an optional concept; answer with a boolean
        channel
            .send(&Response {
                correlation_id: request.correlation_id,
                body: ResponseBody::Ok(Payload::Bool(true)),
            })
            .await
            .unwrap();
    });

    let tx = open_transaction(addr, Options::new()).await;

    let result = tx.concepts().get_thing("0x1").await;
    assert!(matches!(result, Err(Error::ProtocolViolation(_))));

    // The correlation table can no longer be trusted; everything after fails
    let after = tx
        .execute(Operation::ThingIsInferred { iid: "0x1".to_string() })
        .await;
    assert_eq!(after.unwrap_err(), Error::ChannelClosed);
}

#[tokio::test]
async fn unrecognized_concept_kind_is_a_protocol_violation() {
    let (acceptor, addr) = get_acceptor().await;

    tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        let request: Request = channel.receive().await.unwrap();
        let record = ConceptRecord {
            kind: 42,
            id: "0x1".to_string(),
            value_kind: None,
            value: None,
        };
        channel
            .send(&Response {
                correlation_id: request.correlation_id,
                body: ResponseBody::Ok(Payload::OptionalConcept(Some(record))),
            })
            .await
            .unwrap();
    });

    let tx = open_transaction(addr, Options::new()).await;

    match tx.concepts().get_thing("0x1").await.unwrap_err() {
        Error::ProtocolViolation(msg) => assert!(msg.contains("42")),
        e => panic!("expected protocol violation, got {e:?}"),
    }
}

#[tokio::test]
async fn timed_out_call_is_withdrawn_and_late_response_discarded() {
    let (acceptor, addr) = get_acceptor().await;

    let server = tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        let first: Request = channel.receive().await.unwrap();
        let second: Request = channel.receive().await.unwrap();

        // Answer the second call, then the first, which has already timed out
        channel
            .send(&Response {
                correlation_id: second.correlation_id,
                body: ResponseBody::Ok(Payload::Bool(true)),
            })
            .await
            .unwrap();
        channel
            .send(&Response {
                correlation_id: first.correlation_id,
                body: ResponseBody::Ok(Payload::OptionalConcept(None)),
            })
            .await
            .unwrap();

        let third: Request = channel.receive().await.unwrap();
        channel
            .send(&Response {
                correlation_id: third.correlation_id,
                body: ResponseBody::Ok(Payload::Bool(false)),
            })
            .await
            .unwrap();
    });

    let tx = open_transaction(addr, Options::new()).await;

    let timed_out = tx
        .execute_with_timeout(
            Operation::GetThing { iid: "0x1".to_string() },
            Duration::from_millis(50),
        )
        .await;
    assert_eq!(timed_out.unwrap_err(), Error::Timeout);

    let second = tx
        .execute(Operation::ThingIsInferred { iid: "0x2".to_string() })
        .await
        .unwrap();
    assert_eq!(second, Payload::Bool(true));

    // Give the stale response time to arrive; it matches no entry and is
    // discarded without failing the transaction
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!tx.is_closed());

    let third = tx
        .execute(Operation::ThingIsInferred { iid: "0x3".to_string() })
        .await
        .unwrap();
    assert_eq!(third, Payload::Bool(false));
    server.await.unwrap();
}

#[tokio::test]
async fn kind_guards_fail_client_side() {
    let (acceptor, addr) = get_acceptor().await;

    // Server that would panic on any request
    tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        let request: Result<Request, _> = channel.receive().await;
        if let Ok(request) = request {
            panic!("guarded operation reached the server: {:?}", request.operation);
        }
    });

    let tx = open_transaction(addr, Options::new()).await;

    let entity = Concept::Entity { iid: "0x1".to_string() };
    let role = Concept::RoleType { label: "employee".to_string() };

    let result = entity.bind(&tx).add_player(&role, &entity).await;
    assert!(matches!(result, Err(Error::InvalidHandle(_))));

    let entity_type = Concept::EntityType { label: "person".to_string() };
    let result = entity_type.bind(&tx).delete().await;
    assert!(matches!(result, Err(Error::InvalidHandle(_))));

    let result = entity_type.bind(&tx).is_deleted().await;
    assert!(matches!(result, Err(Error::InvalidHandle(_))));

    let result = entity.bind(&tx).set_supertype(&entity_type).await;
    assert!(matches!(result, Err(Error::InvalidHandle(_))));

    // A supertype must itself be a type
    let result = entity_type.bind(&tx).set_supertype(&entity).await;
    assert!(matches!(result, Err(Error::InvalidHandle(_))));

    // Streaming operations cannot go through execute
    let result = tx
        .execute(Operation::ThingGetPlays { iid: "0x1".to_string() })
        .await;
    assert!(matches!(result, Err(Error::InvalidHandle(_))));

    tx.close().await.unwrap();
}

#[tokio::test]
async fn type_hierarchy_and_existence_operations_round_trip() {
    let (acceptor, addr) = get_acceptor().await;

    let server = tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;

        let request: Request = channel.receive().await.unwrap();
        match &request.operation {
            Operation::TypeSetSupertype { label, supertype } => {
                assert_eq!(label, "person");
                assert_eq!(supertype.id, "being");
            }
            op => panic!("unexpected operation {op:?}"),
        }
        channel
            .send(&Response {
                correlation_id: request.correlation_id,
                body: ResponseBody::Ok(Payload::Unit),
            })
            .await
            .unwrap();

        let request: Request = channel.receive().await.unwrap();
        assert!(matches!(request.operation, Operation::TypeGetInstances { .. }));
        let id = request.correlation_id;
        channel
            .send(&Response {
                correlation_id: id,
                body: ResponseBody::Batch(vec![entity_record("0x1"), entity_record("0x2")]),
            })
            .await
            .unwrap();
        let request: Request = channel.receive().await.unwrap();
        assert!(matches!(request.operation, Operation::Continue));
        channel
            .send(&Response {
                correlation_id: id,
                body: ResponseBody::Done,
            })
            .await
            .unwrap();

        let request: Request = channel.receive().await.unwrap();
        match &request.operation {
            Operation::GetThing { iid } => assert_eq!(iid, "0x9"),
            op => panic!("unexpected operation {op:?}"),
        }
        channel
            .send(&Response {
                correlation_id: request.correlation_id,
                body: ResponseBody::Ok(Payload::OptionalConcept(None)),
            })
            .await
            .unwrap();
    });

    let tx = open_transaction(addr, Options::new()).await;

    let person = Concept::EntityType { label: "person".to_string() };
    let being = Concept::EntityType { label: "being".to_string() };
    person.bind(&tx).set_supertype(&being).await.unwrap();

    let instances = person
        .bind(&tx)
        .instances()
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(
        instances,
        vec![
            Concept::Entity { iid: "0x1".to_string() },
            Concept::Entity { iid: "0x2".to_string() },
        ]
    );

    let ghost = Concept::Entity { iid: "0x9".to_string() };
    assert!(ghost.bind(&tx).is_deleted().await.unwrap());
    server.await.unwrap();
}

#[tokio::test]
async fn garbled_stream_item_poisons_the_transaction() {
    let (acceptor, addr) = get_acceptor().await;

    tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        let request: Request = channel.receive().await.unwrap();
        let garbled = ConceptRecord {
            kind: 42,
            id: "0x2".to_string(),
            value_kind: None,
            value: None,
        };
        channel
            .send(&Response {
                correlation_id: request.correlation_id,
                body: ResponseBody::Batch(vec![entity_record("0x1"), garbled]),
            })
            .await
            .unwrap();
    });

    let tx = open_transaction(addr, Options::new()).await;
    let entity = Concept::Entity { iid: "0x1".to_string() };
    let mut stream = entity.bind(&tx).playing().await.unwrap();

    // The well-formed item before the garbled one still comes through
    assert!(stream.next().await.unwrap().is_some());
    let result = stream.next().await;
    assert!(matches!(result, Err(Error::ProtocolViolation(_))));

    // The framing can no longer be trusted; everything after fails
    let after = tx
        .execute(Operation::ThingIsInferred { iid: "0x1".to_string() })
        .await;
    assert_eq!(after.unwrap_err(), Error::ChannelClosed);
}

#[tokio::test]
async fn close_releases_channel_after_failure() {
    let (acceptor, addr) = get_acceptor().await;

    let server = tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        // A response nobody asked for fails the transaction
        channel
            .send(&Response {
                correlation_id: 7,
                body: ResponseBody::Done,
            })
            .await
            .unwrap();
        // The explicit close must still release the connection
        let next: Result<Request, _> = channel.receive().await;
        assert!(next.is_err());
    });

    let tx = open_transaction(addr, Options::new()).await;
    while !tx.is_closed() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tx.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn stale_timeout_ids_are_evicted_oldest_first() {
    let (acceptor, addr) = get_acceptor().await;

    // One past the cap evicts the oldest id; one more guarantees the server
    // only replies after that eviction has happened, since each call is
    // withdrawn before the next request is sent.
    let withdrawn = lattice_client::transaction::MAX_ABANDONED_CALLS + 2;
    let server = tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        let mut ids = Vec::with_capacity(withdrawn);
        for _ in 0..withdrawn {
            let request: Request = channel.receive().await.unwrap();
            ids.push(request.correlation_id);
        }
        // The oldest withdrawn id has been evicted; its response is no
        // longer matched and fails the transaction
        channel
            .send(&Response {
                correlation_id: ids[0],
                body: ResponseBody::Ok(Payload::OptionalConcept(None)),
            })
            .await
            .unwrap();
    });

    let tx = open_transaction(addr, Options::new()).await;
    for i in 0..withdrawn - 1 {
        let result = tx
            .execute_with_timeout(
                Operation::GetThing { iid: format!("0x{i}") },
                Duration::ZERO,
            )
            .await;
        assert_eq!(result.unwrap_err(), Error::Timeout);
    }
    // The final call races the transaction failure its own request triggers;
    // either way it errors
    let last = tx
        .execute_with_timeout(
            Operation::GetThing { iid: "0xlast".to_string() },
            Duration::ZERO,
        )
        .await;
    assert!(last.is_err());

    server.await.unwrap();
    while !tx.is_closed() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let after = tx
        .execute(Operation::ThingIsInferred { iid: "0x1".to_string() })
        .await;
    assert_eq!(after.unwrap_err(), Error::ChannelClosed);
}

#[tokio::test]
async fn insert_query_streams_inserted_concepts() {
    let (acceptor, addr) = get_acceptor().await;

    let server = tokio::spawn(async move {
        let mut channel = server_channel(&acceptor).await;
        let initial: Request = channel.receive().await.unwrap();
        let id = initial.correlation_id;
        match &initial.operation {
            Operation::QueryInsert { query, options } => {
                assert_eq!(query, "insert $x isa person;");
                assert_eq!(options.infer, Some(true));
                assert_eq!(options.explain, None);
            }
            op => panic!("unexpected operation {op:?}"),
        }

        channel
            .send(&Response {
                correlation_id: id,
                body: ResponseBody::Batch(vec![entity_record("0x1"), entity_record("0x2")]),
            })
            .await
            .unwrap();

        let request: Request = channel.receive().await.unwrap();
        assert!(matches!(request.operation, Operation::Continue));
        channel
            .send(&Response {
                correlation_id: id,
                body: ResponseBody::Done,
            })
            .await
            .unwrap();
    });

    let tx = open_transaction(addr, Options::new()).await;

    let stream = tx
        .query()
        .insert("insert $x isa person;", Options::new().infer(true))
        .await
        .unwrap();
    let inserted = stream.collect_all().await.unwrap();

    assert_eq!(
        inserted,
        vec![
            Concept::Entity { iid: "0x1".to_string() },
            Concept::Entity { iid: "0x2".to_string() },
        ]
    );
    server.await.unwrap();
}
