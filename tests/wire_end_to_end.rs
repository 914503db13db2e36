use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use bytes::BytesMut;
use snackdb::client::SnackClient;
use snackdb::core::config::Config;
use snackdb::core::error::{ErrorKind, Result};
use snackdb::core::registry::{Registry, TableInfo};
use snackdb::core::types::{ColumnType, Id, LogicalType, Row, Value};
use snackdb::query::ast::{Aggregate, Expression, Filter};
use snackdb::server::frame::FrameCodec;
use snackdb::server::protocol::OpKind;
use snackdb::server::tcp::{ShutdownHandle, SnackServer};

struct Running {
    addr: SocketAddr,
    stop: ShutdownHandle,
    task: JoinHandle<Result<()>>,
}

fn local_config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".to_string(),
        worker_threads: 2,
        queue_capacity: 64,
        ..Config::default()
    }
}

async fn start(lenient_decode: bool) -> Running {
    start_with(Config { lenient_decode, ..local_config() }).await
}

async fn start_with(config: Config) -> Running {
    let server = SnackServer::bind(&config, Arc::new(Registry::default())).await.unwrap();
    Running {
        addr: server.local_addr().unwrap(),
        stop: server.shutdown_handle(),
        task: tokio::spawn(server.run()),
    }
}

fn tickets() -> TableInfo {
    TableInfo::new("support", "tickets")
}

async fn client_with_tickets(addr: SocketAddr) -> SnackClient {
    let mut client = SnackClient::connect(addr).await.unwrap();
    client.create_database("support").await.unwrap();
    client
        .create_table(&tickets(), vec![
            ColumnType::key("id", LogicalType::Int),
            ColumnType::column("status", LogicalType::Str),
        ])
        .await
        .unwrap();
    client
}

fn ticket(id: i64, status: &str) -> Row {
    Row::new(Id::from(id)).with("id", id).with("status", status)
}

fn open() -> Filter {
    Filter::new().with(Expression::eq("status", "open"))
}

#[tokio::test]
async fn open_tickets_get_closed() {
    let server = start(false).await;
    let mut client = client_with_tickets(server.addr).await;

    for (id, status) in [(1, "open"), (2, "open"), (3, "closed")] {
        assert_eq!(client.save(&tickets(), &ticket(id, status)).await.unwrap(), Id::from(id));
    }

    let rows = client.query(&tickets(), Some(&open())).await.unwrap();
    let ids: Vec<Id> = rows.iter().map(|r| r.id().clone()).collect();
    assert_eq!(ids, vec![Id::from(1), Id::from(2)]);

    let patch = BTreeMap::from([("status".to_string(), Value::from("closed"))]);
    let updated = client.update(&tickets(), Some(&open()), patch).await.unwrap();
    assert_eq!(updated, vec![Id::from(1), Id::from(2)]);

    assert!(client.query(&tickets(), Some(&open())).await.unwrap().is_empty());
    let all = client.query(&tickets(), None).await.unwrap();
    assert!(all.iter().all(|r| r.get("status") == Some(&Value::from("closed"))));
    assert_eq!(all.len(), 3);

    // The same filter value was encoded once and then served from the cache
    assert!(client.filter_cache_stats().hits >= 2);

    server.stop.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn batches_deletes_and_aggregates() {
    let server = start(false).await;
    let mut client = client_with_tickets(server.addr).await;

    let outcomes = client
        .save_batch(&tickets(), &[
            ticket(1, "open"),
            Row::new(Id::from(2)).with("status", "missing key column"),
            ticket(3, "open"),
        ])
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_ok());
    assert_eq!(outcomes[1].as_ref().err().map(|e| e.kind), Some(ErrorKind::Validation));
    assert!(outcomes[2].is_ok());

    let count = client.aggregate(&tickets(), &open().project(Aggregate::Count, "*")).await.unwrap();
    assert_eq!(count, Value::Int(2));

    let deleted = client.delete(&tickets(), Some(&open())).await.unwrap();
    assert_eq!(deleted, vec![Id::from(1), Id::from(3)]);
    assert!(client.query(&tickets(), None).await.unwrap().is_empty());

    server.stop.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_targets_fail_closed_and_keep_the_connection() {
    let server = start(false).await;
    let mut client = SnackClient::connect(server.addr).await.unwrap();

    let err = client.query(&TableInfo::new("nope", "nothing"), None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let err = client
        .create_table(&TableInfo::new("nope", "t"), vec![ColumnType::key("id", LogicalType::Int)])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let err = client.save(&tickets(), &ticket(1, "open")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    client.ping().await.unwrap();

    server.stop.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn corrupt_filter_is_an_error_by_default() {
    let server = start(false).await;
    let mut client = client_with_tickets(server.addr).await;
    client.save(&tickets(), &ticket(1, "open")).await.unwrap();

    let response = client.request(&tickets(), OpKind::Delete, vec![0xde, 0xad]).await.unwrap();
    assert_eq!(response.error.map(|e| e.kind), Some(ErrorKind::Decode));

    assert_eq!(client.query(&tickets(), None).await.unwrap().len(), 1);

    server.stop.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn lenient_mode_treats_corrupt_filter_as_match_nothing() {
    let server = start(true).await;
    let mut client = client_with_tickets(server.addr).await;
    client.save(&tickets(), &ticket(1, "open")).await.unwrap();

    let response = client.request(&tickets(), OpKind::Delete, vec![0xde, 0xad]).await.unwrap();
    assert!(response.error.is_none());
    let deleted: Vec<Id> = bincode::deserialize(&response.payload).unwrap();
    assert!(deleted.is_empty());

    // Corrupt row payloads are never substituted
    let response = client.request(&tickets(), OpKind::Save, vec![0xde, 0xad]).await.unwrap();
    assert_eq!(response.error.map(|e| e.kind), Some(ErrorKind::Decode));

    assert_eq!(client.query(&tickets(), None).await.unwrap().len(), 1);

    server.stop.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn oversized_result_is_refused_and_the_connection_kept() {
    let server = start_with(Config { max_frame_len: 4096, ..local_config() }).await;
    let mut client = client_with_tickets(server.addr).await;

    let status = "x".repeat(100);
    for id in 0..100 {
        client.save(&tickets(), &ticket(id, &status)).await.unwrap();
    }

    let everything = Filter::new().with(Expression::ge("id", 0));
    let err = client.query(&tickets(), Some(&everything)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TooLarge);

    client.ping().await.unwrap();
    let few = Filter::new().with(Expression::lt("id", 3));
    assert_eq!(client.query(&tickets(), Some(&few)).await.unwrap().len(), 3);

    let report = client.stats().await.unwrap();
    assert_eq!(report.server.requests_error, 1);

    server.stop.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_envelope_closes_the_connection() {
    let server = start(false).await;

    let mut raw = TcpStream::connect(server.addr).await.unwrap();
    let mut frame = BytesMut::new();
    FrameCodec::new(1024).encode(&[1, 2, 3], &mut frame).unwrap();
    raw.write_all(&frame).await.unwrap();

    let mut buf = [0u8; 16];
    let closed = matches!(raw.read(&mut buf).await, Ok(0) | Err(_));
    assert!(closed);

    // Other connections are unaffected
    let mut client = SnackClient::connect(server.addr).await.unwrap();
    client.ping().await.unwrap();

    server.stop.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stats_count_requests() {
    let server = start(false).await;
    let mut client = client_with_tickets(server.addr).await;
    client.save(&tickets(), &ticket(1, "open")).await.unwrap();

    let report = client.stats().await.unwrap();
    assert!(report.server.requests_total >= 3);
    assert_eq!(report.server.connections_active, 1);
    assert!(report.queue.completed >= 3);
    assert_eq!(report.databases, vec!["support".to_string()]);

    server.stop.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_idle_clients() {
    let server = start(false).await;
    let mut client = SnackClient::connect(server.addr).await.unwrap();
    client.ping().await.unwrap();

    server.stop.shutdown();
    server.task.await.unwrap().unwrap();

    assert!(client.ping().await.is_err());
}
