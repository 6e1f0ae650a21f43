use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use shardps_core::codec::{decode_exact, encode_to_vec, Reader};
use shardps_core::InitializerConfig;
use shardps_hash_table::SparseRowStore;
use shardps_ps::checkpoint;
use shardps_ps::pull::decode_row_entries;
use shardps_ps::{
    ConnectionConfig, DistMessage, ParamDecl, ParamServer, ParameterTable, PsError, PullRequest,
    RowLookupHandler, RowLookupRequest, ServerConfig, ServerHandle, Shard, ShardRegistry,
    TcpConnection, TcpConnections, TensorMap,
};
use shardps_tensor::{DenseTensor, Shape};
use tempfile::tempdir;

fn loopback() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

fn table(shard: Shard) -> ParameterTable {
    let mut rng = StdRng::seed_from_u64(11);
    let mut table = ParameterTable::new(shard);
    table
        .init_param(
            &mut rng,
            &[
                ParamDecl::dense("bias", Shape::vector(2), InitializerConfig::zeros()),
                ParamDecl::sparse("emb", 100, 3, InitializerConfig::ones()).unwrap(),
            ],
        )
        .unwrap();
    table
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start(config: ServerConfig, table: ParameterTable) -> ServerHandle {
    init_tracing();
    ParamServer::bind(config, table)
        .unwrap()
        .with_user_handler(Arc::new(RowLookupHandler))
        .spawn()
}

fn pull(conn: &mut TcpConnection, request: &PullRequest) -> TensorMap<'static> {
    let message = DistMessage::PullRequest {
        buf: Cow::Owned(encode_to_vec(request)),
    };
    match conn.rpc(&message).unwrap() {
        Some(DistMessage::PullResponse { buf }) => decode_exact(&buf).unwrap(),
        other => panic!("unexpected response: {other:?}"),
    }
}

fn push_and_pull_round_trip(lock_mode: bool) {
    let config = ServerConfig::builder()
        .listen(loopback())
        .lock_mode(lock_mode)
        .build()
        .unwrap();
    let server = start(config, table(Shard::non_shard()));
    let mut conn = TcpConnection::connect(server.local_addr(), ConnectionConfig::default()).unwrap();

    let mut request = PullRequest::new(true);
    request.add_dense("bias");
    request.add_sparse("emb", [1, 2]);
    let pulled = pull(&mut conn, &request);
    assert_eq!(pulled.dense("bias").unwrap().as_slice(), &[0.0, 0.0]);
    assert_eq!(pulled.sparse("emb").unwrap().find_row(2), Some(&[1.0; 3][..]));

    let mut delta = TensorMap::new();
    delta.insert("bias", DenseTensor::from_vec(Shape::vector(2), vec![0.5, -0.5]).unwrap());
    let mut rows = SparseRowStore::new(3);
    rows.assign(2, &[2.0, 3.0, 4.0]).unwrap();
    delta.insert("emb", rows);
    let push = DistMessage::PushNotify {
        buf: Cow::Owned(encode_to_vec(&delta)),
    };
    assert!(conn.rpc(&push).unwrap().is_none());

    // A session serves its messages in order, so the push is visible.
    let pulled = pull(&mut conn, &request);
    assert_eq!(pulled.dense("bias").unwrap().as_slice(), &[0.5, -0.5]);
    assert_eq!(
        pulled.sparse("emb").unwrap().find_row(2),
        Some(&[2.0, 3.0, 4.0][..])
    );
    assert_eq!(server.table().read().num_rows("emb"), Some(2));

    conn.write_message(&DistMessage::TerminationNotify).unwrap();
    server.join().unwrap();
}

#[test]
fn test_push_then_pull() {
    push_and_pull_round_trip(false);
}

#[test]
fn test_push_then_pull_lock_mode() {
    push_and_pull_round_trip(true);
}

#[test]
fn test_predict_pull_over_the_wire_skips_missing_rows() {
    let config = ServerConfig::builder().listen(loopback()).build().unwrap();
    let server = start(config, table(Shard::non_shard()));
    let mut conn = TcpConnection::connect(server.local_addr(), ConnectionConfig::default()).unwrap();

    let mut request = PullRequest::new(false);
    request.add_sparse("emb", [5, 6]);
    assert!(pull(&mut conn, &request).is_empty());
    assert_eq!(server.table().read().num_rows("emb"), Some(0));
    server.shutdown().unwrap();
}

#[test]
fn test_user_request_row_lookup() {
    let config = ServerConfig::builder().listen(loopback()).build().unwrap();
    let server = start(config, table(Shard::non_shard()));
    let mut conn = TcpConnection::connect(server.local_addr(), ConnectionConfig::default()).unwrap();

    let mut request = PullRequest::new(true);
    request.add_sparse("emb", [9]);
    pull(&mut conn, &request);

    let lookup = RowLookupRequest {
        keys: vec![("emb".to_string(), 9), ("emb".to_string(), 10)],
    };
    let message = DistMessage::UserRequest {
        buf: Cow::Owned(encode_to_vec(&lookup)),
    };
    match conn.rpc(&message).unwrap() {
        Some(DistMessage::UserResponse { buf }) => {
            let mut r = Reader::new(&buf);
            let rows = decode_row_entries(&mut r).unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].values.as_deref(), Some(&[1.0; 3][..]));
            assert!(rows[1].is_absent());
        }
        other => panic!("unexpected response: {other:?}"),
    }
    server.shutdown().unwrap();
}

#[test]
fn test_model_save_writes_a_loadable_checkpoint() {
    let dir = tempdir().unwrap();
    let config = ServerConfig::builder()
        .listen(loopback())
        .model_dir(dir.path())
        .build()
        .unwrap();
    let server = start(config, table(Shard::non_shard()));
    let mut conn = TcpConnection::connect(server.local_addr(), ConnectionConfig::default()).unwrap();

    let mut request = PullRequest::new(true);
    request.add_sparse("emb", [1, 2, 3]);
    pull(&mut conn, &request);

    let save = DistMessage::ModelSaveRequest {
        epoch: 1,
        timestamp: "20240101".to_string(),
        feature_kv_protocol_version: 0,
    };
    assert!(matches!(
        conn.rpc(&save).unwrap(),
        Some(DistMessage::ModelSaveResponse)
    ));
    server.shutdown().unwrap();

    let restored = checkpoint::load(&dir.path().join("20240101"), 0, &ShardRegistry::default()).unwrap();
    assert_eq!(restored.num_rows("emb"), Some(3));
}

#[test]
fn test_pool_rpc_across_shards() {
    let registry = ShardRegistry::default();
    let servers: Vec<ServerHandle> = (0..2)
        .map(|id| {
            let config = ServerConfig::builder()
                .listen(loopback())
                .shard(id, 2)
                .build()
                .unwrap();
            start(config, table(Shard::new(id, 2, "default", &registry).unwrap()))
        })
        .collect();
    let endpoints: Vec<SocketAddr> = servers.iter().map(ServerHandle::local_addr).collect();
    let mut pool = TcpConnections::connect(&endpoints, &ConnectionConfig::default()).unwrap();
    assert_eq!(pool.len(), 2);

    let router = ParameterTable::new(Shard::new(0, 2, "default", &registry).unwrap());
    let mut request = PullRequest::new(true);
    request.add_sparse("emb", 0..20);
    let requests: Vec<Option<DistMessage<'_>>> = router
        .split_pull_request(&request, 2)
        .iter()
        .map(|part| {
            Some(DistMessage::PullRequest {
                buf: Cow::Owned(encode_to_vec(part)),
            })
        })
        .collect();

    let mut rows = 0;
    for reply in pool.rpc(&requests).unwrap() {
        match reply {
            Some(DistMessage::PullResponse { buf }) => {
                let map: TensorMap<'static> = decode_exact(&buf).unwrap();
                rows += map.sparse("emb").map_or(0, |rows| rows.len());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
    assert_eq!(rows, 20);

    assert!(matches!(
        pool.rpc(&requests[..1]),
        Err(PsError::ConfigValidation { .. })
    ));
    drop(pool);
    for server in servers {
        server.shutdown().unwrap();
    }
}

#[test]
fn test_seeded_servers_initialize_rows_alike() {
    let rows_from = |seed: u64| {
        let mut table = ParameterTable::new(Shard::non_shard());
        let decl = ParamDecl::sparse("emb", 100, 4, InitializerConfig::uniform(-1.0, 1.0)).unwrap();
        table.init_param(&mut StdRng::seed_from_u64(0), &[decl]).unwrap();
        let config = ServerConfig::builder().listen(loopback()).seed(seed).build().unwrap();
        let server = start(config, table);
        let mut conn = TcpConnection::connect(server.local_addr(), ConnectionConfig::default()).unwrap();

        // One id per pull keeps the draw order independent of set iteration.
        let rows: Vec<Vec<f32>> = [1, 2, 3]
            .into_iter()
            .map(|id| {
                let mut request = PullRequest::new(true);
                request.add_sparse("emb", [id]);
                let pulled = pull(&mut conn, &request);
                pulled.sparse("emb").unwrap().find_row(id).unwrap().to_vec()
            })
            .collect();
        drop(conn);
        server.shutdown().unwrap();
        rows
    };

    let first = rows_from(21);
    assert_eq!(first, rows_from(21));
    assert_ne!(first, rows_from(22));
}

#[test]
fn test_connect_retry_waits_between_attempts() {
    let addr = {
        let listener = TcpListener::bind(loopback()).unwrap();
        listener.local_addr().unwrap()
    };
    let backoff = Duration::from_millis(200);
    let config = ConnectionConfig::default().with_retry(3, backoff);

    // Three attempts sleep twice, never after the last one.
    let started = Instant::now();
    let err = TcpConnection::connect_retry(addr, config).unwrap_err();
    let elapsed = started.elapsed();
    assert!(elapsed >= backoff * 2, "returned after {elapsed:?}");
    assert!(elapsed < backoff * 3, "returned after {elapsed:?}");
    assert!(matches!(err, PsError::ConnectionFailed { .. }));
}
