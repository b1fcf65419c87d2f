//! Loopback coverage of the wire surface: a real listener, the typed
//! client, and both unary and streaming methods.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use sawcas::{DigestFunction, MemoryStore, SharedStore};
use sawmill::{server, AppState, Broker, SawmillConfig};
use sawproto::{
    BatchUpdateBlobsRequest, Client, ClientError, FindMissingBlobsRequest,
    QueryWriteStatusRequest, UpdateBlobRequest,
};

async fn spawn_server() -> std::net::SocketAddr {
    let bucket = tempfile::TempDir::new().unwrap();
    let mut config = SawmillConfig::with_bucket(bucket.path());
    config.exec_root = Some(bucket.path().join("work"));
    std::fs::create_dir_all(bucket.path().join("work")).unwrap();

    let store: SharedStore = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::new(&config, store, Broker::new()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _bucket = bucket; // keep the staging directory alive
        let _ = server::serve(listener, state).await;
    });
    addr
}

#[tokio::test]
async fn find_missing_blobs_over_the_wire() {
    let addr = spawn_server().await;
    let mut client = Client::connect(addr).await.unwrap();

    let data = b"wire blob".to_vec();
    let digest = DigestFunction::Sha1.digest_of(&data);

    let response = client
        .find_missing_blobs(&FindMissingBlobsRequest {
            blob_digests: vec![digest.clone()],
        })
        .await
        .unwrap();
    assert_eq!(response.missing_blob_digests, vec![digest.clone()]);

    client
        .batch_update_blobs(&BatchUpdateBlobsRequest {
            requests: vec![UpdateBlobRequest {
                content_digest: Some(digest.clone()),
                data,
            }],
        })
        .await
        .unwrap();

    let response = client
        .find_missing_blobs(&FindMissingBlobsRequest {
            blob_digests: vec![digest],
        })
        .await
        .unwrap();
    assert!(response.missing_blob_digests.is_empty());
}

#[tokio::test]
async fn chunked_write_then_read_roundtrip() {
    let addr = spawn_server().await;
    let mut client = Client::connect(addr).await.unwrap();

    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let digest = DigestFunction::Sha1.digest_of(&data);
    let upload_name = format!("uploads/session-1/blobs/{}/{}", digest.hash, data.len());
    let blob_name = format!("blobs/{}/{}", digest.hash, data.len());

    let response = client
        .write_blob(&upload_name, &data, 16 * 1024)
        .await
        .unwrap();
    assert_eq!(response.committed_size, data.len() as i64);

    let status = client
        .query_write_status(&QueryWriteStatusRequest {
            resource_name: blob_name.clone(),
        })
        .await
        .unwrap();
    assert!(status.complete);
    assert_eq!(status.committed_size, data.len() as i64);

    let fetched = client.read_blob(&blob_name, 0, 0).await.unwrap();
    assert_eq!(fetched.as_ref(), data.as_slice());
}

#[tokio::test]
async fn rpc_errors_carry_canonical_codes() {
    let addr = spawn_server().await;
    let mut client = Client::connect(addr).await.unwrap();

    let err = client
        .query_write_status(&QueryWriteStatusRequest {
            resource_name: "blobs/unknown/1".into(),
        })
        .await
        .unwrap_err();
    match err {
        ClientError::Rpc(status) => assert_eq!(status.code(), sawproto::Code::NotFound),
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn watch_delivers_ingest_events_over_the_wire() {
    let addr = spawn_server().await;

    // Watch on its own connection; uploads on another.
    let mut watcher = Client::connect(addr).await.unwrap();
    let data = b"watched over the wire".to_vec();
    let digest = DigestFunction::Sha1.digest_of(&data);
    let watch_id = watcher.start_watch(&digest.hash).await.unwrap();

    let mut uploader = Client::connect(addr).await.unwrap();
    uploader
        .batch_update_blobs(&BatchUpdateBlobsRequest {
            requests: vec![UpdateBlobRequest {
                content_digest: Some(digest.clone()),
                data,
            }],
        })
        .await
        .unwrap();

    let batch = tokio::time::timeout(Duration::from_secs(10), watcher.next_batch(watch_id))
        .await
        .expect("timed out waiting for change batch")
        .unwrap();
    assert_eq!(batch.changes.len(), 1);
    assert_eq!(batch.changes[0].element, digest.hash);
    assert!(batch.changes[0].is_exists());
}

#[tokio::test]
async fn unknown_method_is_unimplemented() {
    use futures::{SinkExt, StreamExt};
    use sawproto::{Frame, FrameCodec, FrameKind};
    use tokio_util::codec::Framed;

    let addr = spawn_server().await;
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec::new());

    let mut frame = Frame::request(sawproto::Method::GetTree, &sawproto::GetTreeRequest::default())
        .unwrap();
    frame.method = "cas.compact".to_string();
    framed.send(frame).await.unwrap();

    let reply = framed.next().await.unwrap().unwrap();
    assert_eq!(reply.kind, FrameKind::Error);
    let status: sawproto::Status = reply.payload().unwrap();
    assert_eq!(status.code(), sawproto::Code::Unimplemented);
}

#[tokio::test]
async fn write_offset_mismatch_surfaces_failed_precondition() {
    let addr = spawn_server().await;

    use futures::{SinkExt, StreamExt};
    use sawproto::{Frame, FrameCodec, FrameKind, Method, WriteRequest};
    use tokio_util::codec::Framed;
    use uuid::Uuid;

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec::new());
    let request_id = Uuid::new_v4();

    let first = WriteRequest {
        resource_name: "uploads/u/blobs/wire-h/10".into(),
        write_offset: 0,
        finish_write: false,
        data: b"hello".to_vec(),
    };
    framed
        .send(Frame::request_with_id(Method::Write, request_id, &first).unwrap())
        .await
        .unwrap();

    let skewed = WriteRequest {
        resource_name: "uploads/u/blobs/wire-h/10".into(),
        write_offset: 7,
        finish_write: false,
        data: b"world".to_vec(),
    };
    framed
        .send(Frame::request_with_id(Method::Write, request_id, &skewed).unwrap())
        .await
        .unwrap();

    let reply = framed.next().await.unwrap().unwrap();
    assert_eq!(reply.kind, FrameKind::Error);
    let status: sawproto::Status = reply.payload().unwrap();
    assert_eq!(status.code(), sawproto::Code::FailedPrecondition);
}
