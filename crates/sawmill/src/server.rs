//! TCP server: accept loop, per-connection frame dispatch, streaming
//! replies.
//!
//! Each connection splits into a reader and a writer task joined by an
//! mpsc channel, so a long-lived watch or a large read never blocks other
//! requests on the same connection. Unary handlers run on their own tasks;
//! byte-stream write frames are handled inline because the protocol is
//! serial per write stream and frame order must be preserved.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sawcas::SharedStore;
use sawproto::{
    Frame, FrameCodec, FrameKind, Method, ReadRequest, Status, WatchRequest, WriteRequest,
};

use crate::broker::Broker;
use crate::config::SawmillConfig;
use crate::executor::Executor;
use crate::keys::Keyspace;
use crate::services::{
    ActionCacheService, ByteStreamService, CasService, ExecutionService, WatchService,
};

/// Everything the wire layer dispatches into.
pub struct AppState {
    pub cas: CasService,
    pub action_cache: ActionCacheService,
    pub bytestream: ByteStreamService,
    pub execution: ExecutionService,
    pub watch: WatchService,
    max_frame_len: usize,
}

impl AppState {
    /// Wire the services together over one store and one broker.
    pub fn new(config: &SawmillConfig, store: SharedStore, broker: Broker) -> Self {
        let keys = Keyspace::new(&config.key_prefix);
        let executor = Executor::new(
            store.clone(),
            keys.clone(),
            config.digest_function,
            config.exec_root(),
        );
        Self {
            cas: CasService::new(
                store.clone(),
                keys.clone(),
                config.digest_function,
                broker.clone(),
            ),
            action_cache: ActionCacheService::new(store.clone(), keys.clone()),
            bytestream: ByteStreamService::new(
                store.clone(),
                keys.clone(),
                config.staging_dir(),
                config.allow_overwrite,
            ),
            execution: ExecutionService::new(
                executor,
                store,
                keys,
                config.digest_function,
                broker.clone(),
            ),
            watch: WatchService::new(broker),
            max_frame_len: config.max_frame_len,
        }
    }
}

/// Accept connections until the listener fails or the task is dropped.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "client connected");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                debug!(%peer, error = %e, "connection closed");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<AppState>) -> anyhow::Result<()> {
    let framed = Framed::new(
        stream,
        FrameCodec::with_max_frame_len(state.max_frame_len),
    );
    let (mut sink, mut frames) = framed.split();

    // Replies funnel through one writer task; request handlers just queue.
    let (tx, mut rx) = mpsc::channel::<Frame>(64);
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(frame).await {
                debug!(error = %e, "write side closed");
                break;
            }
        }
    });

    while let Some(frame) = frames.next().await {
        let frame = frame?;
        match frame.kind {
            FrameKind::Heartbeat => {
                let _ = tx.send(Frame::heartbeat()).await;
            }
            FrameKind::Disconnect => break,
            FrameKind::Request => dispatch(&state, frame, &tx).await,
            other => {
                debug!(?other, "ignoring unexpected frame kind from client");
            }
        }
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}

async fn dispatch(state: &Arc<AppState>, frame: Frame, tx: &mpsc::Sender<Frame>) {
    let request_id = frame.request_id;
    let Some(method) = Method::parse(&frame.method) else {
        warn!(method = %frame.method, "unknown method");
        let status = Status::unimplemented(format!("unknown method: {}", frame.method));
        let _ = tx.send(Frame::error(request_id, &status)).await;
        return;
    };

    match method {
        // Stream-serial: write frames must be applied in arrival order.
        Method::Write => {
            let reply = handle_write(state, &frame).await;
            if let Some(reply) = reply {
                let _ = tx.send(reply).await;
            }
        }
        Method::Read => {
            let state = Arc::clone(state);
            let tx = tx.clone();
            tokio::spawn(async move { handle_read(&state, frame, tx).await });
        }
        Method::Watch => {
            let state = Arc::clone(state);
            let tx = tx.clone();
            tokio::spawn(async move { handle_watch(&state, frame, tx).await });
        }
        _ => {
            let state = Arc::clone(state);
            let tx = tx.clone();
            tokio::spawn(async move {
                let reply = handle_unary(&state, method, frame).await;
                let _ = tx.send(reply).await;
            });
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(frame: &Frame) -> Result<T, Status> {
    frame
        .payload()
        .map_err(|e| Status::invalid_argument(format!("decoding request body: {e}")))
}

fn reply<T: serde::Serialize>(request_id: Uuid, payload: &T) -> Frame {
    Frame::reply(request_id, payload).unwrap_or_else(|e| {
        Frame::error(
            request_id,
            &Status::internal(format!("encoding reply: {e}")),
        )
    })
}

async fn handle_unary(state: &AppState, method: Method, frame: Frame) -> Frame {
    let request_id = frame.request_id;
    let outcome: Result<Frame, Status> = async {
        match method {
            Method::Execute => {
                let operation = state.execution.execute(decode(&frame)?).await?;
                Ok(reply(request_id, &operation))
            }
            Method::GetActionResult => {
                let result = state.action_cache.get_action_result(decode(&frame)?).await?;
                Ok(reply(request_id, &result))
            }
            Method::UpdateActionResult => {
                let result = state
                    .action_cache
                    .update_action_result(decode(&frame)?)
                    .await?;
                Ok(reply(request_id, &result))
            }
            Method::FindMissingBlobs => {
                let response = state.cas.find_missing_blobs(decode(&frame)?).await?;
                Ok(reply(request_id, &response))
            }
            Method::BatchUpdateBlobs => {
                let response = state.cas.batch_update_blobs(decode(&frame)?).await?;
                Ok(reply(request_id, &response))
            }
            Method::GetTree => {
                let response = state.cas.get_tree(decode(&frame)?)?;
                Ok(reply(request_id, &response))
            }
            Method::QueryWriteStatus => {
                let response = state.bytestream.query_write_status(decode(&frame)?)?;
                Ok(reply(request_id, &response))
            }
            Method::Write | Method::Read | Method::Watch => {
                Err(Status::internal("streaming method routed as unary"))
            }
        }
    }
    .await;
    outcome.unwrap_or_else(|status| Frame::error(request_id, &status))
}

async fn handle_write(state: &AppState, frame: &Frame) -> Option<Frame> {
    let request_id = frame.request_id;
    let outcome: Result<Option<Frame>, Status> = async {
        let request: WriteRequest = decode(frame)?;
        let response = state.bytestream.write(request).await?;
        Ok(response.map(|r| reply(request_id, &r)))
    }
    .await;
    match outcome {
        Ok(maybe_reply) => maybe_reply,
        Err(status) => Some(Frame::error(request_id, &status)),
    }
}

async fn handle_read(state: &AppState, frame: Frame, tx: mpsc::Sender<Frame>) {
    let request_id = frame.request_id;
    let mut chunks = match async {
        let request: ReadRequest = decode(&frame)?;
        state.bytestream.read(request).await
    }
    .await
    {
        Ok(chunks) => chunks,
        Err(status) => {
            let _ = tx.send(Frame::error(request_id, &status)).await;
            return;
        }
    };

    loop {
        match chunks.next_chunk().await {
            Ok(Some(chunk)) => {
                let event = match Frame::event(request_id, &chunk) {
                    Ok(event) => event,
                    Err(e) => {
                        let status = Status::internal(format!("encoding chunk: {e}"));
                        let _ = tx.send(Frame::error(request_id, &status)).await;
                        return;
                    }
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                let _ = tx.send(Frame::reply_empty(request_id)).await;
                return;
            }
            Err(status) => {
                let _ = tx.send(Frame::error(request_id, &status)).await;
                return;
            }
        }
    }
}

async fn handle_watch(state: &AppState, frame: Frame, tx: mpsc::Sender<Frame>) {
    let request_id = frame.request_id;
    let mut stream = match decode::<WatchRequest>(&frame).and_then(|req| state.watch.watch(req)) {
        Ok(stream) => stream,
        Err(status) => {
            let _ = tx.send(Frame::error(request_id, &status)).await;
            return;
        }
    };

    info!("watch stream open");
    while let Some(batch) = stream.next_batch().await {
        let event = match Frame::event(request_id, &batch) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping undeliverable change batch");
                continue;
            }
        };
        if tx.send(event).await.is_err() {
            // Client went away; the subscription dies with this task.
            return;
        }
    }
}
