//! Resumable writes, chunked reads, and write-status queries.

mod common;

use common::{harness, seed_blob};
use pretty_assertions::assert_eq;
use sawproto::{Code, QueryWriteStatusRequest, ReadRequest, WriteRequest};

fn write_frame(name: &str, offset: i64, data: &[u8], finish: bool) -> WriteRequest {
    WriteRequest {
        resource_name: name.to_string(),
        write_offset: offset,
        finish_write: finish,
        data: data.to_vec(),
    }
}

async fn read_all(h: &common::Harness, name: &str, offset: i64, limit: i64) -> Vec<u8> {
    let mut chunks = h
        .bytestream
        .read(ReadRequest {
            resource_name: name.to_string(),
            read_offset: offset,
            read_limit: limit,
        })
        .await
        .unwrap();
    let mut data = Vec::new();
    while let Some(chunk) = chunks.next_chunk().await.unwrap() {
        data.extend_from_slice(&chunk.data);
    }
    data
}

#[tokio::test]
async fn resumable_upload_across_reconnects() {
    let h = harness();
    let name = "uploads/u/blobs/h/10";

    // First connection commits five bytes and drops.
    let none = h
        .bytestream
        .write(write_frame(name, 0, b"hello", false))
        .await
        .unwrap();
    assert!(none.is_none());

    let status = h
        .bytestream
        .query_write_status(QueryWriteStatusRequest {
            resource_name: "blobs/h/10".into(),
        })
        .unwrap();
    assert_eq!(status.committed_size, 5);
    assert!(!status.complete);

    // Reconnect resumes at the committed offset and finishes.
    let response = h
        .bytestream
        .write(write_frame(name, 5, b"world", true))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.committed_size, 10);

    let status = h
        .bytestream
        .query_write_status(QueryWriteStatusRequest {
            resource_name: "blobs/h/10".into(),
        })
        .unwrap();
    assert_eq!(status.committed_size, 10);
    assert!(status.complete);

    assert_eq!(read_all(&h, "blobs/h/10", 0, 0).await, b"helloworld");
}

#[tokio::test]
async fn offset_mismatch_fails_without_advancing_state() {
    let h = harness();
    let name = "uploads/u/blobs/h2/12";

    h.bytestream
        .write(write_frame(name, 0, b"hello", false))
        .await
        .unwrap();

    let err = h
        .bytestream
        .write(write_frame(name, 7, b"world", false))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);

    let status = h
        .bytestream
        .query_write_status(QueryWriteStatusRequest {
            resource_name: "blobs/h2/12".into(),
        })
        .unwrap();
    assert_eq!(status.committed_size, 5);
    assert!(!status.complete);
}

#[tokio::test]
async fn overwrite_allowed_truncates() {
    let h = harness();
    let name = "uploads/u/blobs/h3/5";

    h.bytestream
        .write(write_frame(name, 0, b"first", true))
        .await
        .unwrap()
        .unwrap();

    // Same resource again from offset zero: the stream truncates.
    let response = h
        .bytestream
        .write(write_frame(name, 0, b"new", true))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.committed_size, 3);
    assert_eq!(read_all(&h, "blobs/h3/5", 0, 0).await, b"new");
}

#[tokio::test]
async fn overwrite_disallowed_is_invalid_argument() {
    let h = harness();
    let store = h.store.clone();
    let keys = h.keys.clone();
    let staging = tempfile::TempDir::new().unwrap();
    let bytestream = sawmill::services::ByteStreamService::new(
        store,
        keys,
        staging.path().to_path_buf(),
        false,
    );

    let name = "uploads/u/blobs/h4/6";
    bytestream
        .write(write_frame(name, 0, b"sealed", true))
        .await
        .unwrap()
        .unwrap();

    let err = bytestream
        .write(write_frame(name, 0, b"again", true))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn empty_data_frames_are_legal() {
    let h = harness();
    let name = "uploads/u/blobs/h5/4";

    h.bytestream
        .write(write_frame(name, 0, b"", false))
        .await
        .unwrap();
    h.bytestream
        .write(write_frame(name, 0, b"data", false))
        .await
        .unwrap();
    let response = h
        .bytestream
        .write(write_frame(name, 4, b"", true))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.committed_size, 4);
    assert_eq!(read_all(&h, "blobs/h5/4", 0, 0).await, b"data");
}

#[tokio::test]
async fn short_write_names_are_rejected() {
    let h = harness();
    for name in ["", "uploads", "uploads/u"] {
        let err = h
            .bytestream
            .write(write_frame(name, 0, b"x", false))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument, "name: {name:?}");
    }
}

#[tokio::test]
async fn query_of_unknown_resource_is_not_found() {
    let h = harness();
    let err = h
        .bytestream
        .query_write_status(QueryWriteStatusRequest {
            resource_name: "blobs/never-seen/1".into(),
        })
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn read_chunks_large_blobs() {
    let h = harness();
    let bytestream = sawmill::services::ByteStreamService::new(
        h.store.clone(),
        h.keys.clone(),
        h.staging_dir.path().to_path_buf(),
        true,
    )
    .with_chunk_size(8);

    let data = b"0123456789abcdefghij".to_vec();
    let digest = seed_blob(&h, &data).await;

    let mut chunks = bytestream
        .read(ReadRequest {
            resource_name: format!("blobs/{}/{}", digest.hash, data.len()),
            read_offset: 0,
            read_limit: 0,
        })
        .await
        .unwrap();

    let mut frames = Vec::new();
    while let Some(chunk) = chunks.next_chunk().await.unwrap() {
        frames.push(chunk.data);
    }
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].len(), 8);
    assert_eq!(frames.concat(), data);
}

#[tokio::test]
async fn read_honors_offset_and_limit() {
    let h = harness();
    let data = b"helloworld".to_vec();
    let digest = seed_blob(&h, &data).await;
    let name = format!("blobs/{}/{}", digest.hash, data.len());

    assert_eq!(read_all(&h, &name, 5, 0).await, b"world");
    assert_eq!(read_all(&h, &name, 0, 5).await, b"hello");
    assert_eq!(read_all(&h, &name, 2, 3).await, b"llo");
    // Offset past the end yields an empty stream, not an error.
    assert_eq!(read_all(&h, &name, 100, 0).await, b"");
}

#[tokio::test]
async fn read_validates_arguments() {
    let h = harness();

    let err = h
        .bytestream
        .read(ReadRequest {
            resource_name: String::new(),
            read_offset: 0,
            read_limit: 0,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = h
        .bytestream
        .read(ReadRequest {
            resource_name: "blobs/x/1".into(),
            read_offset: -1,
            read_limit: 0,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = h
        .bytestream
        .read(ReadRequest {
            resource_name: "blobs/x/1".into(),
            read_offset: 0,
            read_limit: -3,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn read_of_absent_blob_is_not_found() {
    let h = harness();
    let err = h
        .bytestream
        .read(ReadRequest {
            resource_name: "blobs/absent/9".into(),
            read_offset: 0,
            read_limit: 0,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn committed_size_matches_sum_of_frames() {
    let h = harness();
    let name = "uploads/u/blobs/sum/9";
    let frames: &[&[u8]] = &[b"abc", b"", b"defgh", b"i"];

    let mut offset = 0i64;
    let mut last = None;
    for (i, data) in frames.iter().enumerate() {
        let finish = i == frames.len() - 1;
        last = h
            .bytestream
            .write(write_frame(name, offset, data, finish))
            .await
            .unwrap();
        offset += data.len() as i64;
    }
    assert_eq!(last.unwrap().committed_size, 9);
}
