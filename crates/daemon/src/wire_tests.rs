// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::TempDir;

#[tokio::test]
async fn message_round_trip() {
    let request = Request::Ping;
    let encoded = encode(&request).unwrap();

    let mut wire = Vec::new();
    write_message(&mut wire, &encoded).await.unwrap();

    let mut reader = wire.as_slice();
    let bytes = read_message(&mut reader).await.unwrap();
    let decoded: Request = decode(&bytes).unwrap();
    assert_eq!(decoded, request);
}

#[tokio::test]
async fn length_prefix_is_big_endian() {
    let mut wire = Vec::new();
    write_message(&mut wire, b"abcd").await.unwrap();
    assert_eq!(&wire[..4], &[0, 0, 0, 4]);
    assert_eq!(&wire[4..], b"abcd");
}

#[tokio::test]
async fn oversized_length_rejected() {
    let mut wire = Vec::new();
    wire.extend_from_slice(&(MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes());
    let mut reader = wire.as_slice();
    assert!(matches!(
        read_message(&mut reader).await,
        Err(ProtocolError::MessageTooLarge { .. })
    ));
}

#[tokio::test]
async fn truncated_stream_is_connection_closed() {
    let mut reader: &[u8] = &[0, 0];
    assert!(matches!(
        read_message(&mut reader).await,
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn file_stream_round_trip() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src.bin");
    let payload = vec![42u8; 2 * FILE_CHUNK_SIZE + 123];
    std::fs::write(&src, &payload).unwrap();

    let mut wire = Vec::new();
    let sent = write_file_stream(&mut wire, &src).await.unwrap();
    assert_eq!(sent, payload.len() as u64);

    let dst = dir.path().join("dst.bin");
    let mut reader = wire.as_slice();
    let received = read_file_stream(&mut reader, &dst).await.unwrap();
    assert_eq!(received, payload.len() as u64);
    assert_eq!(std::fs::read(&dst).unwrap(), payload);
}

#[tokio::test]
async fn empty_file_stream_is_just_the_terminator() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src.bin");
    std::fs::write(&src, b"").unwrap();

    let mut wire = Vec::new();
    write_file_stream(&mut wire, &src).await.unwrap();
    // one empty frame
    assert_eq!(wire, vec![0, 0, 0, 0]);
}
