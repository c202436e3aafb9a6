//! Unit tests for the newline wire codec.
//!
//! Covers framing across partial reads, several lines in one buffer,
//! CRLF stripping, and the line-length limit.

use bytes::BytesMut;
use tether::protocol::codec::{WireCodec, MAX_LINE_BYTES};
use tether::AppError;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn decodes_line_split_across_reads() {
    let mut codec = WireCodec::new();
    let mut buf = BytesMut::from("PI");

    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b"NG\n");
    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING"));
}

#[test]
fn decodes_multiple_lines_from_one_buffer() {
    let mut codec = WireCodec::new();
    let mut buf = BytesMut::from("CLIENT_CONNECTED\nPING\n");

    assert_eq!(
        codec.decode(&mut buf).unwrap().as_deref(),
        Some("CLIENT_CONNECTED")
    );
    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING"));
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn strips_carriage_return() {
    let mut codec = WireCodec::new();
    let mut buf = BytesMut::from("show_ips\r\n");
    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("show_ips"));
}

#[test]
fn unterminated_tail_is_returned_at_eof() {
    let mut codec = WireCodec::new();
    let mut buf = BytesMut::from("PING");
    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("PING"));
}

#[test]
fn oversized_line_is_a_protocol_error() {
    let mut codec = WireCodec::new();
    let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_BYTES + 1].as_slice());

    let err = codec.decode(&mut buf).unwrap_err();
    assert!(
        matches!(err, AppError::Protocol(ref msg) if msg.contains("line too long")),
        "unexpected error: {err}"
    );
}

#[test]
fn encode_appends_newline() {
    let mut codec = WireCodec::new();
    let mut buf = BytesMut::new();
    codec.encode("PONG".to_owned(), &mut buf).unwrap();
    assert_eq!(&buf[..], b"PONG\n");
}
