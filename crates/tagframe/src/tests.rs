use crate::*;

// ============================================================================
//  HEADER LAYOUT
// ============================================================================

#[test]
fn test_header_uses_native_four_byte_integers() {
    let tag = encode_tag(20_700);
    let length = encode_length(3);

    assert_eq!(tag, 20_700i32.to_ne_bytes());
    assert_eq!(length, 3u32.to_ne_bytes());
    assert_eq!(decode_tag(tag), 20_700);
    assert_eq!(decode_length(length), 3);
}

#[test]
fn test_encode_frame_layout() -> Result<()> {
    let bytes = encode_frame(500, b"abc")?;

    assert_eq!(bytes.len(), HEADER_SIZE + 3);
    assert_eq!(&bytes[..4], &500i32.to_ne_bytes());
    assert_eq!(&bytes[4..8], &3u32.to_ne_bytes());
    assert_eq!(&bytes[8..], b"abc");
    Ok(())
}

#[test]
fn test_signal_is_a_bare_tag() {
    let mut enc = Encoder::new();
    enc.signal(tags::KEEPALIVE);
    enc.signal(tags::CLOSE);

    let bytes = enc.into_bytes();
    assert_eq!(bytes.len(), 2 * TAG_SIZE);

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.tag().unwrap(), tags::KEEPALIVE);
    assert_eq!(dec.tag().unwrap(), tags::CLOSE);
    assert_eq!(dec.remaining(), 0);
}

// ============================================================================
//  DECODER
// ============================================================================

#[test]
fn test_decode_mixed_stream() -> Result<()> {
    let mut enc = Encoder::new();
    enc.frame(tags::CMD_TIMEOUT_SOCKET, &int_payload(20))?;
    enc.signal(tags::KEEPALIVE);
    enc.frame(tags::CMD_DRIVER_VERSION, b"")?;
    let bytes = enc.into_bytes();

    let mut dec = Decoder::new(&bytes);

    let config = dec.frame()?;
    assert_eq!(config.tag, tags::CMD_TIMEOUT_SOCKET);
    assert_eq!(read_int(config.payload)?, 20);

    assert_eq!(dec.peek_tag()?, tags::KEEPALIVE);
    assert_eq!(dec.tag()?, tags::KEEPALIVE);

    let version = dec.frame()?;
    assert_eq!(version.to_owned(), Frame::new(tags::CMD_DRIVER_VERSION, Vec::new()));
    assert_eq!(dec.remaining(), 0);
    Ok(())
}

#[test]
fn test_partial_frame_leaves_cursor_untouched() -> Result<()> {
    let bytes = encode_frame(42, b"hello")?;
    let short = &bytes[..bytes.len() - 1];

    let mut dec = Decoder::new(short);
    match dec.frame() {
        Err(Error::UnexpectedEnd { needed, available }) => {
            assert_eq!(needed, 5);
            assert_eq!(available, 4);
        }
        other => panic!("Expected UnexpectedEnd, got {:?}", other),
    }
    assert_eq!(dec.remaining(), short.len());
    Ok(())
}

#[test]
fn test_truncated_header() {
    let mut dec = Decoder::new(&[1, 2, 3]);
    assert!(matches!(dec.tag(), Err(Error::UnexpectedEnd { needed: 4, available: 3 })));
}

// ============================================================================
//  INTEGER PAYLOADS
// ============================================================================

#[test]
fn test_int_payload() -> Result<()> {
    let frame = Frame::new(tags::ANS_TIMEOUT_SOCKET, int_payload(-12));
    assert_eq!(frame.len(), 4);
    assert_eq!(frame.int()?, -12);
    Ok(())
}

#[test]
fn test_int_payload_rejects_wrong_size() {
    assert_eq!(read_int(b"abc"), Err(Error::InvalidIntPayload(3)));
    assert_eq!(read_int(&[0u8; 8]), Err(Error::InvalidIntPayload(8)));
}

#[test]
fn test_frame_to_bytes_matches_encoder() -> Result<()> {
    let frame = Frame::new(7, vec![9u8; 300]);
    let mut enc = Encoder::new();
    enc.frame(7, &[9u8; 300])?;
    assert_eq!(frame.to_bytes()?, enc.into_bytes());
    Ok(())
}
