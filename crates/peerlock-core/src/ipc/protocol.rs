//! Message framing and the acknowledgement token.
//!
//! Defines the wire format between a client launch and the server instance:
//! a 4-byte big-endian length prefix followed by that many UTF-8 bytes, then
//! a three-byte `ack` back from the server.
//!
//! ```text
//! client -> server   [u32 BE: len][UTF-8 text of len]
//! server -> client   "ack"
//! ```

use crate::config::PeerConfig;
use crate::{PeerError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Encode `message` as a complete frame.
pub fn encode_frame(message: &str) -> Result<Vec<u8>> {
    let payload = message.as_bytes();
    let len = u32::try_from(payload.len()).map_err(|_| PeerError::Protocol {
        message: format!("message of {} bytes does not fit a u32 length", payload.len()),
    })?;

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode a received payload as UTF-8 text.
pub fn decode_message(payload: Vec<u8>) -> Result<String> {
    String::from_utf8(payload).map_err(|e| PeerError::Protocol {
        message: format!("message is not valid UTF-8: {}", e),
    })
}

/// Write a length-prefixed frame to an async writer.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &str) -> Result<()> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed frame from an async reader.
///
/// Each individual read of the prefix is bounded by `header_wait` and each
/// read of the payload by `stall`. The payload buffer grows as bytes arrive
/// rather than trusting the prefix for one large allocation.
///
/// Returns `None` on clean EOF before any byte of the prefix.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    header_wait: Duration,
    stall: Duration,
) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = timeout(header_wait, reader.read(&mut len_buf[filled..]))
            .await
            .map_err(|_| PeerError::Timeout(header_wait, "waiting for a length prefix"))??;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(PeerError::Protocol {
                message: format!("connection closed after {} prefix bytes", filled),
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    let chunk_len = len.min(PeerConfig::READ_CHUNK_SIZE);
    let mut payload = Vec::with_capacity(chunk_len);
    let mut chunk = vec![0u8; chunk_len];

    while payload.len() < len {
        let want = (len - payload.len()).min(chunk.len());
        let n = timeout(stall, reader.read(&mut chunk[..want]))
            .await
            .map_err(|_| PeerError::Timeout(stall, "reading a message payload"))??;
        if n == 0 {
            return Err(PeerError::Protocol {
                message: format!(
                    "connection closed after {} of {} payload bytes",
                    payload.len(),
                    len
                ),
            });
        }
        payload.extend_from_slice(&chunk[..n]);
    }

    Ok(Some(payload))
}

/// Write the acknowledgement token and flush it.
pub async fn write_ack<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(PeerConfig::ACK_TOKEN).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly the acknowledgement token.
///
/// Anything other than the three expected bytes, including a short read
/// before EOF, is an `AckMismatch`.
pub async fn read_ack<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    let mut got = Vec::with_capacity(PeerConfig::ACK_TOKEN.len());
    let mut buf = [0u8; 3];
    while got.len() < buf.len() {
        let n = reader.read(&mut buf[got.len()..]).await?;
        if n == 0 {
            return Err(PeerError::AckMismatch(got));
        }
        got.extend_from_slice(&buf[got.len()..got.len() + n]);
    }

    if got.as_slice() != PeerConfig::ACK_TOKEN.as_slice() {
        return Err(PeerError::AckMismatch(got));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(200);

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame("hello").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        assert_eq!(&frame[4..], b"hello");
    }

    #[tokio::test]
    async fn test_multibyte_text_survives_framing() {
        let message = "grüße, 世界 🚀";
        let mut buf = Vec::new();
        write_frame(&mut buf, message).await.unwrap();
        assert_eq!(
            u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize,
            message.len()
        );

        let mut cursor = std::io::Cursor::new(buf);
        let payload = read_frame(&mut cursor, WAIT, WAIT).await.unwrap().unwrap();
        assert_eq!(payload, message.as_bytes());
        assert_eq!(decode_message(payload).unwrap(), message);
    }

    #[tokio::test]
    async fn test_empty_message_frame() {
        let mut cursor = std::io::Cursor::new(encode_frame("").unwrap());
        let payload = read_frame(&mut cursor, WAIT, WAIT).await.unwrap().unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor, WAIT, WAIT).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_truncated_payload_is_rejected() {
        let mut buf = 10u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"short");

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor, WAIT, WAIT).await.unwrap_err();
        assert!(matches!(err, PeerError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_truncated_prefix_is_rejected() {
        let mut cursor = std::io::Cursor::new(vec![0u8, 0]);
        let err = read_frame(&mut cursor, WAIT, WAIT).await.unwrap_err();
        assert!(matches!(err, PeerError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_stalled_payload_times_out() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&8u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();

        let err = read_frame(&mut server, WAIT, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::Timeout(..)));
        drop(client);
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        assert!(decode_message(vec![0xff, 0xfe]).is_err());
    }

    #[tokio::test]
    async fn test_ack_roundtrip_and_mismatch() {
        let mut buf = Vec::new();
        write_ack(&mut buf).await.unwrap();
        assert_eq!(buf, b"ack");
        read_ack(&mut std::io::Cursor::new(buf)).await.unwrap();

        let err = read_ack(&mut std::io::Cursor::new(b"nak".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::AckMismatch(ref got) if got == b"nak"));

        let err = read_ack(&mut std::io::Cursor::new(b"ac".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::AckMismatch(_)));
    }
}
