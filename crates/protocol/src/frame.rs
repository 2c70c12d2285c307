//! Length-prefixed JSON framing.
//!
//! Every message is a 4-byte big-endian length followed by that many bytes of
//! JSON. Frames larger than [`MAX_MESSAGE_SIZE`] are refused on both the
//! sending and the receiving side.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::TicketProtocolError;
use crate::protocol::MAX_MESSAGE_SIZE;

/// Serialize `message` and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), TicketProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(message)
        .map_err(|e| TicketProtocolError::Serialization(e.to_string()))?;

    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(TicketProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    // Bounded by MAX_MESSAGE_SIZE above
    let len_bytes = (bytes.len() as u32).to_be_bytes();
    writer.write_all(&len_bytes).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before a new
/// frame began. A stream that ends inside a frame is `ConnectionClosed`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, TicketProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let message_len = u32::from_be_bytes(len_bytes) as usize;
    if message_len > MAX_MESSAGE_SIZE {
        return Err(TicketProtocolError::MessageTooLarge {
            size: message_len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buffer = vec![0u8; message_len];
    match reader.read_exact(&mut buffer).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TicketProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }

    let message = serde_json::from_slice(&buffer)
        .map_err(|e| TicketProtocolError::InvalidMessage(e.to_string()))?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Method, TicketRequest};

    #[tokio::test]
    async fn test_frame_round_trip_and_clean_eof() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let request = TicketRequest::new("r1", Method::Get { name: "a/b".into() });

        write_frame(&mut client, &request).await.unwrap();
        write_frame(&mut client, &request).await.unwrap();
        drop(client);

        let first: Option<TicketRequest> = read_frame(&mut server).await.unwrap();
        let second: Option<TicketRequest> = read_frame(&mut server).await.unwrap();
        let end: Option<TicketRequest> = read_frame(&mut server).await.unwrap();

        assert_eq!(first.as_ref(), Some(&request));
        assert_eq!(second, Some(request));
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let len = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
        client.write_all(&len).await.unwrap();

        let result: Result<Option<TicketRequest>, _> = read_frame(&mut server).await;
        assert!(matches!(
            result,
            Err(TicketProtocolError::MessageTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_connection_closed() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&100u32.to_be_bytes()).await.unwrap();
        client.write_all(b"{\"ver").await.unwrap();
        drop(client);

        let result: Result<Option<TicketRequest>, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(TicketProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_garbage_frame_is_invalid_message() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&3u32.to_be_bytes()).await.unwrap();
        client.write_all(b"???").await.unwrap();

        let result: Result<Option<TicketRequest>, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(TicketProtocolError::InvalidMessage(_))));
    }
}
