//! Length-prefixed JSON framing: a big-endian `u32` byte count followed by a
//! single serialized message. The cap protects both sides from a corrupt or
//! hostile peer allocating unbounded buffers.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds maximum of {MAX_FRAME_BYTES}")]
    TooLarge(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on a clean EOF before the length
/// prefix, which is how peers signal they are done.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientOp;
    use crate::RequestEnvelope;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let req = RequestEnvelope {
            request_id: 42,
            op: ClientOp::Ping,
        };
        write_frame(&mut client, &req).await.expect("write");
        let got: RequestEnvelope = read_frame(&mut server)
            .await
            .expect("read")
            .expect("not eof");
        assert_eq!(got.request_id, 42);
        assert!(matches!(got.op, ClientOp::Ping));
    }

    #[tokio::test]
    async fn eof_before_prefix_is_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let got: Option<RequestEnvelope> = read_frame(&mut server).await.expect("read");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn oversized_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = (MAX_FRAME_BYTES as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut client, &len)
            .await
            .expect("write prefix");
        let err = read_frame::<_, RequestEnvelope>(&mut server)
            .await
            .expect_err("must reject");
        assert!(matches!(err, FrameError::TooLarge(_)));
    }
}
