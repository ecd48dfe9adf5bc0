//! Length-prefixed bincode frames.
//!
//! Every frame is a 4-byte big-endian length followed by a bincode body.

use paxos_common::RpcError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub seq: u64,
    pub method: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub seq: u64,
    pub outcome: Result<Vec<u8>, RpcError>,
}

pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(frame)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(RpcError::Codec(format!("frame of {} bytes exceeds limit", body.len())));
    }

    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the peer closed the stream cleanly
/// between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, RpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(RpcError::Codec(format!("frame of {} bytes exceeds limit", len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(bincode::deserialize(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_share_one_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let first = RequestFrame { seq: 1, method: "AcceptorRole.Prepare".into(), body: vec![1, 2, 3] };
        let second = RequestFrame { seq: 2, method: "AcceptorRole.Accept".into(), body: vec![] };
        write_frame(&mut client, &first).await.unwrap();
        write_frame(&mut client, &second).await.unwrap();
        drop(client);

        let got: Option<RequestFrame> = read_frame(&mut server).await.unwrap();
        assert_eq!(got, Some(first));
        let got: Option<RequestFrame> = read_frame(&mut server).await.unwrap();
        assert_eq!(got, Some(second));
        let got: Option<RequestFrame> = read_frame(&mut server).await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32((MAX_FRAME_LEN + 1) as u32).await.unwrap();

        let err = read_frame::<_, ReplyFrame>(&mut server).await.unwrap_err();
        assert!(matches!(err, RpcError::Codec(_)));
    }

    #[tokio::test]
    async fn test_truncated_body_is_connection_closed() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(10).await.unwrap();
        client.write_all(&[0u8; 4]).await.unwrap();
        drop(client);

        let err = read_frame::<_, ReplyFrame>(&mut server).await.unwrap_err();
        assert_eq!(err, RpcError::ConnectionClosed);
    }
}
