//! Length-prefixed frame codec over TCP
//!
//! Frames are a 4-byte big-endian length followed by a JSON record. The
//! codec functions work over any async byte stream so the node listener can
//! read the connection envelope before upgrading a socket to a full
//! [`FramedTcpStream`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::{Stream, StreamError, StreamMessage};

/// Upper bound on a single frame. Fragments and compute messages are small;
/// anything near this size is a protocol violation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W, T>(io: &mut W, value: &T) -> Result<(), StreamError>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(StreamError::FrameTooLarge(payload.len()));
    }
    io.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    io.write_all(&payload).await?;
    io.flush().await?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
pub async fn read_frame<R, T>(io: &mut R) -> Result<T, StreamError>
where
    R: AsyncRead + Unpin + Send,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    io.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(StreamError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    io.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// A compute stream over a TCP socket.
///
/// The socket's two halves sit behind independent mutexes: sends serialize
/// with sends and recvs with recvs, while a send and a recv interleave
/// freely. `close` takes both halves, which shuts the socket down.
pub struct FramedTcpStream {
    send_half: Mutex<Option<OwnedWriteHalf>>,
    recv_half: Mutex<Option<OwnedReadHalf>>,
}

impl FramedTcpStream {
    pub fn new(socket: TcpStream) -> Self {
        let (read_half, write_half) = socket.into_split();
        Self {
            send_half: Mutex::new(Some(write_half)),
            recv_half: Mutex::new(Some(read_half)),
        }
    }
}

#[async_trait]
impl Stream for FramedTcpStream {
    async fn send(&self, message: &StreamMessage) -> Result<(), StreamError> {
        let mut guard = self.send_half.lock().await;
        let half = guard.as_mut().ok_or(StreamError::Closed)?;
        write_frame(half, message).await
    }

    async fn recv(&self) -> Result<StreamMessage, StreamError> {
        let mut guard = self.recv_half.lock().await;
        let half = guard.as_mut().ok_or(StreamError::Closed)?;
        read_frame(half).await
    }

    async fn close(&self) -> Result<(), StreamError> {
        // Taking both halves drops the socket; in-flight sends and recvs
        // finish first because they hold the same locks.
        let mut send_guard = self.send_half.lock().await;
        let mut recv_guard = self.recv_half.lock().await;
        send_guard.take();
        recv_guard.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dial = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (accepted, _) = listener.accept().await.unwrap();
        (dial.await.unwrap(), accepted)
    }

    #[tokio::test]
    async fn test_frame_roundtrip_over_tcp() {
        let (client, server) = tcp_pair().await;
        let client = FramedTcpStream::new(client);
        let server = FramedTcpStream::new(server);

        let message = StreamMessage::data(b"hello".to_vec());
        client.send(&message).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (client, _server) = tcp_pair().await;
        let client = FramedTcpStream::new(client);
        client.close().await.unwrap();
        let err = client.send(&StreamMessage::data(vec![1])).await.unwrap_err();
        assert_eq!(err, StreamError::Closed);
    }

    #[tokio::test]
    async fn test_recv_fails_when_peer_closes() {
        let (client, server) = tcp_pair().await;
        let client = FramedTcpStream::new(client);
        let server = FramedTcpStream::new(server);
        client.close().await.unwrap();
        assert!(matches!(server.recv().await, Err(StreamError::Io(_))));
    }

    #[tokio::test]
    async fn test_concurrent_send_and_recv_interleave() {
        let (client, server) = tcp_pair().await;
        let client = Arc::new(FramedTcpStream::new(client));
        let server = Arc::new(FramedTcpStream::new(server));

        // Both sides send while both sides receive; neither direction blocks
        // the other.
        let client_send = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                for i in 0..16u8 {
                    client.send(&StreamMessage::data(vec![i])).await.unwrap();
                }
            })
        };
        let server_send = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                for i in 0..16u8 {
                    server.send(&StreamMessage::data(vec![i | 0x80])).await.unwrap();
                }
            })
        };

        for _ in 0..16 {
            assert!(server.recv().await.unwrap().data[0] < 0x80);
            assert!(client.recv().await.unwrap().data[0] >= 0x80);
        }
        client_send.await.unwrap();
        server_send.await.unwrap();
    }
}
