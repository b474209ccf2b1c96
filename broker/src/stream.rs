// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_tungstenite::{tungstenite::protocol::Message, WebSocketStream};

use crate::error::Error;

/// Duplex byte stream to a client or a peer, independent of transport.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<TcpStream>>),
    Wss(Box<WebSocketStream<TlsStream<TcpStream>>>),
    /// Reads nothing and discards writes; used to exercise session/trie logic
    /// in tests without a live socket.
    #[cfg(test)]
    Null,
}

impl Stream {
    #[cfg(test)]
    #[must_use]
    pub const fn test_null() -> Self {
        Self::Null
    }

    /// # Errors
    ///
    /// Returns error if the underlying socket errors.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            Self::Tcp(tcp) => Ok(tcp.read_buf(buf).await?),
            Self::Tls(tls) => Ok(tls.read_buf(buf).await?),
            Self::Ws(ws) => Self::read_ws_frame(ws.as_mut(), buf).await,
            Self::Wss(wss) => Self::read_ws_frame(wss.as_mut(), buf).await,
            #[cfg(test)]
            Self::Null => Ok(0),
        }
    }

    async fn read_ws_frame<S>(
        ws: &mut WebSocketStream<S>,
        buf: &mut Vec<u8>,
    ) -> Result<usize, Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        match ws.next().await {
            Some(msg) => {
                let data = msg?.into_data();
                let n = data.len();
                buf.extend_from_slice(&data);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    /// Shuts the transport down so a peer blocked in `read_buf` unblocks
    /// immediately instead of waiting for the remote end. Best-effort: a
    /// shutdown error means the socket is already gone, which is fine here.
    pub async fn shutdown(&mut self) {
        match self {
            Self::Tcp(tcp) => {
                let _ = tcp.shutdown().await;
            }
            Self::Tls(tls) => {
                let _ = tls.shutdown().await;
            }
            Self::Ws(ws) => {
                let _ = ws.close(None).await;
            }
            Self::Wss(wss) => {
                let _ = wss.close(None).await;
            }
            #[cfg(test)]
            Self::Null => {}
        }
    }

    /// # Errors
    ///
    /// Returns error if the underlying socket errors.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        match self {
            Self::Tcp(tcp) => Ok(tcp.write(buf).await?),
            Self::Tls(tls) => Ok(tls.write(buf).await?),
            Self::Ws(ws) => {
                ws.send(Message::binary(buf.to_vec())).await?;
                Ok(buf.len())
            }
            Self::Wss(wss) => {
                wss.send(Message::binary(buf.to_vec())).await?;
                Ok(buf.len())
            }
            #[cfg(test)]
            Self::Null => Ok(buf.len()),
        }
    }
}
