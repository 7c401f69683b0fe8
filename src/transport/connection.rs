//! A single client connection: one request line in, one response line out

use crate::error::DispatchError;
use relay_shared::codec::{encode_line, LineDecoder};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Accepted client connection
pub struct ClientConnection<S> {
    stream: S,
    decoder: LineDecoder,
    read_buf: Vec<u8>,
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted stream
    pub fn new(stream: S, max_line_bytes: usize) -> Self {
        Self {
            stream,
            decoder: LineDecoder::with_limit(max_line_bytes),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Read the request line
    /// Returns None if the peer closed without sending anything
    pub async fn read_line(&mut self) -> Result<Option<String>, DispatchError> {
        loop {
            if let Some(line) = self.decoder.decode_next()? {
                return Ok(Some(line));
            }

            match self.stream.read(&mut self.read_buf).await {
                Ok(0) => return Ok(self.decoder.finish()?),
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DispatchError::Read(e)),
            }
        }
    }

    /// Read the request line, giving up after `limit` if one is set
    pub async fn read_line_within(
        &mut self,
        limit: Option<Duration>,
    ) -> Result<Option<String>, DispatchError> {
        match limit {
            Some(limit) => timeout(limit, self.read_line())
                .await
                .map_err(|_| DispatchError::ReadTimeout(limit))?,
            None => self.read_line().await,
        }
    }

    /// Write one response line and flush
    pub async fn write_line(&mut self, text: &str) -> Result<(), DispatchError> {
        let encoded = encode_line(text);
        self.stream
            .write_all(&encoded)
            .await
            .map_err(DispatchError::Write)?;
        self.stream.flush().await.map_err(DispatchError::Write)
    }

    /// Shut down the write side and release the stream
    pub async fn close(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
