//! Newline-delimited framing over async byte streams
//!
//! The reader enforces a hard per-line limit while buffering, so an endless
//! line cannot grow memory without bound.

use crate::error::{Result, TransportError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

pub struct LineReader<R> {
    inner: BufReader<R>,
    max_line_bytes: usize,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            max_line_bytes,
            buf: Vec::with_capacity(1024),
        }
    }

    /// Next complete line without its terminator, `None` at end of stream
    ///
    /// A trailing unterminated line is returned before `None`.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        loop {
            let (found, used) = {
                let available = self.inner.fill_buf().await?;
                if available.is_empty() {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
                match available.iter().position(|b| *b == b'\n') {
                    Some(pos) => {
                        self.buf.extend_from_slice(&available[..pos]);
                        (true, pos + 1)
                    }
                    None => {
                        self.buf.extend_from_slice(available);
                        (false, available.len())
                    }
                }
            };
            self.inner.consume(used);

            if self.buf.len() > self.max_line_bytes {
                let size = self.buf.len();
                self.buf.clear();
                return Err(TransportError::MessageTooLarge {
                    size,
                    max: self.max_line_bytes,
                });
            }
            if found {
                break;
            }
        }

        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        let line = std::str::from_utf8(&self.buf)
            .map_err(|e| TransportError::protocol(format!("line is not valid UTF-8: {}", e)))?;
        Ok(Some(line.to_string()))
    }
}

pub struct LineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    /// Write one line, appending the terminator if missing, and flush
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            self.inner.write_all(b"\n").await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_lines_and_trailing_fragment() {
        let data: &[u8] = b"{\"a\":1}\r\n\n{\"b\":2}\npartial";
        let mut reader = LineReader::new(data, 64);
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("partial"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_line_rejected() {
        let long = vec![b'x'; 100];
        let mut reader = LineReader::new(&long[..], 10);
        let err = reader.next_line().await.unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { max: 10, .. }));
    }

    #[tokio::test]
    async fn test_writer_terminates_lines() {
        let mut out = Vec::new();
        {
            let mut writer = LineWriter::new(&mut out);
            writer.write_line("one").await.unwrap();
            writer.write_line("two\n").await.unwrap();
        }
        assert_eq!(out, b"one\ntwo\n");
    }
}
