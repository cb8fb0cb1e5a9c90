//! Newline-delimited JSON over a byte stream.
//!
//! Used between `buddy --transport host` and a `buddyd` child process, and
//! by `buddyd` itself on stdin/stdout.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::warn;

use crate::bus::channel::Channel;
use crate::bus::message::{decode_bytes, Inbound};
use crate::error::BusError;

pub struct StreamChannel<R, W> {
    reader: Mutex<BufReader<R>>,
    writer: Mutex<W>,
}

impl<R, W> StreamChannel<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
        }
    }

    /// Next non-blank line without its terminator. `None` on end of stream
    /// or a read failure; undecodable bytes are still returned.
    async fn read_line(&self) -> Option<Vec<u8>> {
        let mut reader = self.reader.lock().await;
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => return None,
                Ok(_) => {
                    while line.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
                        line.pop();
                    }
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Some(line);
                }
                Err(e) => {
                    warn!(error = %e, "bus stream read failed");
                    return None;
                }
            }
        }
    }
}

impl StreamChannel<tokio::io::Stdin, tokio::io::Stdout> {
    /// The executor side of a host process.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl StreamChannel<ChildStdout, ChildStdin> {
    /// The caller side, talking to a child spawned with piped stdin/stdout.
    pub fn from_child(child: &mut Child) -> Result<Self, BusError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BusError::Transport("child stdout is not piped".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BusError::Transport("child stdin is not piped".into()))?;
        Ok(Self::new(stdout, stdin))
    }
}

#[async_trait]
impl<R, W> Channel for StreamChannel<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send_frame(&self, frame: String) -> Result<(), BusError> {
        if frame.contains('\n') {
            return Err(BusError::Malformed("frame contains a newline".into()));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn receive_frame(&self) -> Option<String> {
        let line = self.read_line().await?;
        Some(match String::from_utf8(line) {
            Ok(frame) => frame,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    async fn receive(&self) -> Option<Inbound> {
        let line = self.read_line().await?;
        Some(decode_bytes(&line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (left, right) = tokio::io::duplex(256);
        let (left_r, left_w) = tokio::io::split(left);
        let (right_r, right_w) = tokio::io::split(right);
        let a = StreamChannel::new(left_r, left_w);
        let b = StreamChannel::new(right_r, right_w);

        a.send_frame(r#"{"n":1}"#.into()).await.unwrap();
        a.send_frame(r#"{"n":2}"#.into()).await.unwrap();
        assert_eq!(b.receive_frame().await.as_deref(), Some(r#"{"n":1}"#));
        assert_eq!(b.receive_frame().await.as_deref(), Some(r#"{"n":2}"#));

        b.send_frame("back".into()).await.unwrap();
        assert_eq!(a.receive_frame().await.as_deref(), Some("back"));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped_and_eof_ends() {
        let input: &[u8] = b"\n  \nframe\n";
        let channel = StreamChannel::new(input, tokio::io::sink());
        assert_eq!(channel.receive_frame().await.as_deref(), Some("frame"));
        assert_eq!(channel.receive_frame().await, None);
    }

    #[tokio::test]
    async fn non_utf8_lines_do_not_end_the_stream() {
        let input: &[u8] = b"\xff\xfe garbage\r\n{\"type\":\"ack\",\"id\":\"a\"}\n";
        let channel = StreamChannel::new(input, tokio::io::sink());
        assert!(matches!(
            channel.receive().await,
            Some(Inbound::Malformed { id: None, .. })
        ));
        assert!(matches!(
            channel.receive().await,
            Some(Inbound::Message(crate::bus::BusMessage::Ack { .. }))
        ));
        assert!(channel.receive().await.is_none());
    }

    #[tokio::test]
    async fn multi_line_frames_are_rejected() {
        let channel = StreamChannel::new(tokio::io::empty(), tokio::io::sink());
        assert!(matches!(
            channel.send_frame("a\nb".into()).await,
            Err(BusError::Malformed(_))
        ));
    }
}
