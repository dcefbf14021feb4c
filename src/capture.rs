use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Appended to a stream that hit its byte cap or was cut off before EOF
pub const TRUNCATION_MARKER: &str = "\n[... output truncated ...]";

/// Text read from one child stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub text: String,
    pub truncated: bool,
}

#[derive(Debug, Default)]
struct BufferState {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Bytes read so far from one stream. The reader task and the sandbox share
/// it, so output survives a reader that is abandoned at the capture deadline.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<BufferState>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Everything captured so far. `cut_short` marks a stream whose reader
    /// stopped before EOF.
    pub fn snapshot(&self, cut_short: bool) -> CapturedOutput {
        let state = self.lock();
        let truncated = state.truncated || cut_short;
        let mut text = String::from_utf8_lossy(&state.bytes).into_owned();
        if truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        CapturedOutput { text, truncated }
    }
}

/// Read `reader` to EOF into `sink`, keeping at most `max_bytes`. Input past
/// the cap is drained and discarded so the child never blocks on a full pipe.
pub async fn read_bounded<R: AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
    sink: CaptureBuffer,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }

        let full = {
            let mut state = sink.lock();
            let remaining = max_bytes.saturating_sub(state.bytes.len());
            if n > remaining {
                state.bytes.extend_from_slice(&chunk[..remaining]);
                state.truncated = true;
                true
            } else {
                state.bytes.extend_from_slice(&chunk[..n]);
                false
            }
        };

        if full {
            tracing::warn!(max_bytes, "output exceeded limit, truncating");
            while reader.read(&mut chunk).await? > 0 {}
            return Ok(());
        }
    }
}

/// Shorten `text` to its last `max_chars` characters for quoting back to
/// the model. Tracebacks put the useful part at the end.
pub fn tail_excerpt(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skip = count - max_chars;
    format!("[...]{}", text.chars().skip(skip).collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn capture(data: &[u8], max_bytes: usize) -> CapturedOutput {
        let buffer = CaptureBuffer::new();
        read_bounded(data, max_bytes, buffer.clone()).await.unwrap();
        buffer.snapshot(false)
    }

    #[tokio::test]
    async fn test_under_limit() {
        let out = capture(b"hello", 16).await;
        assert_eq!(out.text, "hello");
        assert!(!out.truncated);
    }

    #[tokio::test]
    async fn test_exact_limit_is_not_truncated() {
        let out = capture(b"12345", 5).await;
        assert_eq!(out.text, "12345");
        assert!(!out.truncated);
    }

    #[tokio::test]
    async fn test_over_limit_gets_marker() {
        let data = vec![b'x'; 20_000];
        let out = capture(&data, 10).await;
        assert!(out.truncated);
        assert_eq!(out.text, format!("{}{}", "x".repeat(10), TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_abandoned_reader_keeps_partial_output() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let buffer = CaptureBuffer::new();
        let task = tokio::spawn(read_bounded(reader, 1024, buffer.clone()));

        tokio::io::AsyncWriteExt::write_all(&mut writer, b"partial progress\n")
            .await
            .unwrap();
        // writer stays open, so the reader never sees EOF
        let waited = tokio::time::timeout(Duration::from_millis(200), async {
            while buffer.snapshot(false).text.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok());
        assert!(!task.is_finished());
        task.abort();

        let out = buffer.snapshot(true);
        assert!(out.truncated);
        assert_eq!(out.text, format!("partial progress\n{TRUNCATION_MARKER}"));
        drop(writer);
    }

    #[test]
    fn test_tail_excerpt() {
        assert_eq!(tail_excerpt("short", 10), "short");
        assert_eq!(tail_excerpt("abcdefghij", 3), "[...]hij");
    }
}
