//! File upload/download workflows
//!
//! Both directions ride on a fresh [`LineSession`] per operation: the board
//! disconnects whatever came before, reconnects, logs in, and drives the
//! device with generated snippets. Upload integrity is verified end-to-end
//! on the device itself, which re-reads the written file and compares its
//! sha256 digest against the one computed here before transfer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::board::Board;
use crate::hooks::{PasswordResolver, ProgressSink};
use crate::snippets;
use crate::{CoreError, Result};

/// Delay after sending the upload snippet before payload bytes follow,
/// giving the device time to compile and reach its stdin read loop.
const UPLOAD_SETTLE: Duration = Duration::from_secs(1);

/// Pacing delay between payload chunks. Writing the full payload at once
/// overruns the transport buffering on constrained devices.
const UPLOAD_CHUNK_DELAY: Duration = Duration::from_millis(100);

/// How long to wait for the device's verification verdict after the last
/// payload chunk. Re-reading and hashing a large file takes a while.
const VERDICT_WAIT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the verdict line.
const VERDICT_POLL: Duration = Duration::from_millis(100);

/// Inactivity window for the download query; reading and base64-encoding
/// a file on the device is slow.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_millis(1000);

/// Terminal state of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    InProgress,
    Success,
    /// The device re-read the file and its digest did not match.
    HashMismatch,
    /// The device printed neither verdict line within the wait window;
    /// the payload went out but integrity is unconfirmed.
    Unverified,
    Failed(String),
}

/// Bookkeeping for one upload or download.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub remote_path: String,
    pub total: usize,
    pub transferred: usize,
    pub expected_hash: String,
    pub status: TransferStatus,
}

impl TransferJob {
    pub fn new(remote_path: impl Into<String>, total: usize, expected_hash: String) -> Self {
        Self {
            remote_path: remote_path.into(),
            total,
            transferred: 0,
            expected_hash,
            status: TransferStatus::InProgress,
        }
    }

    /// Completion percentage, clamped to 0-100. An empty payload is
    /// immediately complete rather than a division by zero.
    pub fn progress(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (100 * self.transferred / self.total).min(100) as u8
    }
}

/// Hex sha256 digest of a payload.
pub fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Upload and download procedures for one board.
pub struct FileTransfer<'a> {
    board: &'a Board,
}

impl<'a> FileTransfer<'a> {
    pub fn new(board: &'a Board) -> Self {
        Self { board }
    }

    /// Upload `payload` to `remote_path` on the device.
    ///
    /// Hashes the payload, injects the verification snippet, then paces the
    /// bytes out in small chunks. Progress goes to `sink` after each chunk;
    /// the device's own status prints (`Uploaded: n of i`, the final
    /// verdict) stream through the session observer as they arrive.
    ///
    /// Any error aborts the job without retry; re-invoking starts from a
    /// fresh connection, so the device-side open/truncate supersedes any
    /// partial state from the previous attempt.
    pub async fn upload(
        &self,
        resolver: &dyn PasswordResolver,
        sink: Arc<dyn ProgressSink>,
        remote_path: &str,
        payload: &[u8],
    ) -> Result<TransferJob> {
        let session = self.board.connect().await?;
        session.login(resolver).await?;

        let observer_sink = sink.clone();
        session
            .set_observer(move |line: &str| observer_sink.status(line))
            .await;

        let expected_hash = sha256_hex(payload);
        tracing::info!(
            "uploading {} ({} bytes, sha256 {})",
            remote_path,
            payload.len(),
            expected_hash
        );
        let mut job = TransferJob::new(remote_path, payload.len(), expected_hash.clone());

        let snippet = snippets::uploader(remote_path, payload.len(), &expected_hash);
        session.write(&snippets::paste_block(&snippet)).await?;
        tokio::time::sleep(UPLOAD_SETTLE).await;

        sink.progress(job.progress());
        for chunk in payload.chunks(snippets::UPLOAD_CHUNK) {
            let wrote = session.write(chunk).await?;
            if wrote == 0 {
                job.status = TransferStatus::Failed("connection lost".into());
                return Err(CoreError::UploadFailed("connection lost".into()));
            }
            job.transferred += wrote;
            sink.progress(job.progress());
            tokio::time::sleep(UPLOAD_CHUNK_DELAY).await;
        }

        // Wait (bounded) for the device's verification verdict
        let deadline = tokio::time::Instant::now() + VERDICT_WAIT;
        loop {
            let lines = session.buffered_lines().await;
            if lines
                .iter()
                .any(|l| l.contains(snippets::UPLOAD_FAILED_MARKER))
            {
                tracing::warn!("device reported hash mismatch for {}", remote_path);
                job.status = TransferStatus::HashMismatch;
            } else if lines
                .iter()
                .any(|l| l.contains(snippets::UPLOAD_SUCCESS_MARKER))
            {
                job.status = TransferStatus::Success;
            } else if tokio::time::Instant::now() >= deadline {
                tracing::warn!("no verification verdict from device for {}", remote_path);
                job.status = TransferStatus::Unverified;
            } else {
                tokio::time::sleep(VERDICT_POLL).await;
                continue;
            }
            sink.status(lines.last().map(String::as_str).unwrap_or_default());
            break;
        }
        Ok(job)
    }

    /// Download `remote_path` from the device, returning its bytes.
    ///
    /// The reply is the echoed snippet followed by base64 chunks and the
    /// next REPL prompt; everything between the snippet's marker line and
    /// the prompt is decoded and concatenated. An empty or undetectable
    /// region is a failure, not retried.
    pub async fn download(
        &self,
        resolver: &dyn PasswordResolver,
        remote_path: &str,
    ) -> Result<Vec<u8>> {
        let session = self.board.connect().await?;
        session.login(resolver).await?;
        tracing::info!("downloading {}", remote_path);

        let snippet = snippets::downloader(remote_path);
        let reply = session
            .query(
                &snippets::paste_block(&snippet),
                true,
                Some(DOWNLOAD_TIMEOUT),
            )
            .await?;

        let mut start = 0;
        let mut end = None;
        for (i, line) in reply.iter().enumerate() {
            if line.contains(snippets::DOWNLOAD_MARKER) {
                start = i + 1;
            } else if line.starts_with(snippets::REPL_PROMPT) {
                end = Some(i);
            }
        }
        let end = end.unwrap_or_else(|| reply.len().saturating_sub(1));
        let chunks: &[String] = if start < end { &reply[start..end] } else { &[] };

        if chunks.is_empty() {
            return Err(CoreError::DownloadFailed(format!(
                "no output region in reply: {:?}",
                reply
            )));
        }

        let mut data = Vec::new();
        for chunk in chunks {
            let trimmed = chunk.trim();
            if trimmed.is_empty() {
                continue;
            }
            let decoded = BASE64.decode(trimmed).map_err(|e| {
                CoreError::DownloadFailed(format!("bad base64 chunk {:?}: {}", trimmed, e))
            })?;
            data.extend_from_slice(&decoded);
        }
        tracing::info!("downloaded {} bytes from {}", data.len(), remote_path);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoPassword;
    use crate::transport::{MockHandle, MockTransport};
    use tokio::task::yield_now;

    struct Recorder {
        percents: std::sync::Mutex<Vec<u8>>,
        statuses: std::sync::Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                percents: std::sync::Mutex::new(Vec::new()),
                statuses: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    impl ProgressSink for Recorder {
        fn progress(&self, percent: u8) {
            self.percents.lock().unwrap().push(percent);
        }
        fn status(&self, text: &str) {
            self.statuses.lock().unwrap().push(text.to_string());
        }
    }

    fn mock_board() -> (Arc<Board>, MockHandle) {
        let (transport, handle) = MockTransport::new();
        (Arc::new(Board::new(Box::new(transport))), handle)
    }

    async fn settle() {
        for _ in 0..20 {
            yield_now().await;
        }
    }

    #[test]
    fn test_progress_monotone_and_complete() {
        let mut job = TransferJob::new("main.py", 150, String::new());
        let mut last = 0;
        while job.transferred < job.total {
            job.transferred = (job.transferred + 64).min(job.total);
            let pct = job.progress();
            assert!(pct >= last);
            last = pct;
        }
        assert_eq!(job.progress(), 100);
    }

    #[test]
    fn test_zero_length_progress_is_immediately_complete() {
        let job = TransferJob::new("empty.py", 0, String::new());
        assert_eq!(job.progress(), 100);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_paces_payload_and_reports_progress() {
        let (board, mut handle) = mock_board();
        let sink = Recorder::new();
        let payload: Vec<u8> = (0..150u8).collect();

        let task = tokio::spawn({
            let board = board.clone();
            let sink = sink.clone();
            async move {
                FileTransfer::new(&board)
                    .upload(&NoPassword, sink, "main.py", &payload)
                    .await
            }
        });
        settle().await;
        handle.push(b"Upload success!\r\n").await;

        let job = task.await.unwrap().unwrap();
        assert_eq!(job.status, TransferStatus::Success);
        assert_eq!(job.transferred, 150);

        let percents = sink.percents.lock().unwrap().clone();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*percents.last().unwrap(), 100);

        // Snippet in paste framing, then the payload itself
        let written = handle.drain_writes();
        assert!(written.windows(2).any(|w| w == b"\n\x05"));
        let tail = &written[written.len() - 150..];
        let expected: Vec<u8> = (0..150u8).collect();
        assert_eq!(tail, &expected[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_zero_length_sends_no_chunks() {
        let (board, mut handle) = mock_board();
        let sink = Recorder::new();

        let task = tokio::spawn({
            let board = board.clone();
            let sink = sink.clone();
            async move {
                FileTransfer::new(&board)
                    .upload(&NoPassword, sink, "empty.py", &[])
                    .await
            }
        });
        settle().await;
        handle.push(b"Upload success!\r\n").await;

        let job = task.await.unwrap().unwrap();
        assert_eq!(job.transferred, 0);
        assert_eq!(job.status, TransferStatus::Success);

        let percents = sink.percents.lock().unwrap().clone();
        assert_eq!(percents, vec![100]);

        // Only the snippet went over the wire
        let written = handle.drain_writes();
        assert!(written.ends_with(b"\x04"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_surfaces_device_hash_mismatch() {
        let (board, handle) = mock_board();
        let sink = Recorder::new();

        let task = tokio::spawn({
            let board = board.clone();
            let sink = sink.clone();
            async move {
                FileTransfer::new(&board)
                    .upload(&NoPassword, sink, "main.py", b"data")
                    .await
            }
        });
        settle().await;
        handle.push(b"Upload failed (hash mismatch)!\r\n").await;

        let job = task.await.unwrap().unwrap();
        assert_eq!(job.status, TransferStatus::HashMismatch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_without_verdict_reports_unverified() {
        let (board, _handle) = mock_board();
        let sink = Recorder::new();

        // Device never prints a verdict line
        let task = tokio::spawn({
            let board = board.clone();
            let sink = sink.clone();
            async move {
                FileTransfer::new(&board)
                    .upload(&NoPassword, sink, "main.py", b"data")
                    .await
            }
        });

        let job = task.await.unwrap().unwrap();
        assert_eq!(job.status, TransferStatus::Unverified);
        assert_eq!(job.transferred, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_connection_loss_fails() {
        let (board, _handle) = mock_board();
        let sink = Recorder::new();

        let task = tokio::spawn({
            let board = board.clone();
            let sink = sink.clone();
            async move {
                FileTransfer::new(&board)
                    .upload(&NoPassword, sink, "main.py", b"data")
                    .await
            }
        });
        settle().await;
        // Past login and the snippet write, before the first payload chunk
        tokio::time::advance(Duration::from_millis(400)).await;
        settle().await;
        board.disconnect().await;

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::UploadFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_observer_streams_device_status() {
        let (board, handle) = mock_board();
        let sink = Recorder::new();

        let task = tokio::spawn({
            let board = board.clone();
            let sink = sink.clone();
            async move {
                FileTransfer::new(&board)
                    .upload(&NoPassword, sink, "main.py", b"data")
                    .await
            }
        });
        settle().await;
        // Get past the login grace so the observer is installed
        tokio::time::advance(Duration::from_millis(400)).await;
        settle().await;
        handle.push(b"Uploaded: 4 of 4\r\nUpload success!\r\n").await;

        task.await.unwrap().unwrap();
        let statuses = sink.statuses.lock().unwrap().clone();
        assert!(statuses.iter().any(|s| s == "Uploaded: 4 of 4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_decodes_marked_region() {
        let (board, handle) = mock_board();

        let task = tokio::spawn({
            let board = board.clone();
            async move {
                FileTransfer::new(&board)
                    .download(&NoPassword, "boot.py")
                    .await
            }
        });
        settle().await;
        // Get past the login grace so the query is in flight before the
        // reply lands
        tokio::time::advance(Duration::from_millis(400)).await;
        settle().await;
        handle
            .push(b"__downloader__()\r\naGVsbG8g\r\nd29ybGQ=\r\n>>> \r\n")
            .await;

        let data = task.await.unwrap().unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_empty_region_fails() {
        let (board, handle) = mock_board();

        let task = tokio::spawn({
            let board = board.clone();
            async move {
                FileTransfer::new(&board)
                    .download(&NoPassword, "missing.py")
                    .await
            }
        });
        settle().await;
        // Get past the login grace so the query is in flight before the
        // reply lands
        tokio::time::advance(Duration::from_millis(400)).await;
        settle().await;
        handle.push(b"__downloader__()\r\n>>> \r\n").await;

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::DownloadFailed(_)));
    }
}
