//! Live stream pipeline.
//!
//! A producer task reads the live source in fixed-size chunks into a bounded
//! channel; the HTTP response drains the other end. The channel depth is the
//! only buffering between producer cadence and network cadence, so a slow
//! fetch eventually blocks the producer and vice versa.
//!
//! The source is single-pass: the consumer end ([`LiveFeed`]) can be claimed
//! exactly once through a [`FeedSlot`]. Later claims are refused.
//!
//! A read failure is delivered to the consumer as a final `Err` item, so an
//! HTTP response aborts instead of ending as if the source had finished.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{Stream, stream};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::CastError;

/// Chunk size used when reading a live producer.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Consumer end of the live pipeline.
#[derive(Debug)]
pub struct LiveFeed {
    receiver: mpsc::Receiver<io::Result<Bytes>>,
}

impl LiveFeed {
    /// Next chunk in producer order, or `None` once the producer ended.
    ///
    /// A read failure of the source arrives as the last item.
    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        self.receiver.recv().await
    }

    /// Converts the feed into a body stream for an HTTP response.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::unfold(self.receiver, |mut receiver| async move {
            let item = receiver.recv().await?;
            Some((item, receiver))
        })
    }
}

/// Claim-once holder of the live feed, shared by request handlers.
#[derive(Debug, Clone)]
pub struct FeedSlot {
    feed: Arc<Mutex<Option<LiveFeed>>>,
}

impl FeedSlot {
    pub fn new(feed: LiveFeed) -> Self {
        Self {
            feed: Arc::new(Mutex::new(Some(feed))),
        }
    }

    /// Takes the feed. Returns `None` if it was already claimed.
    pub fn claim(&self) -> Option<LiveFeed> {
        self.feed.lock().take()
    }

    pub fn is_claimed(&self) -> bool {
        self.feed.lock().is_none()
    }
}

/// A running live pipeline.
pub struct LivePipeline {
    /// Consumer end, to be handed to the origin server
    pub feed: LiveFeed,
    /// Producer task; resolves to the total bytes read
    pub producer: JoinHandle<Result<u64, CastError>>,
}

/// Starts the producer task for a live source.
///
/// Each chunk holds `chunk_size` bytes except the last one before
/// end-of-input, which is forwarded as-is. At most `depth` chunks are queued.
/// End-of-input closes the feed. Any other read failure forwards the bytes
/// read so far, then an `Err` item, and ends the task with
/// `CastError::StreamSource`. Cancelling `cancel` stops the producer and closes
/// the feed.
pub fn spawn_live_pipeline<R>(
    reader: R,
    chunk_size: usize,
    depth: usize,
    cancel: CancellationToken,
) -> LivePipeline
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (sender, receiver) = mpsc::channel(depth.max(1));
    let producer = tokio::spawn(pump(reader, sender, chunk_size.max(1), cancel));

    LivePipeline {
        feed: LiveFeed { receiver },
        producer,
    }
}

async fn pump<R>(
    mut reader: R,
    sender: mpsc::Sender<io::Result<Bytes>>,
    chunk_size: usize,
    cancel: CancellationToken,
) -> Result<u64, CastError>
where
    R: AsyncRead + Send + Unpin,
{
    let mut total = 0u64;
    let mut first = true;

    loop {
        let mut chunk = BytesMut::zeroed(chunk_size);
        let (filled, failure) = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(total, "Live producer cancelled");
                return Ok(total);
            }
            read = read_full(&mut reader, &mut chunk) => read,
        };

        if filled > 0 {
            if first {
                tracing::debug!("First bytes received from live source");
                first = false;
            }
            chunk.truncate(filled);
            total += filled as u64;
            if !forward(&sender, Ok(chunk.freeze()), &cancel).await {
                return Ok(total);
            }
        }

        if let Some(e) = failure {
            tracing::error!(total, "Live source read failed: {e}");
            let reason = format!("live source read failed after {total} bytes: {e}");
            forward(&sender, Err(io::Error::new(e.kind(), reason.clone())), &cancel).await;
            return Err(CastError::stream_source(reason));
        }

        if filled < chunk_size {
            break;
        }
    }

    tracing::info!(total, "Live source reached end of input");
    Ok(total)
}

/// Queues one item. Returns false when cancelled or the consumer is gone.
async fn forward(
    sender: &mpsc::Sender<io::Result<Bytes>>,
    item: io::Result<Bytes>,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!("Live producer cancelled");
            false
        }
        sent = sender.send(item) => {
            if sent.is_err() {
                tracing::warn!("Live stream consumer went away, stopping producer");
            }
            sent.is_ok()
        }
    }
}

/// Reads until `buf` is full or the reader is exhausted.
///
/// Returns the bytes filled together with the error that stopped reading
/// early, if any.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> (usize, Option<io::Error>)
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return (filled, Some(e)),
        }
    }
    (filled, None)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use proptest::prelude::*;
    use tokio::io::AsyncWriteExt;

    use super::*;

    async fn drain(mut feed: LiveFeed) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        while let Some(chunk) = feed.next_chunk().await {
            chunks.push(chunk.expect("source did not fail"));
        }
        chunks
    }

    #[tokio::test]
    async fn test_chunks_are_fixed_size_until_end_of_input() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let pipeline = spawn_live_pipeline(
            std::io::Cursor::new(data.clone()),
            DEFAULT_CHUNK_SIZE,
            4,
            CancellationToken::new(),
        );

        let chunks = drain(pipeline.feed).await;
        let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![2048, 2048, 904]);
        assert_eq!(chunks.concat(), data);
        assert_eq!(pipeline.producer.await.unwrap().unwrap(), 5000);
    }

    #[tokio::test]
    async fn test_short_reads_are_coalesced() {
        let reader = tokio_test::io::Builder::new()
            .read(b"abc")
            .read(b"defg")
            .read(b"h")
            .build();

        let pipeline = spawn_live_pipeline(reader, 4, 4, CancellationToken::new());
        let chunks = drain(pipeline.feed).await;

        assert_eq!(chunks, vec![Bytes::from_static(b"abcd"), Bytes::from_static(b"efgh")]);
        assert_eq!(pipeline.producer.await.unwrap().unwrap(), 8);
    }

    #[tokio::test]
    async fn test_read_error_reaches_consumer() {
        let reader = tokio_test::io::Builder::new()
            .read(b"abcd")
            .read(b"ef")
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "producer crashed"))
            .build();

        let mut pipeline = spawn_live_pipeline(reader, 4, 4, CancellationToken::new());

        let first = pipeline.feed.next_chunk().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"abcd"));
        let partial = pipeline.feed.next_chunk().await.unwrap().unwrap();
        assert_eq!(partial, Bytes::from_static(b"ef"));
        let failure = pipeline.feed.next_chunk().await.unwrap().unwrap_err();
        assert_eq!(failure.kind(), io::ErrorKind::BrokenPipe);
        assert!(pipeline.feed.next_chunk().await.is_none());

        let result = pipeline.producer.await.unwrap();
        assert!(matches!(result, Err(CastError::StreamSource { .. })));
    }

    #[tokio::test]
    async fn test_bounded_buffer_applies_backpressure() {
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let pipeline = spawn_live_pipeline(reader, 4, 1, CancellationToken::new());

        writer.write_all(&[7u8; 64]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pipeline.producer.is_finished());

        drop(writer);
        let chunks = drain(pipeline.feed).await;
        assert_eq!(chunks.concat(), vec![7u8; 64]);
        assert_eq!(pipeline.producer.await.unwrap().unwrap(), 64);
    }

    #[tokio::test]
    async fn test_cancel_stops_producer_and_closes_feed() {
        let (_writer, reader) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();
        let mut pipeline = spawn_live_pipeline(reader, 4, 4, cancel.clone());

        cancel.cancel();

        assert!(pipeline.feed.next_chunk().await.is_none());
        assert_eq!(pipeline.producer.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_feed_slot_claims_once() {
        let pipeline = spawn_live_pipeline(
            std::io::Cursor::new(b"payload".to_vec()),
            DEFAULT_CHUNK_SIZE,
            4,
            CancellationToken::new(),
        );
        let slot = FeedSlot::new(pipeline.feed);
        let shared = slot.clone();

        assert!(!slot.is_claimed());
        let feed = slot.claim().expect("first claim succeeds");
        assert!(shared.claim().is_none());
        assert!(slot.is_claimed());

        let body: Vec<Bytes> = feed
            .into_stream()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(body.concat(), b"payload".to_vec());
    }

    proptest! {
        #[test]
        fn prop_bytes_arrive_in_order_without_loss(
            data in proptest::collection::vec(any::<u8>(), 0..20_000),
            chunk_size in 1usize..4096,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let (received, total) = runtime.block_on(async {
                let pipeline = spawn_live_pipeline(
                    std::io::Cursor::new(data.clone()),
                    chunk_size,
                    2,
                    CancellationToken::new(),
                );
                let received = drain(pipeline.feed).await.concat();
                let total = pipeline.producer.await.unwrap().unwrap();
                (received, total)
            });

            prop_assert_eq!(total, data.len() as u64);
            prop_assert_eq!(received, data);
        }
    }
}
