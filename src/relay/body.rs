//! Chunked response copy from backend to caller.
//!
//! # Responsibilities
//! - Re-slice upstream data into frames of at most [`CHUNK_SIZE`] bytes
//! - Hand each frame to the server as its own write; the next upstream read
//!   only happens once the server polls again after writing it
//! - Keep the lease alive exactly as long as the stream
//! - Stop after the in-flight chunk when the cancel signal fires

use axum::body::{Body, BodyDataStream};
use bytes::Bytes;
use futures_util::StreamExt;
use std::io;
use tokio_util::sync::CancellationToken;

use crate::broker::Lease;

/// Size of each frame written to the caller.
pub const CHUNK_SIZE: usize = 4096;

struct RelayState {
    lease: Lease,
    upstream: BodyDataStream,
    pending: Bytes,
    cancel: CancellationToken,
}

/// Wrap an upstream body so that it streams to the caller chunk by chunk
/// while holding `lease`.
///
/// The lease is released when the upstream ends, on any error, on
/// cancellation, or when the caller goes away and the body is dropped.
pub fn relay_body(lease: Lease, upstream: Body, cancel: CancellationToken) -> Body {
    let state = RelayState {
        lease,
        upstream: upstream.into_data_stream(),
        pending: Bytes::new(),
        cancel,
    };

    let stream = futures_util::stream::try_unfold(state, |mut state| async move {
        if state.cancel.is_cancelled() {
            return Err(cancelled(&state.lease));
        }

        while state.pending.is_empty() {
            tokio::select! {
                biased;

                _ = state.cancel.cancelled() => {
                    return Err(cancelled(&state.lease));
                }
                next = state.upstream.next() => match next {
                    Some(Ok(bytes)) => state.pending = bytes,
                    Some(Err(err)) => {
                        tracing::debug!(
                            backend = %state.lease.url(),
                            error = %err,
                            "Upstream stream failed, aborting response"
                        );
                        return Err(io::Error::other(err));
                    }
                    None => {
                        state.lease.release();
                        return Ok(None);
                    }
                },
            }
        }

        let len = state.pending.len().min(CHUNK_SIZE);
        let chunk = state.pending.split_to(len);
        Ok(Some((chunk, state)))
    });

    Body::from_stream(stream)
}

fn cancelled(lease: &Lease) -> io::Error {
    tracing::debug!(backend = %lease.url(), "Relay cancelled mid-stream");
    io::Error::new(io::ErrorKind::Interrupted, "relay cancelled")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Pool;
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Upstream body fed one frame at a time by the test.
    fn channel_body<E>(rx: mpsc::Receiver<Result<Bytes, E>>) -> Body
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Body::from_stream(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    async fn lease(pool: &Pool) -> Lease {
        pool.acquire(&CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_large_frame_is_split() {
        let pool = Pool::new(&["http://127.0.0.1:9000"], 1).unwrap();
        let upstream = Body::from(vec![b'x'; 2 * CHUNK_SIZE + 100]);
        let body = relay_body(lease(&pool).await, upstream, CancellationToken::new());

        let mut stream = body.into_data_stream();
        let mut sizes = Vec::new();
        while let Some(chunk) = stream.next().await {
            sizes.push(chunk.unwrap().len());
        }
        assert_eq!(sizes, vec![CHUNK_SIZE, CHUNK_SIZE, 100]);
        assert_eq!(pool.backends()[0].available(), 1);
    }

    #[tokio::test]
    async fn test_each_upstream_chunk_forwarded_before_next_read() {
        let pool = Pool::new(&["http://127.0.0.1:9000"], 1).unwrap();
        let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(1);
        let body = relay_body(lease(&pool).await, channel_body(rx), CancellationToken::new());
        let mut stream = body.into_data_stream();

        for frame in ["{\"a\":1}\n", "{\"b\":2}\n", "{\"done\":true}\n"] {
            tx.send(Ok(Bytes::from_static(frame.as_bytes()))).await.unwrap();
            let got = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("chunk should be forwarded without waiting for more input")
                .unwrap()
                .unwrap();
            assert_eq!(got, frame.as_bytes());
        }
        assert_eq!(pool.backends()[0].in_flight(), 1);

        drop(tx);
        assert!(stream.next().await.is_none());
        assert_eq!(pool.backends()[0].in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_releases_lease() {
        let pool = Arc::new(Pool::new(&["http://127.0.0.1:9000"], 1).unwrap());
        let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(1);
        let cancel = CancellationToken::new();
        let body = relay_body(lease(&pool).await, channel_body(rx), cancel.clone());
        let mut stream = body.into_data_stream();

        tx.send(Ok(Bytes::from_static(b"first"))).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "first");

        cancel.cancel();
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        assert_eq!(pool.backends()[0].available(), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_truncates_and_releases_lease() {
        let pool = Pool::new(&["http://127.0.0.1:9000"], 1).unwrap();
        let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(2);
        let body = relay_body(lease(&pool).await, channel_body(rx), CancellationToken::new());
        let mut stream = body.into_data_stream();

        tx.send(Ok(Bytes::from_static(b"{\"response\":\"par\"}\n"))).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "{\"response\":\"par\"}\n");
        assert_eq!(pool.backends()[0].available(), 0);

        tx.send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "backend reset")))
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        assert_eq!(pool.backends()[0].available(), 1);
    }

    #[tokio::test]
    async fn test_dropped_body_releases_lease() {
        let pool = Pool::new(&["http://127.0.0.1:9000"], 1).unwrap();
        let (_tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(1);
        let body = relay_body(lease(&pool).await, channel_body(rx), CancellationToken::new());
        assert_eq!(pool.backends()[0].available(), 0);

        drop(body);
        assert_eq!(pool.backends()[0].available(), 1);
    }
}
