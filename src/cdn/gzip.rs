//! Streaming gzip over a bounded pool of output buffers.
//!
//! Each response body gets a [`GzEncoder`] bound to a buffer taken from the
//! pool. [`PooledEncoder`] finishes the stream and hands the buffer back in
//! `Drop`, which runs however the body stream ends: fully sent, failed, or
//! dropped by a disconnecting client.

use std::io::Write;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::StreamExt;

const BUFFER_SIZE: usize = 32 * 1024;
/// Buffers that grew past this are shrunk before going back to the pool.
const MAX_RETAINED: usize = 256 * 1024;

/// Bounded pool of reusable gzip output buffers.
pub struct GzipPool {
    idle: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    level: Compression,
}

impl GzipPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            level: Compression::default(),
        })
    }

    /// Start a gzip stream writing into an idle buffer, or a new one.
    pub fn acquire(self: &Arc<Self>) -> PooledEncoder {
        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let buffer = reused.unwrap_or_else(|| Vec::with_capacity(BUFFER_SIZE));
        PooledEncoder {
            encoder: Some(GzEncoder::new(buffer, self.level)),
            pool: self.clone(),
        }
    }

    /// Buffers currently waiting in the pool.
    pub fn idle(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        buffer.shrink_to(MAX_RETAINED);
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.capacity {
                idle.push(buffer);
            }
        }
    }
}

/// A gzip stream whose buffer is on loan from the pool.
pub struct PooledEncoder {
    encoder: Option<GzEncoder<Vec<u8>>>,
    pool: Arc<GzipPool>,
}

impl PooledEncoder {
    /// Compress `chunk` and take the output produced so far.
    pub fn write(&mut self, chunk: &[u8]) -> std::io::Result<Bytes> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(std::io::Error::other("gzip stream already finished"));
        };
        encoder.write_all(chunk)?;
        let out = encoder.get_mut();
        let ready = Bytes::copy_from_slice(out);
        out.clear();
        Ok(ready)
    }

    /// Write the trailer, take the remaining output and return the buffer.
    pub fn finish(&mut self) -> std::io::Result<Bytes> {
        let Some(encoder) = self.encoder.take() else {
            return Err(std::io::Error::other("gzip stream already finished"));
        };
        let buffer = encoder.finish()?;
        let rest = Bytes::copy_from_slice(&buffer);
        self.pool.release(buffer);
        Ok(rest)
    }
}

impl Drop for PooledEncoder {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            if let Ok(buffer) = encoder.finish() {
                self.pool.release(buffer);
            }
        }
    }
}

struct GzipState {
    source: axum::body::BodyDataStream,
    encoder: PooledEncoder,
    done: bool,
}

/// Wrap `body` in a gzip stream using a buffer from `pool`.
pub fn gzip_body(body: Body, pool: &Arc<GzipPool>) -> Body {
    let state = GzipState {
        source: body.into_data_stream(),
        encoder: pool.acquire(),
        done: false,
    };

    let stream = futures_util::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            match state.source.next().await {
                Some(Ok(chunk)) => match state.encoder.write(&chunk) {
                    Ok(out) if out.is_empty() => continue,
                    Ok(out) => return Some((Ok(out), state)),
                    Err(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(std::io::Error::other(e)), state));
                }
                None => {
                    state.done = true;
                    let rest = state.encoder.finish();
                    return Some((rest, state));
                }
            }
        }
    });

    Body::from_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    async fn collect(body: Body) -> Vec<u8> {
        axum::body::to_bytes(body, usize::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_gzip_round_trip() {
        let pool = GzipPool::new(2);
        let text = "console.log('hello');\n".repeat(500);
        let compressed = collect(gzip_body(Body::from(text.clone()), &pool)).await;

        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, text);
        assert!(compressed.len() < text.len());
    }

    #[tokio::test]
    async fn test_multi_chunk_body() {
        let pool = GzipPool::new(2);
        let chunks: Vec<Result<Bytes, std::io::Error>> = (0..50)
            .map(|i| Ok(Bytes::from(format!("chunk {i};").repeat(100))))
            .collect();
        let expected: String = (0..50).map(|i| format!("chunk {i};").repeat(100)).collect();
        let body = Body::from_stream(futures_util::stream::iter(chunks));

        let compressed = collect(gzip_body(body, &pool)).await;
        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, expected);
    }

    #[tokio::test]
    async fn test_empty_body_is_valid_gzip() {
        let pool = GzipPool::new(2);
        let compressed = collect(gzip_body(Body::empty(), &pool)).await;
        let mut decoded = Vec::new();
        GzDecoder::new(&compressed[..]).read_to_end(&mut decoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn test_buffer_returned_after_body() {
        let pool = GzipPool::new(2);
        assert_eq!(pool.idle(), 0);
        collect(gzip_body(Body::from("abc"), &pool)).await;
        assert_eq!(pool.idle(), 1);

        // reused, not duplicated
        collect(gzip_body(Body::from("def"), &pool)).await;
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn test_buffer_returned_on_drop() {
        let pool = GzipPool::new(2);
        let body = gzip_body(Body::from("abc"), &pool);
        assert_eq!(pool.idle(), 0);
        drop(body);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = GzipPool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
