//! Pull-based reader over an upstream download body.

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::error::Error as StdError;
use std::io;
use std::sync::{Mutex, PoisonError};

/// Hands out an upstream body in pieces of a caller-chosen size.
///
/// `skip` drops a prefix of the body, which is how a byte offset is served
/// when the upstream ignored `Range` and sent the whole file.
pub struct ProxyStream {
    // Only reached through `&mut self`; the mutex makes the reader `Sync`.
    inner: Mutex<BoxStream<'static, reqwest::Result<Bytes>>>,
    buffer: BytesMut,
    skip: u64,
    done: bool,
}

impl ProxyStream {
    pub fn new<S>(inner: S) -> Self
    where
        S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Mutex::new(inner.boxed()),
            buffer: BytesMut::new(),
            skip: 0,
            done: false,
        }
    }

    /// Drop the first `skip` bytes of the body.
    pub fn skipping(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Next piece of at most `max` bytes. Empty once the body is exhausted.
    pub async fn read(&mut self, max: usize) -> reqwest::Result<Bytes> {
        while self.buffer.is_empty() && !self.done {
            let next = {
                let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
                inner.next().await
            };
            match next {
                Some(Ok(chunk)) => self.absorb(chunk),
                Some(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                None => self.done = true,
            }
        }
        let n = max.max(1).min(self.buffer.len());
        Ok(self.buffer.split_to(n).freeze())
    }

    fn absorb(&mut self, mut chunk: Bytes) {
        if self.skip > 0 {
            let n = (self.skip.min(chunk.len() as u64)) as usize;
            chunk = chunk.slice(n..);
            self.skip -= n as u64;
        }
        self.buffer.extend_from_slice(&chunk);
    }
}

/// Whether an error is the normal result of a peer hanging up.
pub fn is_disconnect_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ) {
                return true;
            }
        }
        if e.to_string().to_lowercase().contains("canceled") {
            return true;
        }
        current = e.source();
    }
    false
}
