use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// A bounded, in-order byte buffer connecting a producer and a consumer.
///
/// The stream has a single owner; the producing and consuming sides are expressed as the
/// [`Writer`] and [`Reader`] views, two method groups borrowing the same underlying state. Bytes
/// pushed past the capacity are silently dropped, pops past the buffered length are clamped, and
/// the closed and error flags are sticky.
#[derive(Debug)]
pub struct ByteStream {
    capacity: usize,
    chunks: VecDeque<Bytes>,
    buffered: usize,
    pushed: u64,
    popped: u64,
    closed: bool,
    error: bool,
}

impl ByteStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            chunks: VecDeque::new(),
            buffered: 0,
            pushed: 0,
            popped: 0,
            closed: false,
            error: false,
        }
    }

    #[inline]
    pub fn writer(&mut self) -> Writer<'_> {
        Writer(self)
    }

    #[inline]
    pub fn reader(&mut self) -> Reader<'_> {
        Reader(self)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_capacity(&self) -> usize {
        self.capacity - self.buffered
    }

    pub fn bytes_buffered(&self) -> usize {
        self.buffered
    }

    pub fn bytes_pushed(&self) -> u64 {
        self.pushed
    }

    pub fn bytes_popped(&self) -> u64 {
        self.popped
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the stream has been closed and fully drained.
    pub fn is_finished(&self) -> bool {
        self.closed && self.buffered == 0
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn set_error(&mut self) {
        self.error = true;
    }
}

/// The producing half of a [`ByteStream`].
pub struct Writer<'a>(&'a mut ByteStream);

impl Writer<'_> {
    /// Appends as much of `data` as fits in the remaining capacity and returns the number of
    /// bytes accepted. The remainder is dropped. Pushing to a closed or errored stream accepts
    /// nothing.
    pub fn push(&mut self, data: impl Into<Bytes>) -> usize {
        if self.0.closed || self.0.error {
            return 0;
        }

        let mut data: Bytes = data.into();
        let accepted = data.len().min(self.0.available_capacity());
        data.truncate(accepted);

        if !data.is_empty() {
            self.0.chunks.push_back(data);
        }
        self.0.buffered += accepted;
        self.0.pushed += accepted as u64;

        accepted
    }

    /// Marks the end of the stream. Sticky; buffered bytes remain readable.
    pub fn close(&mut self) {
        self.0.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed
    }

    pub fn available_capacity(&self) -> usize {
        self.0.available_capacity()
    }

    pub fn bytes_pushed(&self) -> u64 {
        self.0.pushed
    }

    pub fn set_error(&mut self) {
        self.0.error = true;
    }

    pub fn has_error(&self) -> bool {
        self.0.error
    }
}

/// The consuming half of a [`ByteStream`].
pub struct Reader<'a>(&'a mut ByteStream);

impl Reader<'_> {
    /// A contiguous view of the front of the buffer. The view need not span everything buffered,
    /// but it is non-empty whenever the buffer is.
    pub fn peek(&self) -> &[u8] {
        self.0.chunks.front().map(Bytes::as_ref).unwrap_or(&[])
    }

    /// Discards up to `len` bytes from the front of the buffer.
    pub fn pop(&mut self, len: usize) {
        let mut remaining = len.min(self.0.buffered);
        self.0.buffered -= remaining;
        self.0.popped += remaining as u64;

        while remaining > 0 {
            let front = self.0.chunks.front_mut().unwrap();
            if front.len() <= remaining {
                remaining -= front.len();
                self.0.chunks.pop_front();
            } else {
                front.advance(remaining);
                remaining = 0;
            }
        }
    }

    /// Removes and returns up to `len` front bytes as a single chunk. Served without copying when
    /// the front chunk suffices.
    pub fn pop_bytes(&mut self, len: usize) -> Bytes {
        let take = len.min(self.0.buffered);
        if take == 0 {
            return Bytes::new();
        }

        let front = self.0.chunks.front_mut().unwrap();
        let out = if front.len() >= take {
            let out = front.split_to(take);
            if front.is_empty() {
                self.0.chunks.pop_front();
            }
            out
        } else {
            let mut out = BytesMut::with_capacity(take);
            let mut remaining = take;
            while remaining > 0 {
                let mut chunk = self.0.chunks.pop_front().unwrap();
                if chunk.len() > remaining {
                    out.extend_from_slice(&chunk.split_to(remaining));
                    self.0.chunks.push_front(chunk);
                    remaining = 0;
                } else {
                    remaining -= chunk.len();
                    out.extend_from_slice(&chunk);
                }
            }
            out.freeze()
        };

        self.0.buffered -= take;
        self.0.popped += take as u64;

        out
    }

    /// Whether the stream has been closed and fully drained.
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    pub fn bytes_buffered(&self) -> usize {
        self.0.buffered
    }

    pub fn bytes_popped(&self) -> u64 {
        self.0.popped
    }

    pub fn set_error(&mut self) {
        self.0.error = true;
    }

    pub fn has_error(&self) -> bool {
        self.0.error
    }
}
