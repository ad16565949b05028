use std::collections::BTreeMap;

use bytes::{Buf, Bytes, BytesMut};

use crate::stream::{ByteStream, Reader, Writer};

/// Accepts substrings of a byte stream at arbitrary absolute indices, possibly out of order,
/// duplicated, or overlapping, and writes the bytes into the output stream in order.
///
/// Substrings are only held while they fit the window `[next_index, next_index + available
/// capacity of the output)`; anything outside is dropped or truncated, which bounds memory by the
/// output stream's capacity. Pending substrings are kept pairwise disjoint: each insert merges
/// with every overlapping or touching neighbor before being stored or written out.
#[derive(Debug)]
pub struct Reassembler {
    output: ByteStream,
    next_index: u64,
    // pending substrings keyed by their first absolute index; disjoint and non-touching
    pending: BTreeMap<u64, Bytes>,
    bytes_pending: u64,
    // absolute index one past the final byte, once the last substring has been seen
    last_index: Option<u64>,
}

impl Reassembler {
    pub fn new(output: ByteStream) -> Self {
        Self {
            output,
            next_index: 0,
            pending: BTreeMap::new(),
            bytes_pending: 0,
            last_index: None,
        }
    }

    /// Inserts the substring of the stream beginning at absolute index `first_index`. The first
    /// substring flagged `is_last` fixes the end of the stream; later flags are ignored.
    pub fn insert(&mut self, first_index: u64, data: impl Into<Bytes>, is_last: bool) {
        let mut data: Bytes = data.into();

        let window_start = self.next_index;
        let window_end = self.next_index + self.output.available_capacity() as u64;

        if is_last && self.last_index.is_none() {
            self.last_index = Some(first_index.saturating_add(data.len() as u64));
        }

        let mut start = first_index;
        // a nonsense index near u64::MAX saturates and falls outside the window below
        let mut end = first_index.saturating_add(data.len() as u64);

        if start < window_end && end > window_start {
            // clip to the window, right edge first
            if end > window_end {
                data.truncate((window_end - start) as usize);
                end = window_end;
            }
            if start < window_start {
                data.advance((window_start - start) as usize);
                start = window_start;
            }

            // merge with every pending substring that overlaps or touches the clipped range;
            // earlier-received bytes are kept where ranges overlap
            let neighbors: Vec<u64> = self
                .pending
                .range(..=end)
                .rev()
                .take_while(|(&k, v)| k + v.len() as u64 >= start)
                .map(|(&k, _)| k)
                .collect();

            for key in neighbors {
                let held = self.pending.remove(&key).unwrap();
                let held_end = key + held.len() as u64;
                self.bytes_pending -= held.len() as u64;

                data = merge(start, &data, key, &held);
                start = start.min(key);
                end = end.max(held_end);
            }

            if start == self.next_index {
                // the run begins exactly where the output stands, so the whole clipped range
                // fits its remaining capacity (a closed output accepts nothing)
                let accepted = self.output.writer().push(data);
                self.next_index += accepted as u64;
            } else {
                self.bytes_pending += data.len() as u64;
                self.pending.insert(start, data);
            }
        }

        if self.last_index == Some(self.next_index) {
            self.output.writer().close();
        }
    }

    /// Number of bytes held back waiting for the gap before them to fill.
    pub fn bytes_pending(&self) -> u64 {
        self.bytes_pending
    }

    pub fn stream(&self) -> &ByteStream {
        &self.output
    }

    pub fn reader(&mut self) -> Reader<'_> {
        self.output.reader()
    }

    pub fn writer(&mut self) -> Writer<'_> {
        self.output.writer()
    }
}

/// Union of the incoming substring `new` with a previously held substring `held`, both at known
/// absolute positions. The ranges must overlap or touch. Overlapping positions are assumed to
/// carry the same bytes; the previously held side wins, and a debug build checks that the two
/// sides agree.
fn merge(new_start: u64, new: &Bytes, held_start: u64, held: &Bytes) -> Bytes {
    let new_end = new_start + new.len() as u64;
    let held_end = held_start + held.len() as u64;

    if held_start <= new_start && held_end >= new_end {
        let lo = (new_start - held_start) as usize;
        debug_assert_eq!(&held[lo..lo + new.len()], &new[..]);
        return held.clone();
    }

    let mut merged = BytesMut::with_capacity((new_end.max(held_end) - new_start.min(held_start)) as usize);
    if new_start <= held_start && new_end >= held_end {
        let lo = (held_start - new_start) as usize;
        debug_assert_eq!(&new[lo..lo + held.len()], &held[..]);
        merged.extend_from_slice(&new[..lo]);
        merged.extend_from_slice(held);
        merged.extend_from_slice(&new[lo + held.len()..]);
    } else if held_start < new_start {
        let overlap = (held_end - new_start) as usize;
        debug_assert_eq!(&held[held.len() - overlap..], &new[..overlap]);
        merged.extend_from_slice(held);
        merged.extend_from_slice(&new[overlap..]);
    } else {
        let overlap = (new_end - held_start) as usize;
        debug_assert_eq!(&new[new.len() - overlap..], &held[..overlap]);
        merged.extend_from_slice(&new[..new.len() - overlap]);
        merged.extend_from_slice(held);
    }
    merged.freeze()
}
