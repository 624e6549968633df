//! Bounded staging buffer for compressed data read from disk.

use std::io::{self, Read};

/// Fixed-capacity byte buffer with head/tail offsets.
///
/// Bytes in `head..tail` are pending (read from the file, not yet handed to
/// the decoder). New data is only ever appended at `tail`; [`compact`]
/// moves the pending tail back to the front to make room.
///
/// [`compact`]: StagingBuffer::compact
#[derive(Debug)]
pub struct StagingBuffer {
    data: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl StagingBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    /// Number of pending bytes.
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Whether no more bytes can be appended without compacting.
    pub fn is_full(&self) -> bool {
        self.len() == self.data.len()
    }

    /// The pending bytes.
    pub fn pending(&self) -> &[u8] {
        &self.data[self.head..self.tail]
    }

    /// Mark `n` pending bytes as consumed.
    pub fn consume(&mut self, n: usize) {
        self.head = (self.head + n).min(self.tail);
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        }
    }

    /// Move the pending bytes to the start of the buffer.
    pub fn compact(&mut self) {
        if self.head == 0 {
            return;
        }
        self.data.copy_within(self.head..self.tail, 0);
        self.tail -= self.head;
        self.head = 0;
    }

    /// Compact, then read from `reader` until the buffer is full or the
    /// reader reports end-of-file. Returns the number of bytes appended.
    pub fn top_off<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        self.compact();

        let mut total = 0;
        while self.tail < self.data.len() {
            match reader.read(&mut self.data[self.tail..]) {
                Ok(0) => break,
                Ok(n) => {
                    self.tail += n;
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}
