//! Splits the inbound byte stream into command lines.

use std::collections::VecDeque;

/// One unit produced by the framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// A line that did not fit in the buffer. Its content is discarded.
    Overlong { len: usize },
}

/// Bounded line accumulator.
///
/// `\r` bytes are dropped and `\n` completes a line. When `capacity` bytes
/// have been buffered without a terminator, the framer stops storing and
/// skips everything up to the next `\n`, then yields [`Frame::Overlong`]
/// carrying the total length of the dropped line.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    capacity: usize,
    overflow: Option<usize>,
    ready: VecDeque<Frame>,
}

impl LineFramer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            overflow: None,
            ready: VecDeque::new(),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match b {
                b'\n' => self.complete(),
                b'\r' => {}
                _ => match self.overflow.as_mut() {
                    Some(len) => *len += 1,
                    None if self.buf.len() < self.capacity => self.buf.push(b),
                    None => {
                        self.overflow = Some(self.buf.len() + 1);
                        self.buf.clear();
                    }
                },
            }
        }
    }

    fn complete(&mut self) {
        let frame = match self.overflow.take() {
            Some(len) => Frame::Overlong { len },
            None => Frame::Line(String::from_utf8_lossy(&self.buf).into_owned()),
        };
        self.buf.clear();
        self.ready.push_back(frame);
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    pub fn has_frame(&self) -> bool {
        !self.ready.is_empty()
    }
}
