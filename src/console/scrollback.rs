//! Ordered, capacity-bounded history of completed lines

use chrono::{DateTime, Local, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::trace;

use super::reassembler::CompletedLine;

/// Scrollback shared between the acquisition loop (sole writer) and readers
pub type SharedScrollback = Arc<RwLock<ScrollbackBuffer>>;

/// One completed output line; immutable once appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub seq: u64,
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub lossy: bool,
}

impl Line {
    /// Text as shown on the console, optionally prefixed with arrival time
    pub fn display(&self, timestamps: bool) -> String {
        if timestamps {
            format!(
                "{} {}",
                self.received_at.with_timezone(&Local).format("%H:%M:%S%.3f"),
                self.text
            )
        } else {
            self.text.clone()
        }
    }
}

/// Retention limits; `None` means unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capacity {
    pub max_lines: Option<usize>,
    pub max_bytes: Option<usize>,
}

impl Capacity {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn lines(max_lines: usize) -> Self {
        Self {
            max_lines: Some(max_lines),
            max_bytes: None,
        }
    }
}

#[derive(Debug)]
pub struct ScrollbackBuffer {
    lines: VecDeque<Line>,
    capacity: Capacity,
    next_seq: u64,
    total_bytes: usize,
    evicted: u64,
}

impl Default for ScrollbackBuffer {
    fn default() -> Self {
        Self::new(Capacity::unbounded())
    }
}

impl ScrollbackBuffer {
    pub fn new(capacity: Capacity) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
            next_seq: 1,
            total_bytes: 0,
            evicted: 0,
        }
    }

    pub fn shared(capacity: Capacity) -> SharedScrollback {
        Arc::new(RwLock::new(Self::new(capacity)))
    }

    /// Append a line, returning its sequence number
    pub fn append(&mut self, line: CompletedLine) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.total_bytes += line.text.len();
        self.lines.push_back(Line {
            seq,
            text: line.text,
            received_at: Utc::now(),
            lossy: line.lossy,
        });
        self.evict_if_over_capacity();
        seq
    }

    /// Drop the oldest lines until both limits hold; the newest line is always kept.
    /// Returns the number of lines evicted.
    pub fn evict_if_over_capacity(&mut self) -> usize {
        let mut count = 0;
        while self.lines.len() > 1 && self.over_capacity() {
            if let Some(line) = self.lines.pop_front() {
                self.total_bytes -= line.text.len();
                count += 1;
            }
        }
        if count > 0 {
            self.evicted += count as u64;
            trace!("Evicted {} lines from scrollback", count);
        }
        count
    }

    fn over_capacity(&self) -> bool {
        let too_many = self
            .capacity
            .max_lines
            .is_some_and(|max| self.lines.len() > max);
        let too_big = self
            .capacity
            .max_bytes
            .is_some_and(|max| self.total_bytes > max);
        too_many || too_big
    }

    /// Lines with `from <= seq <= to` that are still retained, in order
    pub fn slice(&self, from: u64, to: u64) -> Vec<Line> {
        let Some(oldest) = self.oldest_seq() else {
            return Vec::new();
        };
        let from = from.max(oldest);
        let to = to.min(self.latest_seq());
        if from > to {
            return Vec::new();
        }
        let start = (from - oldest) as usize;
        let end = (to - oldest) as usize;
        self.lines.range(start..=end).cloned().collect()
    }

    /// Sequence number of the newest line ever appended, 0 when nothing was appended
    pub fn latest_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Sequence number of the oldest retained line
    pub fn oldest_seq(&self) -> Option<u64> {
        self.lines.front().map(|line| line.seq)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Number of lines evicted since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> CompletedLine {
        CompletedLine {
            text: text.to_string(),
            lossy: false,
        }
    }

    fn filled(capacity: Capacity, count: usize) -> ScrollbackBuffer {
        let mut buffer = ScrollbackBuffer::new(capacity);
        for i in 1..=count {
            buffer.append(line(&format!("line {}", i)));
        }
        buffer
    }

    #[test]
    fn test_sequence_numbers_start_at_one_and_increase() {
        let mut buffer = ScrollbackBuffer::default();
        assert_eq!(buffer.latest_seq(), 0);
        assert_eq!(buffer.append(line("a")), 1);
        assert_eq!(buffer.append(line("b")), 2);
        assert_eq!(buffer.latest_seq(), 2);
        assert_eq!(buffer.oldest_seq(), Some(1));
    }

    #[test]
    fn test_eviction_removes_exactly_the_oldest() {
        let buffer = filled(Capacity::lines(5), 8);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.evicted(), 3);
        assert_eq!(buffer.oldest_seq(), Some(4));
        assert_eq!(buffer.latest_seq(), 8);
        let texts: Vec<_> = buffer.slice(1, 8).into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["line 4", "line 5", "line 6", "line 7", "line 8"]);
    }

    #[test]
    fn test_byte_capacity_keeps_newest_line() {
        let mut buffer = ScrollbackBuffer::new(Capacity {
            max_lines: None,
            max_bytes: Some(10),
        });
        buffer.append(line("12345"));
        buffer.append(line("67890"));
        assert_eq!(buffer.len(), 2);
        buffer.append(line("abc"));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.total_bytes(), 8);

        buffer.append(line("this line alone is too long"));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.oldest_seq(), Some(4));
    }

    #[test]
    fn test_slice_is_inclusive_and_clipped() {
        let buffer = filled(Capacity::unbounded(), 10);
        let seqs: Vec<_> = buffer.slice(3, 5).into_iter().map(|l| l.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert_eq!(buffer.slice(9, 100).len(), 2);
        assert!(buffer.slice(6, 5).is_empty());
        assert!(buffer.slice(11, 20).is_empty());
        assert!(ScrollbackBuffer::default().slice(0, 10).is_empty());
    }

    #[test]
    fn test_slice_is_stable_while_appending() {
        let mut buffer = filled(Capacity::unbounded(), 5);
        let before = buffer.slice(1, 5);
        for i in 0..50 {
            buffer.append(line(&format!("late {}", i)));
        }
        assert_eq!(buffer.slice(1, 5), before);
    }

    #[test]
    fn test_display_with_timestamp() {
        let mut buffer = ScrollbackBuffer::default();
        buffer.append(line("ready"));
        let shown = buffer.slice(1, 1)[0].display(true);
        assert!(shown.ends_with(" ready"));
        assert_eq!(shown.len(), "HH:MM:SS.mmm ready".len());
    }
}
