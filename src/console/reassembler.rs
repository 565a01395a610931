//! Splitting of raw RTT byte chunks into display lines

use std::borrow::Cow;

/// A terminator-stripped line decoded from the bytes between two terminators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedLine {
    pub text: String,
    /// Invalid UTF-8 was replaced while decoding
    pub lossy: bool,
}

impl CompletedLine {
    fn decode(bytes: &[u8]) -> Self {
        match String::from_utf8_lossy(bytes) {
            Cow::Borrowed(text) => Self {
                text: text.to_string(),
                lossy: false,
            },
            Cow::Owned(text) => Self { text, lossy: true },
        }
    }
}

/// Accumulates raw chunks and yields completed lines.
///
/// Bytes after the last terminator are held as the partial line. Lines are
/// decoded only once complete, so a multi-byte character or a multi-byte
/// terminator split across two chunks comes out the same as if it had
/// arrived in one piece.
#[derive(Debug)]
pub struct LineReassembler {
    terminator: Vec<u8>,
    strip_carriage_return: bool,
    partial: Vec<u8>,
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new(b"\n", true)
    }
}

impl LineReassembler {
    /// Create a reassembler splitting on `terminator`.
    ///
    /// # Panics
    ///
    /// Panics if `terminator` is empty.
    pub fn new(terminator: &[u8], strip_carriage_return: bool) -> Self {
        assert!(!terminator.is_empty(), "line terminator must not be empty");
        Self {
            terminator: terminator.to_vec(),
            strip_carriage_return,
            partial: Vec::new(),
        }
    }

    /// Feed one raw chunk, returning every line it completes (possibly none)
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<CompletedLine> {
        if chunk.is_empty() {
            return Vec::new();
        }

        // A terminator may start inside the previous partial
        let rescan = self.terminator.len() - 1;
        let mut search_from = self.partial.len().saturating_sub(rescan);
        self.partial.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut line_start = 0;
        while let Some(pos) = find(&self.partial[search_from..], &self.terminator) {
            let end = search_from + pos;
            lines.push(self.complete(line_start, end));
            line_start = end + self.terminator.len();
            search_from = line_start;
        }

        if line_start > 0 {
            self.partial.drain(..line_start);
        }
        lines
    }

    fn complete(&self, start: usize, end: usize) -> CompletedLine {
        let mut bytes = &self.partial[start..end];
        if self.strip_carriage_return {
            if let Some(stripped) = bytes.strip_suffix(b"\r") {
                bytes = stripped;
            }
        }
        CompletedLine::decode(bytes)
    }

    /// The in-progress line, decoded lossily for live display
    pub fn partial(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.partial)
    }

    pub fn partial_len(&self) -> usize {
        self.partial.len()
    }

    /// Take the partial line as a final best-effort line
    pub fn flush(&mut self) -> Option<CompletedLine> {
        if self.partial.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.partial);
        Some(CompletedLine::decode(&bytes))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() == 1 {
        return haystack.iter().position(|b| *b == needle[0]);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
