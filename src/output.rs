//! Output capture and buffering for supervised commands.
//!
//! This module provides `OutputBuffer`, the bounded per-command history that
//! process output is streamed into, plus text sanitization for display.

use std::collections::VecDeque;

use strip_ansi_escapes::strip;

/// Default number of lines retained per command.
pub const DEFAULT_MAX_LINES: usize = 5000;

/// A line-bounded ring of decoded output.
///
/// Raw bytes arrive in arbitrary fragments; complete lines are decoded and
/// stored, while an unterminated tail is held back until the next fragment
/// (or an explicit flush) completes it.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    max_lines: usize,
    lines: VecDeque<String>,
    partial: Vec<u8>,
}

impl OutputBuffer {
    /// Creates an empty buffer holding at most `max_lines` lines.
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            max_lines,
            lines: VecDeque::with_capacity(max_lines.min(1024)),
            partial: Vec::new(),
        }
    }

    /// Appends a raw chunk of process output.
    ///
    /// Returns the number of old lines dropped by trimming.
    pub fn append(&mut self, chunk: &[u8]) -> usize {
        if chunk.is_empty() {
            return 0;
        }
        let mut segments = chunk.split(|b| *b == b'\n').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                // Unterminated tail; empty when the chunk ended in a newline.
                self.partial.extend_from_slice(segment);
                break;
            }
            self.partial.extend_from_slice(segment);
            let line = decode_line(&self.partial);
            self.partial.clear();
            self.lines.push_back(line);
        }
        self.trim()
    }

    /// Commits a pending partial line, if any.
    pub fn flush_partial(&mut self) -> usize {
        if self.partial.is_empty() {
            return 0;
        }
        let line = decode_line(&self.partial);
        self.partial.clear();
        self.lines.push_back(line);
        self.trim()
    }

    /// Appends literal banner lines without any line splitting.
    pub fn append_marker<I, S>(&mut self, lines: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dropped = self.flush_partial();
        for line in lines {
            self.lines.push_back(line.into());
        }
        dropped += self.trim();
        dropped
    }

    /// Changes the line cap. The new cap is enforced on the next append.
    pub fn set_max_lines(&mut self, max_lines: usize) {
        self.max_lines = max_lines.max(1);
    }

    /// Returns the number of complete lines currently stored.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns the most recent complete line.
    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    /// Returns an owned point-in-time copy of the stored lines.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    fn trim(&mut self) -> usize {
        let excess = self.lines.len().saturating_sub(self.max_lines);
        if excess > 0 {
            self.lines.drain(..excess);
        }
        excess
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Sanitizes text for display, optionally stripping ANSI escape codes.
///
/// If `strip_ansi` is true, ANSI codes are removed. Invalid UTF-8 sequences are replaced.
pub fn sanitize_text(text: &str, strip_ansi: bool) -> String {
    if !strip_ansi {
        return text.to_string();
    }
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}
