//! Sentence framing and checksum validation shared by NMEA 0183 and AIS.
//!
//! Bytes arrive from the port in arbitrary chunks.  `SentenceBuffer`
//! accumulates them and hands back complete lines; `Sentence::parse` checks
//! the `*CC` XOR checksum and yields a validated sentence.  Both protocols
//! use the same rule: XOR every byte between the leading `$`/`!` and the
//! `*`, compare with the two hex digits after it.

use thiserror::Error;

/// Upper bound on bytes buffered without seeing a line terminator.
const MAX_PENDING: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed sentence: {0}")]
    Malformed(String),

    #[error("checksum mismatch: expected {expected:02X}, computed {actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

// ── Line accumulation ─────────────────────────────────────────────────────────

/// Growing byte buffer that splits off newline-terminated lines.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    buf: Vec<u8>,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the port.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_PENDING && !self.buf.contains(&b'\n') {
            log::debug!("discarding {} unterminated bytes", self.buf.len());
            self.buf.clear();
        }
    }

    /// Split off the next complete line, without its `\r\n`.
    /// Empty lines are skipped.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let end = self.buf.iter().position(|&b| b == b'\n')?;
            let mut line: Vec<u8> = self.buf.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
    }

    /// Bytes of an incomplete line still held.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// ── Checksum ──────────────────────────────────────────────────────────────────

/// XOR of every byte of `body` (the text between the sentinel and `*`).
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Render `body` as a complete sentence: `<sentinel><body>*CC`.
#[cfg(test)]
pub fn with_checksum(sentinel: char, body: &str) -> String {
    format!("{sentinel}{body}*{:02X}", checksum(body))
}

// ── Validated sentence ────────────────────────────────────────────────────────

/// A sentence whose checksum has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    sentinel: char,
    body:     String,
    checksum: u8,
}

impl Sentence {
    /// Validate one line.  Leading/trailing whitespace is ignored.
    pub fn parse(line: &str) -> Result<Sentence, FrameError> {
        let line = line.trim();
        let sentinel = match line.chars().next() {
            Some(c @ ('$' | '!')) => c,
            Some(c) => return Err(FrameError::Malformed(format!("unexpected start {c:?}"))),
            None => return Err(FrameError::Malformed("empty line".into())),
        };
        let star = line
            .rfind('*')
            .ok_or_else(|| FrameError::Malformed("no checksum marker".into()))?;
        let body = &line[1..star];
        let hex = &line[star + 1..];
        if hex.len() != 2 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FrameError::Malformed(format!("checksum must be two hex digits, got {hex:?}")));
        }
        let expected = u8::from_str_radix(hex, 16)
            .map_err(|_| FrameError::Malformed(format!("bad checksum digits {hex:?}")))?;
        let actual = checksum(body);
        if actual != expected {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }
        Ok(Sentence {
            sentinel,
            body: body.to_string(),
            checksum: expected,
        })
    }

    pub fn sentinel(&self) -> char {
        self.sentinel
    }

    /// Text between the sentinel and `*`, e.g. `GPRMC,225026.00,A,...`.
    #[cfg(test)]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Comma separated fields of the body; field 0 is the address (`GPRMC`).
    pub fn fields(&self) -> Vec<&str> {
        self.body.split(',').collect()
    }

    /// Prefix match against the full sentence text, sentinel included.
    pub fn starts_with(&self, prefix: &str) -> bool {
        let mut chars = prefix.chars();
        match chars.next() {
            Some(c) if c == self.sentinel => self.body.starts_with(chars.as_str()),
            _ => false,
        }
    }
}

impl std::fmt::Display for Sentence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}*{:02X}", self.sentinel, self.body, self.checksum)
    }
}
