mod decoder;
mod spec;
mod traceback_parser;
mod types;

pub use decoder::{Decoder, SUPPORTED_VERSION, compare_versions};
pub use spec::{DecodeKind, FieldSpec, MessageSpec, MessageType, registry};
pub use traceback_parser::{Traceback, TracebackAssembler, TracebackFrame};
pub use types::{DecodedFields, FieldValue, Location, Message};

use std::fs::File;
use std::io::{BufRead, BufReader};

/// Parse errors that can occur while decoding the log protocol
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid line format: {0}")]
    InvalidFormat(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Streaming decode session over one log.
///
/// Line numbering and the decoder's memoization state persist across blocks,
/// so rotated/appended chunks of the same run can be fed incrementally. A
/// malformed line is recorded in `errors` and skipped; it never aborts the
/// stream.
#[derive(Debug, Default)]
pub struct LogParser {
    decoder: Decoder,
    /// Accumulated errors during parsing
    pub errors: Vec<(usize, ParseError)>,
    /// Current line number
    line_number: usize,
}

impl LogParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an entire log file
    pub fn parse_file(&mut self, path: &str) -> ParseResult<Vec<Message>> {
        let file = File::open(path)
            .map_err(|e| ParseError::Io(format!("Failed to open {}: {}", path, e)))?;

        let reader = BufReader::new(file);
        Ok(self.parse_lines(reader.lines().map(|l| l.unwrap_or_default())))
    }

    /// Parse a block of log text (initial contents or an appended chunk)
    pub fn parse_block(&mut self, text: &str) -> Vec<Message> {
        self.parse_lines(text.lines().map(|l| l.to_string()))
    }

    fn parse_lines<I>(&mut self, lines: I) -> Vec<Message>
    where
        I: Iterator<Item = String>,
    {
        let mut messages = Vec::new();
        for line in lines {
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            match self.decoder.decode_line(&line) {
                Ok(Some(msg)) => messages.push(msg),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Unable to decode line {}: {}", self.line_number, e);
                    self.errors.push((self.line_number, e));
                }
            }
        }
        messages
    }
}
