use std::fs::File;
use std::io::{BufRead, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{EventError, Result};
use crate::event::ChainEvent;
use crate::raw::parse_line;

/// An input line that failed validation.
#[derive(Debug)]
pub struct RejectedEvent {
    /// 1-based line number in the source.
    pub line: usize,
    /// The raw text, kept for the operator log.
    pub raw: String,
    pub error: EventError,
}

/// One decoded unit from an event source.
#[derive(Debug)]
pub enum SourceItem {
    Event(ChainEvent),
    Rejected(RejectedEvent),
}

fn decode(line_number: usize, text: &str) -> Option<SourceItem> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    Some(match parse_line(trimmed) {
        Ok(event) => SourceItem::Event(event),
        Err(error) => SourceItem::Rejected(RejectedEvent {
            line: line_number,
            raw: trimmed.to_string(),
            error,
        }),
    })
}

/// Decode one raw line. Bytes that are not UTF-8 reject the line rather
/// than failing the read.
fn decode_bytes(line_number: usize, bytes: &[u8]) -> Option<SourceItem> {
    match std::str::from_utf8(bytes) {
        Ok(text) => decode(line_number, text),
        Err(e) => Some(SourceItem::Rejected(RejectedEvent {
            line: line_number,
            raw: String::from_utf8_lossy(bytes).trim().to_string(),
            error: EventError::Encoding(e.to_string()),
        })),
    }
}

/// Reads JSON-lines events from any buffered reader.
///
/// Blank lines and `#` comments are skipped. A line that is not UTF-8 or
/// fails validation is yielded as [`SourceItem::Rejected`] so the consumer
/// can log it and continue; only read failures end the stream with an error.
pub struct JsonLinesSource<R> {
    reader: R,
    line_number: usize,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
        }
    }
}

impl JsonLinesSource<std::io::BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(std::io::BufReader::new(file)))
    }
}

impl<R: BufRead> Iterator for JsonLinesSource<R> {
    type Item = Result<SourceItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut buf = Vec::new();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_number += 1;
                    if let Some(item) = decode_bytes(self.line_number, &buf) {
                        return Some(Ok(item));
                    }
                }
                Err(e) => return Some(Err(EventError::Io(e))),
            }
        }
    }
}

/// Incremental reader for a JSON-lines file that keeps growing.
///
/// Each [`FileTail::poll`] returns the complete lines appended since the
/// previous poll. A trailing partial line is left for the next poll.
pub struct FileTail {
    path: PathBuf,
    offset: u64,
    line_number: usize,
}

impl FileTail {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            offset: 0,
            line_number: 0,
        }
    }

    /// Byte offset of the first unread line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn poll(&mut self) -> Result<Vec<SourceItem>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        if len < self.offset {
            // The file was replaced or truncated; start over.
            debug!(path = %self.path.display(), "event file shrank; rereading from start");
            self.offset = 0;
            self.line_number = 0;
        }
        file.seek(SeekFrom::Start(self.offset))?;
        let mut chunk = Vec::new();
        file.read_to_end(&mut chunk)?;

        let Some(last_newline) = chunk.iter().rposition(|b| *b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &chunk[..=last_newline];
        self.offset += complete.len() as u64;

        let mut items = Vec::new();
        for line in complete[..last_newline].split(|b| *b == b'\n') {
            self.line_number += 1;
            if let Some(item) = decode_bytes(self.line_number, line) {
                items.push(item);
            }
        }
        Ok(items)
    }
}
