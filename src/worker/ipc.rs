//! Newline-delimited framing over pipes.
//!
//! Each line carries one message. Reads work on raw bytes: a line that is
//! not UTF-8 is decoded lossily instead of ending the stream.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::os::fd::OwnedFd;

/// Pipe buffer capacity on both ends.
const PIPE_BUFFER: usize = 64 * 1024;

/// Reads newline-terminated lines from a pipe.
#[derive(Debug)]
pub struct LineReader {
    inner: BufReader<File>,
    bytes: Vec<u8>,
}

impl LineReader {
    pub fn new(fd: impl Into<OwnedFd>) -> Self {
        Self {
            inner: BufReader::with_capacity(PIPE_BUFFER, File::from(fd.into())),
            bytes: Vec::with_capacity(4096),
        }
    }

    /// Next line without its `\n` or `\r\n`, or `None` at EOF.
    ///
    /// A final line with no terminator is still returned.
    pub fn read_line(&mut self) -> io::Result<Option<Cow<'_, str>>> {
        self.bytes.clear();
        if self.inner.read_until(b'\n', &mut self.bytes)? == 0 {
            return Ok(None);
        }
        let line = strip_terminator(&self.bytes);
        Ok(Some(String::from_utf8_lossy(line)))
    }
}

fn strip_terminator(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

/// Writes lines to a pipe, flushing after each one.
#[derive(Debug)]
pub struct LineWriter {
    inner: BufWriter<File>,
}

impl LineWriter {
    pub fn new(fd: impl Into<OwnedFd>) -> Self {
        Self {
            inner: BufWriter::with_capacity(PIPE_BUFFER, File::from(fd.into())),
        }
    }

    /// Write `line`, adding a newline unless it already ends with one.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.inner.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.inner.write_all(b"\n")?;
        }
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed() -> (LineReader, io::PipeWriter) {
        let (reader, writer) = io::pipe().unwrap();
        (LineReader::new(reader), writer)
    }

    #[test]
    fn test_lines_keep_their_order() {
        let (mut reader, raw) = framed();
        let mut writer = LineWriter::new(raw);
        writer.write_line("first").unwrap();
        writer.write_line("second\n").unwrap();
        writer.write_line("").unwrap();
        drop(writer);

        assert_eq!(reader.read_line().unwrap().as_deref(), Some("first"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("second"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some(""));
        assert!(reader.read_line().unwrap().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let (mut reader, mut raw) = framed();
        raw.write_all(b"\xff\xfe\nafter\r\ntail").unwrap();
        drop(raw);

        assert_eq!(
            reader.read_line().unwrap().as_deref(),
            Some("\u{FFFD}\u{FFFD}")
        );
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("after"));
        // Unterminated last line
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("tail"));
        assert!(reader.read_line().unwrap().is_none());
    }

    #[test]
    fn test_line_longer_than_buffer() {
        let (mut reader, raw) = framed();
        let long = "j".repeat(PIPE_BUFFER * 3);
        let sent = long.clone();
        let writer = std::thread::spawn(move || LineWriter::new(raw).write_line(&sent).unwrap());

        assert_eq!(reader.read_line().unwrap().as_deref(), Some(long.as_str()));
        writer.join().unwrap();
    }
}
