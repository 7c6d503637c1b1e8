//! First-line truncating writer.
//!
//! Password-store tools print the secret on the first line of stdout and
//! auxiliary text (expiry notes, metadata) on the lines after it.  Wiring a
//! [`FirstLineWriter`] between the child's stdout and the capture buffer
//! isolates exactly the secret value.

use std::io::{self, Write};

/// A writer that forwards bytes up to (not including) the first newline,
/// then silently discards everything else.
///
/// After the newline has been seen, writes still report full acceptance so
/// the producer never observes a short write for output it is allowed to
/// keep emitting.
pub struct FirstLineWriter<W: Write> {
    done: bool,
    inner: W,
}

impl<W: Write> FirstLineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { done: false, inner }
    }
}

impl<W: Write> Write for FirstLineWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.done {
            return Ok(buf.len());
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(i) => {
                let written = self.inner.write(&buf[..i])?;
                if written < i {
                    // Short downstream write: report it as-is and stay open
                    // so the caller can retry the remainder.
                    return Ok(written);
                }
                self.done = true;
                Ok(buf.len())
            }
            None => self.inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        // Always forward: the first-line bytes may still be sitting in a
        // buffered downstream writer even after `done`.
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_bytes_without_newline() {
        let mut buf = Vec::new();
        let mut w = FirstLineWriter::new(&mut buf);
        assert_eq!(w.write(b"hun").unwrap(), 3);
        assert_eq!(w.write(b"ter2").unwrap(), 4);
        assert_eq!(buf, b"hunter2");
    }

    #[test]
    fn truncates_at_first_newline() {
        let mut buf = Vec::new();
        let mut w = FirstLineWriter::new(&mut buf);
        let input = b"hunter2\nnote: expires soon\n";
        assert_eq!(w.write(input).unwrap(), input.len());
        assert_eq!(buf, b"hunter2");
    }

    #[test]
    fn discards_everything_after_the_newline() {
        let mut buf = Vec::new();
        let mut w = FirstLineWriter::new(&mut buf);
        w.write(b"secret\n").unwrap();
        assert_eq!(w.write(b"trailing diagnostics").unwrap(), 20);
        assert_eq!(buf, b"secret");
    }

    #[test]
    fn newline_split_across_writes() {
        let mut buf = Vec::new();
        let mut w = FirstLineWriter::new(&mut buf);
        w.write(b"hun").unwrap();
        let second = b"ter2\nmore";
        assert_eq!(w.write(second).unwrap(), second.len());
        assert_eq!(buf, b"hunter2");
    }

    #[test]
    fn newline_as_first_byte_yields_empty_line() {
        let mut buf = Vec::new();
        let mut w = FirstLineWriter::new(&mut buf);
        let input = b"\nall of this is discarded";
        assert_eq!(w.write(input).unwrap(), input.len());
        assert!(buf.is_empty());
    }

    /// Accepts at most `cap` bytes per call, then refuses with a short write.
    struct ShortWriter {
        cap: usize,
        written: Vec<u8>,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.cap);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Counts flushes so pass-through of `flush` is observable.
    struct FlushCounter {
        flushes: usize,
    }

    impl Write for FlushCounter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn flush_reaches_downstream_even_after_done() {
        let mut w = FirstLineWriter::new(FlushCounter { flushes: 0 });
        w.write(b"secret\nrest").unwrap();
        w.flush().unwrap();
        assert_eq!(w.inner.flushes, 1);
    }

    #[test]
    fn short_downstream_write_is_reported_and_stays_open() {
        let mut w = FirstLineWriter::new(ShortWriter {
            cap: 3,
            written: Vec::new(),
        });
        // Downstream takes only 3 of the 7 bytes before the newline.
        assert_eq!(w.write(b"hunter2\nrest").unwrap(), 3);
        // Not done: a later write with a newline still truncates normally.
        let tail = b"ter2\nrest";
        assert_eq!(w.write(tail).unwrap(), 3);
    }
}
