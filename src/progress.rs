use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::date::format_elapsed;

/// Cells in the progress bar.
pub const BAR_WIDTH: usize = 25;

/// Single-line download indicator.
///
/// The total size of a streamed response is unknown, so the bar is not a
/// percentage: it gains one `*` per chunk and starts over after
/// [`BAR_WIDTH`] chunks.
pub struct ProgressBar<W: Write> {
    out: W,
    filled: usize,
    bytes: u64,
    started: Instant,
}

impl ProgressBar<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write> ProgressBar<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            filled: 0,
            bytes: 0,
            started: Instant::now(),
        }
    }

    /// Draws the empty bar.
    pub fn start(&mut self) -> io::Result<()> {
        let line = render(0, 0, self.started.elapsed());
        write!(self.out, "{line}\r")?;
        self.out.flush()
    }

    /// Records one received chunk of `len` bytes and redraws.
    pub fn tick(&mut self, len: usize) -> io::Result<()> {
        self.filled += 1;
        self.bytes += len as u64;
        let line = render(self.filled, self.bytes, self.started.elapsed());
        write!(self.out, "\r{line}\r")?;
        if self.filled >= BAR_WIDTH {
            self.filled = 0;
        }
        self.out.flush()
    }

    /// Draws the full bar and ends the line.
    pub fn finish(&mut self) -> io::Result<()> {
        let line = render(BAR_WIDTH, self.bytes, self.started.elapsed());
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn render(filled: usize, bytes: u64, elapsed: Duration) -> String {
    let filled = filled.min(BAR_WIDTH);
    format!(
        "DOWNLOADING: [{}{}] ({} KB) {}",
        "*".repeat(filled),
        " ".repeat(BAR_WIDTH - filled),
        bytes / 1000,
        format_elapsed(elapsed)
    )
}
