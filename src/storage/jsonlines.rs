use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Lines, Write};
use std::path::Path;
use tracing::warn;

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

/// Open a file for reading, decompressing it when it ends in `.gz`
pub fn open_maybe_gzip(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// File writer that compresses when the path ends in `.gz`.
///
/// Call [`MaybeGzWriter::finish`] when done: dropping it would write the gzip
/// trailer but swallow any error doing so.
pub enum MaybeGzWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl MaybeGzWriter {
    /// Write the gzip trailer (if any) and flush everything to the file
    pub fn finish(self) -> io::Result<()> {
        let mut file = match self {
            MaybeGzWriter::Plain(file) => file,
            MaybeGzWriter::Gzip(encoder) => encoder.finish()?,
        };
        file.flush()
    }
}

impl Write for MaybeGzWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            MaybeGzWriter::Plain(file) => file.write(buf),
            MaybeGzWriter::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            MaybeGzWriter::Plain(file) => file.flush(),
            MaybeGzWriter::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Create a file for writing, compressing it when it ends in `.gz`
pub fn create_maybe_gzip(path: &Path) -> io::Result<MaybeGzWriter> {
    let file = BufWriter::new(File::create(path)?);
    if is_gzip(path) {
        Ok(MaybeGzWriter::Gzip(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(MaybeGzWriter::Plain(file))
    }
}

/// Lines of a possibly gzipped file.
///
/// A read error (typically a truncated archive) ends the iteration with a
/// warning instead of failing, so everything before the damage is kept.
pub struct TolerantLines {
    lines: Lines<Box<dyn BufRead + Send>>,
    path: String,
    done: bool,
}

impl TolerantLines {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            lines: open_maybe_gzip(path)?.lines(),
            path: path.display().to_string(),
            done: false,
        })
    }
}

impl Iterator for TolerantLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        match self.lines.next()? {
            Ok(line) => Some(line),
            Err(e) => {
                warn!("Stopped reading {} early, archive looks truncated: {}", self.path, e);
                self.done = true;
                None
            }
        }
    }
}

/// JSON values of a JSON-lines file; stops at the first line that does not decode
pub struct JsonLines {
    lines: TolerantLines,
    done: bool,
}

impl JsonLines {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            lines: TolerantLines::open(path)?,
            done: false,
        })
    }
}

impl Iterator for JsonLines {
    type Item = serde_json::Value;

    fn next(&mut self) -> Option<serde_json::Value> {
        while !self.done {
            let line = self.lines.next()?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(value) => return Some(value),
                Err(e) => {
                    warn!("JSON line can't be decoded in {}: {}", self.lines.path, e);
                    self.done = true;
                }
            }
        }
        None
    }
}
