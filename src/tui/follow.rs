use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

/// Tails a log file and hands out newly appended whole-line chunks.
///
/// The host-bridge contract only ever delivers complete lines, so bytes
/// after the last newline are carried until the rest of the line arrives.
#[derive(Debug)]
pub struct LogFollower {
    path: PathBuf,
    offset: u64,
    carry: Vec<u8>,
}

impl LogFollower {
    /// `offset` is the size of the initial contents already handed to the
    /// builder.
    pub fn new(path: PathBuf, offset: u64) -> Self {
        Self {
            path,
            offset,
            carry: Vec::new(),
        }
    }

    /// Read whatever was appended since the last poll. Returns a chunk
    /// ending on a line boundary, or `None` when there is nothing complete.
    pub fn poll(&mut self) -> io::Result<Option<String>> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len < self.offset {
            // The file shrank (rotation); start over from the beginning.
            log::info!("log file {} was rotated, re-reading", self.path.display());
            self.offset = 0;
            self.carry.clear();
        }
        if len > self.offset {
            file.seek(SeekFrom::Start(self.offset))?;
            let mut buffer = Vec::new();
            let read = file.take(len - self.offset).read_to_end(&mut buffer)?;
            self.offset += read as u64;
            self.carry.extend_from_slice(&buffer[..read]);
        }

        let Some(newline) = self.carry.iter().rposition(|&b| b == b'\n') else {
            return Ok(None);
        };
        let rest = self.carry.split_off(newline + 1);
        let chunk = std::mem::replace(&mut self.carry, rest);
        Ok(Some(String::from_utf8_lossy(&chunk).into_owned()))
    }
}
