use std::io::{self, SeekFrom};
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

/// Byte range `start..end` of the input handled by one mapper. Every block
/// but the last ends just past a `\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start: u64,
    pub end: u64,
}

impl Block {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Cuts `path` into `count` contiguous line-aligned blocks of roughly equal
/// size.
///
/// Boundary `i` is found by probing at `i * (size / count)` and scanning to
/// the end of that line. If the probe falls inside the previous block (lines
/// longer than a block), the scan starts at the previous boundary instead;
/// if no newline follows, the block comes out empty and the remainder is
/// left to the last block.
pub async fn split_file(path: impl AsRef<Path>, count: usize) -> io::Result<Vec<Block>> {
    if count == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "block count must be positive"));
    }
    let file = File::open(path.as_ref()).await?;
    let size = file.metadata().await?.len();
    let nominal = size / count as u64;

    let mut reader = BufReader::new(file);
    let mut blocks = Vec::with_capacity(count);
    let mut low = 0u64;
    let mut line = Vec::new();
    for i in 1..count {
        let probe = (i as u64 * nominal).max(low);
        if probe >= size {
            blocks.push(Block { start: low, end: low });
            continue;
        }
        reader.seek(SeekFrom::Start(probe)).await?;
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if line.last() == Some(&b'\n') {
            let high = probe + n as u64;
            blocks.push(Block { start: low, end: high });
            low = high;
        } else {
            blocks.push(Block { start: low, end: low });
        }
    }
    blocks.push(Block { start: low, end: size });
    Ok(blocks)
}

/// Turns one raw line, with or without its `\n`, into map input: the
/// terminator and every `\r` are dropped.
pub fn decode_line(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\n') {
        raw.pop();
    }
    raw.retain(|&b| b != b'\r');
    match String::from_utf8(raw) {
        Ok(line) => line,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}
