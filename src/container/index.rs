use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::format::EOF_OFFSET;

/// Start offsets of compressed chunks, stored as a fixed-size table of
/// u32 BE entries. The entry after the last chunk holds the end of the
/// stream; every entry after that is [`EOF_OFFSET`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingIndex {
    capacity: usize,
    starts: Vec<u32>,
    end: Option<u32>,
}

impl StreamingIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            starts: vec![],
            end: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the table on disk.
    pub fn byte_len(&self) -> usize {
        self.capacity * 4
    }

    /// Number of chunks recorded so far.
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn end(&self) -> Option<u64> {
        self.end.map(u64::from)
    }

    /// Records the start of the next chunk. The last slot stays reserved
    /// for the end marker.
    pub fn push(&mut self, offset: u64) -> Result<()> {
        if self.starts.len() + 1 >= self.capacity {
            return Err(Error::IndexOverflow {
                chunk: self.starts.len(),
                capacity: self.capacity,
            });
        }

        let offset = Self::entry(offset)?;
        if self.starts.last().is_some_and(|&last| last >= offset) {
            return Err(Error::Corrupt(format!(
                "chunk offset {offset} does not follow {:?}",
                self.starts.last()
            )));
        }

        self.starts.push(offset);
        Ok(())
    }

    /// Records where the chunk stream ends.
    pub fn finish(&mut self, end: u64) -> Result<()> {
        let end = Self::entry(end)?;
        if self.starts.last().is_some_and(|&last| last >= end) {
            return Err(Error::Corrupt(format!("stream end {end} precedes the last chunk")));
        }
        self.end = Some(end);
        Ok(())
    }

    fn entry(offset: u64) -> Result<u32> {
        u32::try_from(offset)
            .ok()
            .filter(|&offset| offset != EOF_OFFSET)
            .ok_or(Error::FieldOverflow {
                field: "index offset",
                value: offset,
            })
    }

    /// Byte span of chunk `chunk`, once the end is known.
    pub fn span(&self, chunk: usize) -> Option<(u64, u64)> {
        let start = *self.starts.get(chunk)?;
        let end = match self.starts.get(chunk + 1) {
            Some(&next) => next,
            None => self.end?,
        };
        Some((start as u64, end as u64))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(self.byte_len());
        self.starts
            .iter()
            .chain(self.end.iter())
            .copied()
            .chain(core::iter::repeat(EOF_OFFSET))
            .take(self.capacity)
            .for_each(|entry| out.put_u32(entry));
        out.to_vec()
    }

    /// Reads a table written by [`StreamingIndex::to_bytes`]. The last
    /// populated entry is taken as the end marker.
    pub fn parse(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::Corrupt(format!(
                "index table of {} bytes is not a whole number of entries",
                bytes.len()
            )));
        }

        let capacity = bytes.len() / 4;
        let mut entries = vec![];
        while bytes.has_remaining() {
            let entry = bytes.get_u32();
            if entry == EOF_OFFSET {
                break;
            }
            if entries.last().is_some_and(|&last| last >= entry) {
                return Err(Error::Corrupt(format!(
                    "index entry {} ({entry}) is not after the previous one",
                    entries.len()
                )));
            }
            entries.push(entry);
        }

        if bytes.chunks_exact(4).any(|rest| rest != EOF_OFFSET.to_be_bytes()) {
            return Err(Error::Corrupt("index has entries after the end marker".into()));
        }

        let end = entries.pop();
        Ok(Self {
            capacity,
            starts: entries,
            end,
        })
    }
}
