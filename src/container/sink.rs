use std::io::{Seek, SeekFrom, Write};

/// Output that is written front to back but can be revisited once the body
/// is complete.
pub trait PatchSink: Write {
    fn position(&mut self) -> std::io::Result<u64>;

    /// Overwrites `bytes` at `offset`, leaving the write position unchanged.
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()>;
}

impl<W: Write + Seek> PatchSink for W {
    fn position(&mut self) -> std::io::Result<u64> {
        self.stream_position()
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        let resume = self.stream_position()?;
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(bytes)?;
        self.seek(SeekFrom::Start(resume))?;
        Ok(())
    }
}

/// Pending rewrites of already written bytes, applied together at the end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Patches(Vec<(u64, Vec<u8>)>);

impl Patches {
    pub fn push(&mut self, offset: u64, bytes: impl Into<Vec<u8>>) {
        self.0.push((offset, bytes.into()));
    }

    pub fn push_u32(&mut self, offset: u64, value: u32) {
        self.push(offset, value.to_be_bytes());
    }

    /// Patches may only target bytes the sink already holds.
    pub fn apply(&self, sink: &mut impl PatchSink) -> std::io::Result<()> {
        let end = sink.position()?;
        for (offset, bytes) in &self.0 {
            if offset + bytes.len() as u64 > end {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("patch at {offset} runs past the written data ({end} bytes)"),
                ));
            }
            sink.write_at(*offset, bytes)?;
        }
        sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn write_at_keeps_position() {
        let mut sink = Cursor::new(vec![]);
        sink.write_all(&[0; 8]).unwrap();
        sink.write_at(2, &[1, 2]).unwrap();
        sink.write_all(&[9]).unwrap();

        assert_eq!(sink.position(), 9);
        assert_eq!(sink.into_inner(), [0, 0, 1, 2, 0, 0, 0, 0, 9]);
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let mut patches = Patches::default();
        patches.push_u32(4, 0xdead_beef);
        patches.push(0, *b"ab");

        let mut sink = Cursor::new(vec![]);
        sink.write_all(&[0; 12]).unwrap();
        patches.apply(&mut sink).unwrap();
        let once = sink.get_ref().clone();
        patches.apply(&mut sink).unwrap();

        assert_eq!(sink.get_ref(), &once);
        assert_eq!(&once[..8], b"ab\0\0\xde\xad\xbe\xef");
        assert_eq!(sink.stream_position().unwrap(), 12);
    }

    #[test]
    fn patch_past_end_is_rejected() {
        let mut patches = Patches::default();
        patches.push_u32(10, 1);

        let mut sink = Cursor::new(vec![0u8; 12]);
        sink.seek(SeekFrom::End(0)).unwrap();
        assert!(patches.apply(&mut sink).is_err());
        assert_eq!(sink.get_ref(), &[0u8; 12]);
    }
}
