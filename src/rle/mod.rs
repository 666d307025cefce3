//! Byte-oriented run-length codec used for compressed chunks.
//!
//! Layout: a sequence of commands, each starting with a control byte.
//!
//! ```text
//!   bit 7    bits 6..0
//!   type     size (1..=127)
//!
//!   type 0: literal, `size` raw bytes follow and are copied verbatim
//!   type 1: repeat, one byte follows and is emitted `size` times
//! ```
//!
//! Commands carry no state from one to the next, so every compressed chunk
//! decodes on its own.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Shortest run that is emitted as a repeat command instead of literals.
pub const MIN_REPEAT: usize = 8;

/// Largest value the 7-bit size field can hold.
pub const MAX_COMMAND_SIZE: usize = 127;

const TYPE_REPEAT: u8 = 0x80;
const SIZE_MASK: u8 = 0x7f;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RleError {
    #[error("literal command at offset {offset} needs {needed} more bytes")]
    TruncatedLiteral { offset: usize, needed: usize },
    #[error("repeat command at offset {offset} is missing its value byte")]
    MissingRepeatValue { offset: usize },
}

/// Compresses `input` into literal and repeat commands.
///
/// Runs shorter than [`MIN_REPEAT`] stay in the literal stream in full, so
/// `decompress(compress(x)) == x` for every input.
pub fn compress(input: &[u8]) -> BytesMut {
    let mut output = BytesMut::with_capacity(input.len() / 2 + 2);

    // Pending literals are always a contiguous slice of the input.
    let mut literal_start = 0;
    let mut pos = 0;

    while pos < input.len() {
        let run = run_length(&input[pos..]);

        if run >= MIN_REPEAT {
            put_literals(&mut output, &input[literal_start..pos]);
            put_repeats(&mut output, input[pos], run);
            literal_start = pos + run;
        }

        pos += run;
    }

    put_literals(&mut output, &input[literal_start..]);
    output
}

/// Decompresses a complete command stream.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, RleError> {
    let mut output = Vec::with_capacity(input.len() * 2);
    let mut decoder = StreamDecoder::new();
    decoder.feed(input, &mut output);
    decoder.finish()?;
    Ok(output)
}

fn run_length(data: &[u8]) -> usize {
    let first = data[0];
    data.iter().take_while(|&&b| b == first).count()
}

fn put_literals(output: &mut BytesMut, literals: &[u8]) {
    for block in literals.chunks(MAX_COMMAND_SIZE) {
        output.put_u8(block.len() as u8);
        output.put_slice(block);
    }
}

fn put_repeats(output: &mut BytesMut, value: u8, mut count: usize) {
    while count > 0 {
        let size = count.min(MAX_COMMAND_SIZE);
        output.put_u8(TYPE_REPEAT | size as u8);
        output.put_u8(value);
        count -= size;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Pending {
    #[default]
    Nothing,
    Repeat { size: usize, offset: usize },
    Literal { left: usize, offset: usize },
}

/// Incremental decoder for command streams that arrive in pieces.
///
/// A command may straddle two input buffers: a repeat can lose its value
/// byte to the next buffer, a literal can continue over any number of them.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Pending,
    consumed: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `input` as possible into `output`.
    pub fn feed(&mut self, mut input: &[u8], output: &mut impl BufMut) {
        match self.pending {
            Pending::Nothing => {}
            Pending::Repeat { size, .. } => {
                if !input.has_remaining() {
                    return;
                }
                output.put_bytes(input.get_u8(), size);
                self.consumed += 1;
                self.pending = Pending::Nothing;
            }
            Pending::Literal { left, offset } => {
                let available = left.min(input.remaining());
                output.put_slice(&input[..available]);
                input.advance(available);
                self.consumed += available;
                self.pending = match left - available {
                    0 => Pending::Nothing,
                    left => Pending::Literal { left, offset },
                };
            }
        }

        while input.has_remaining() {
            let offset = self.consumed;
            let control = input.get_u8();
            let size = (control & SIZE_MASK) as usize;
            self.consumed += 1;

            if control & TYPE_REPEAT != 0 {
                if !input.has_remaining() {
                    self.pending = Pending::Repeat { size, offset };
                    return;
                }
                output.put_bytes(input.get_u8(), size);
                self.consumed += 1;
            } else {
                let available = size.min(input.remaining());
                output.put_slice(&input[..available]);
                input.advance(available);
                self.consumed += available;

                if available < size {
                    self.pending = Pending::Literal {
                        left: size - available,
                        offset,
                    };
                }
            }
        }
    }

    /// Fails if the stream ended in the middle of a command.
    pub fn finish(self) -> Result<(), RleError> {
        match self.pending {
            Pending::Nothing => Ok(()),
            Pending::Repeat { offset, .. } => Err(RleError::MissingRepeatValue { offset }),
            Pending::Literal { left, offset } => Err(RleError::TruncatedLiteral {
                offset,
                needed: left,
            }),
        }
    }
}
