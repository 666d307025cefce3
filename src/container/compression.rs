use std::borrow::Cow;

use tap::Pipe;

use crate::error::Result;
use crate::format::Compression;
use crate::rle;

impl Compression {
    /// Packs one serialized chunk for storage.
    pub fn compress<'a>(&self, chunk: &'a [u8]) -> Cow<'a, [u8]> {
        match *self {
            Compression::None => Cow::Borrowed(chunk),
            Compression::Rle => rle::compress(chunk).to_vec().pipe(Cow::Owned),
        }
    }

    /// Inverse of [`Compression::compress`].
    pub fn decompress<'a>(&self, stored: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        match *self {
            Compression::None => Cow::Borrowed(stored),
            Compression::Rle => rle::decompress(stored)?.pipe(Cow::Owned),
        }
        .pipe(Ok)
    }
}
