use std::{convert::TryInto, mem::size_of};

use bit_vec::BitVec;

/// In-memory writer used to assemble page images.
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.encode().as_slice());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }

    /// Finish a page image: the payload must fit in `size`, the rest is
    /// zero filled.
    pub fn to_padded_bytes(&self, size: usize) -> Vec<u8> {
        let mut buf = self.buf.clone();

        if buf.len() > size {
            panic!(
                "buffer size is larger than the given size: {} > {}",
                buf.len(),
                size
            );
        }

        buf.resize(size, 0);
        buf
    }
}

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self;
}

pub fn read_into<T: Decodeable, R: std::io::Read>(reader: &mut R) -> T {
    T::decode_from(reader)
}

pub fn read_exact<R: std::io::Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .unwrap_or_else(|_| panic!("io error, expect {} bytes", bytes_count));
    buffer
}

/// Pack a slot bitmap into bytes, slot 0 landing on the least
/// significant bit of byte 0. Page layouts fix the bitmap size, so no
/// length prefix is written.
pub fn encode_bitmap(bits: &BitVec) -> Vec<u8> {
    let mut buf = vec![0u8; crate::utils::ceil_div(bits.len(), 8)];
    for (i, bit) in bits.iter().enumerate() {
        if bit {
            buf[i / 8] |= 1 << (i % 8);
        }
    }
    buf
}

pub fn decode_bitmap(bytes: &[u8], slots: usize) -> BitVec {
    let mut bits = BitVec::from_elem(slots, false);
    for i in 0..slots {
        if bytes[i / 8] & (1 << (i % 8)) != 0 {
            bits.set(i, true);
        }
    }
    bits
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            // All integers on disk are two's-complement big-endian.
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_be_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
                    let bytes = read_exact(reader, size_of::<Self>());
                    Self::from_be_bytes(bytes.try_into().unwrap())
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i8, i16, i32, i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_round_trip() {
        let mut writer = ByteWriter::new();
        writer.write(&0x01020304_i32);
        writer.write(&0x0506_u16);
        let bytes = writer.to_bytes();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6]);

        let mut reader = std::io::Cursor::new(bytes);
        assert_eq!(read_into::<i32, _>(&mut reader), 0x01020304);
        assert_eq!(read_into::<u16, _>(&mut reader), 0x0506);
    }

    #[test]
    fn test_bitmap_is_lsb_first() {
        let mut bits = BitVec::from_elem(10, false);
        bits.set(0, true);
        bits.set(9, true);

        let bytes = encode_bitmap(&bits);
        assert_eq!(bytes, vec![0b0000_0001, 0b0000_0010]);
        assert_eq!(decode_bitmap(&bytes, 10), bits);
    }

    #[test]
    fn test_padded_page_image() {
        let mut writer = ByteWriter::new();
        writer.write(&7_u32);
        let image = writer.to_padded_bytes(16);
        assert_eq!(image.len(), 16);
        assert_eq!(&image[..4], &[0, 0, 0, 7]);
        assert!(image[4..].iter().all(|b| *b == 0));
    }
}
