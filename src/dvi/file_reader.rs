use std::io;
use std::io::{Read, Seek, SeekFrom};

/// A wrapper around a reader that provides methods for easily reading the
/// specific bits of data the way they are stored in DVI-flavored files,
/// while keeping track of the current file offset.
pub struct DVIFileReader<T: Read + Seek> {
    reader: T,
    position: u64,
}

// Generate a fixed-width big-endian reader using <type>::from_be_bytes.
macro_rules! generate_int_reader_func {
    (fn $func_name:ident() -> $return_type:ident, $size:expr) => {
        pub fn $func_name(&mut self) -> io::Result<$return_type> {
            let mut buf = [0; $size];
            self.reader.read_exact(&mut buf)?;
            self.position += $size;
            Ok($return_type::from_be_bytes(buf))
        }
    };
}

impl<T: Read + Seek> DVIFileReader<T> {
    pub fn new(reader: T) -> Self {
        DVIFileReader {
            reader,
            position: 0,
        }
    }

    generate_int_reader_func!(fn read_u8() -> u8, 1);
    generate_int_reader_func!(fn read_u16() -> u16, 2);
    generate_int_reader_func!(fn read_u32() -> u32, 4);

    /// Read an integer argument of 1 to 4 bytes, accumulated big-endian in
    /// 64 bits. When `signed` is set, the top bit of the first byte carries
    /// the sign.
    pub fn read_arg(&mut self, nbytes: usize, signed: bool) -> io::Result<i64> {
        debug_assert!((1..=4).contains(&nbytes));
        let buf = self.read_array(nbytes)?;
        let mut value = i64::from(buf[0]);
        if signed && value >= 0x80 {
            value -= 0x100;
        }
        for byte in &buf[1..] {
            value = value * 0x100 + i64::from(*byte);
        }
        Ok(value)
    }

    pub fn read_array(&mut self, size: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; size];
        self.reader.read_exact(&mut buf[..])?;
        self.position += size as u64;
        Ok(buf)
    }

    /// The current offset from the start of the file.
    pub fn tell(&self) -> u64 {
        self.position
    }

    pub fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = self.reader.seek(pos)?;
        Ok(self.position)
    }

    pub fn skip(&mut self, nbytes: i64) -> io::Result<u64> {
        self.seek(SeekFrom::Current(nbytes))
    }
}
