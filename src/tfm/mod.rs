use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use log::debug;

use crate::dvi::file_reader::DVIFileReader;
use crate::error::{DviError, Result};
use crate::fixed::fix2comp;

#[cfg(test)]
pub mod test_data;

/// A TeX Font Metric file.
///
/// This covers only the minimum the DVI interpreter needs: the checksum
/// (verified against font definitions), the raw design size word, and the
/// per-character dimensions. The dimension tables are maps because the
/// character range of a font need not start at zero.
#[derive(Debug, PartialEq, Eq)]
pub struct TFMFile {
    pub checksum: u32,
    pub design_size: u32,
    pub width: HashMap<u32, i32>,
    pub height: HashMap<u32, i32>,
    pub depth: HashMap<u32, i32>,
}

impl TFMFile {
    pub fn new<T: Read + Seek>(reader: T, filename: &str) -> Result<TFMFile> {
        let mut reader = DVIFileReader::new(reader);
        let short = |err: io::Error| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                DviError::malformed(filename, "file too short")
            } else {
                err.into()
            }
        };

        // The 24-byte prolog holds twelve 16-bit table lengths; only the
        // header length, character range and dimension-table sizes matter
        // here.
        let _lf = reader.read_u16().map_err(short)?;
        let lh = reader.read_u16().map_err(short)?;
        let bc = reader.read_u16().map_err(short)?;
        let ec = reader.read_u16().map_err(short)?;
        let nw = reader.read_u16().map_err(short)?;
        let nh = reader.read_u16().map_err(short)?;
        let nd = reader.read_u16().map_err(short)?;
        let _rest = reader.read_array(10).map_err(short)?;
        debug!(
            "{}: lh={}, bc={}, ec={}, nw={}, nh={}, nd={}",
            filename, lh, bc, ec, nw, nh, nd
        );

        if lh < 2 {
            return Err(DviError::malformed(filename, "header too short"));
        }
        let header = reader.read_array(4 * lh as usize).map_err(short)?;
        let checksum = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let design_size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        // The rest of the header is the coding scheme and similar, unused.

        let nchars = (i32::from(ec) - i32::from(bc) + 1).max(0) as usize;
        let char_info = reader.read_array(4 * nchars).map_err(short)?;
        let widths = Self::read_words(&mut reader, nw).map_err(short)?;
        let heights = Self::read_words(&mut reader, nh).map_err(short)?;
        let depths = Self::read_words(&mut reader, nd).map_err(short)?;

        let mut width = HashMap::new();
        let mut height = HashMap::new();
        let mut depth = HashMap::new();
        let index = |table: &[u32], idx: usize| -> Result<i32> {
            table.get(idx).map(|&word| fix2comp(word)).ok_or_else(|| {
                DviError::malformed(filename, "char info indexes past a dimension table")
            })
        };
        for (idx, chr) in (u32::from(bc)..=u32::from(ec)).enumerate().take(nchars) {
            let byte0 = char_info[4 * idx] as usize;
            let byte1 = char_info[4 * idx + 1] as usize;
            width.insert(chr, index(&widths, byte0)?);
            height.insert(chr, index(&heights, byte1 >> 4)?);
            depth.insert(chr, index(&depths, byte1 & 0xf)?);
        }

        Ok(TFMFile {
            checksum,
            design_size,
            width,
            height,
            depth,
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<TFMFile> {
        let path = path.as_ref();
        debug!("opening tfm file {}", path.display());
        let file = File::open(path)?;
        TFMFile::new(BufReader::new(file), &path.display().to_string())
    }

    fn read_words<T: Read + Seek>(
        reader: &mut DVIFileReader<T>,
        count: u16,
    ) -> io::Result<Vec<u32>> {
        (0..count).map(|_| reader.read_u32()).collect()
    }
}
