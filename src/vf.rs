use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;

use crate::cache::{with_default_cache, TeXSupportCache};
use crate::dvi::dispatch::DVIState;
use crate::dvi::machine::DVIMachine;
use crate::dvi::{RawBox, RawText};
use crate::error::Result;
use crate::paths::find_tex_files;

/// A virtual font (`*.vf` file) containing subroutines for dvi files.
///
/// The format is a derivative of dvi: each character is defined by a packet
/// of dvi instructions that place marks in other fonts. The reader shares
/// the dvi opcode machinery; only the framing loop differs. The file is
/// read completely during construction and closed before returning.
#[derive(Debug)]
pub struct VFFile {
    pub(crate) chars: HashMap<u32, VFChar>,
}

/// The marks a packet defines for one character, in DVI units, plus the
/// advance width from the packet header.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VFChar {
    pub text: Vec<RawText>,
    pub boxes: Vec<RawBox>,
    #[allow(dead_code)]
    pub width: i64,
}

impl VFFile {
    pub fn new<P: AsRef<Path>>(filename: P, cache: Option<&mut TeXSupportCache>) -> Result<Self> {
        let path = filename.as_ref();
        debug!("Vf: {}", path.display());
        let file = File::open(path)?;
        VFFile::from_reader(BufReader::new(file), path.display().to_string(), cache)
    }

    pub(crate) fn from_reader<R: Read + Seek>(
        reader: R,
        filename: String,
        mut cache: Option<&mut TeXSupportCache>,
    ) -> Result<Self> {
        let mut machine = DVIMachine::new(reader, filename);

        let fontnames = read_fonts(&mut machine)?;
        let queries: Vec<String> = fontnames
            .iter()
            .flat_map(|name| {
                ["tfm", "vf", "pfb"]
                    .iter()
                    .map(move |suffix| format!("{}.{}", name, suffix))
            })
            .collect();
        machine.pathnames = find_tex_files(&queries, cache.as_deref_mut())?;
        match cache {
            Some(cache) => cache.optimize()?,
            None => with_default_cache(|cache| cache.optimize())?,
        }

        read_packets(&mut machine)
    }
}

/// Scan the font-definition section at the start of the vf file and return
/// the names of the fonts it defines, without interpreting them.
fn read_fonts<R: Read + Seek>(machine: &mut DVIMachine<R>) -> Result<Vec<String>> {
    let reader = &mut machine.reader;
    reader.seek(SeekFrom::Start(0))?;
    let mut fonts = Vec::new();
    loop {
        let byte = reader.read_u8()?;
        match byte {
            243..=246 => {
                let _k = reader.read_arg((byte - 242) as usize, false)?;
                let _c = reader.read_arg(4, false)?;
                let _s = reader.read_arg(4, false)?;
                let _d = reader.read_arg(4, false)?;
                let a = reader.read_arg(1, false)? as usize;
                let l = reader.read_arg(1, false)? as usize;
                let name = reader.read_array(a + l)?;
                fonts.push(String::from_utf8_lossy(&name[name.len() - l..]).into_owned());
            }
            247 => {
                let _i = reader.read_arg(1, false)?;
                let k = reader.read_arg(1, false)? as usize;
                let _comment = reader.read_array(k)?;
                let _checksum = reader.read_arg(4, false)?;
                let _design_size = reader.read_arg(4, false)?;
            }
            _ => break,
        }
    }
    reader.seek(SeekFrom::Start(0))?;
    fonts.sort();
    fonts.dedup();
    Ok(fonts)
}

fn read_packets<R: Read + Seek>(machine: &mut DVIMachine<R>) -> Result<VFFile> {
    let mut chars = HashMap::new();
    let mut first_font: Option<i64> = None;
    let mut packet_char: u32 = 0;
    let mut packet_width: i64 = 0;
    let mut packet_ends: u64 = 0;

    loop {
        let byte = match machine.reader.read_u8() {
            Ok(byte) => byte,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(machine.malformed("unexpected end of vf file"));
            }
            Err(err) => return Err(err.into()),
        };

        // Inside a packet the byte is a dvi instruction, until the packet's
        // declared length runs out.
        if machine.state == DVIState::InPage {
            let byte_at = machine.reader.tell() - 1;
            if byte_at == packet_ends {
                chars.insert(
                    packet_char,
                    VFChar {
                        text: std::mem::take(&mut machine.text),
                        boxes: std::mem::take(&mut machine.boxes),
                        width: packet_width,
                    },
                );
                machine.state = DVIState::Outer;
                // fall through to the out-of-packet handling of this byte
            } else if byte_at > packet_ends {
                return Err(machine.malformed("packet length mismatch in vf file"));
            } else {
                if byte == 139 || byte == 140 || byte >= 243 {
                    return Err(
                        machine.malformed(format!("inappropriate opcode {} in vf file", byte))
                    );
                }
                machine.execute(byte)?;
                continue;
            }
        }

        match byte {
            0..=241 => {
                // a short packet, length given by the opcode itself
                let packet_len = u64::from(byte);
                packet_char = machine.reader.read_arg(1, false)? as u32;
                packet_width = machine.reader.read_arg(3, false)?;
                packet_ends = init_packet(machine, first_font, packet_len)?;
            }
            242 => {
                // a long packet
                let packet_len = machine.reader.read_arg(4, false)? as u64;
                packet_char = machine.reader.read_arg(4, false)? as u32;
                packet_width = machine.reader.read_arg(4, false)?;
                packet_ends = init_packet(machine, first_font, packet_len)?;
            }
            243..=246 => {
                let k = machine.reader.read_arg((byte - 242) as usize, byte == 246)?;
                let c = machine.reader.read_arg(4, false)? as u32;
                let s = machine.reader.read_arg(4, false)?;
                let d = machine.reader.read_arg(4, false)?;
                let a = machine.reader.read_arg(1, false)? as usize;
                let l = machine.reader.read_arg(1, false)? as usize;
                machine.fnt_def_real(k, c, s, d, a, l)?;
                if first_font.is_none() {
                    first_font = Some(k);
                }
            }
            247 => {
                let i = machine.reader.read_arg(1, false)?;
                let k = machine.reader.read_arg(1, false)? as usize;
                let comment = machine.reader.read_array(k)?;
                let _checksum = machine.reader.read_arg(4, false)?;
                let _design_size = machine.reader.read_arg(4, false)?;
                if machine.state != DVIState::Pre {
                    return Err(machine.malformed("pre command in middle of vf file"));
                }
                if i != 202 {
                    return Err(machine.malformed(format!("unknown vf format {}", i)));
                }
                if !comment.is_empty() {
                    debug!("vf file comment: {}", String::from_utf8_lossy(&comment));
                }
                machine.state = DVIState::Outer;
            }
            248 => break, // postamble, the rest is padding
            _ => {
                return Err(machine.malformed(format!("unknown vf opcode {}", byte)));
            }
        }
    }

    Ok(VFFile { chars })
}

/// Enter a packet: reset the registers and marks, select the vf's default
/// font, and return the offset at which the packet ends.
fn init_packet<R: Read + Seek>(
    machine: &mut DVIMachine<R>,
    first_font: Option<i64>,
    packet_len: u64,
) -> Result<u64> {
    if machine.state != DVIState::Outer {
        return Err(machine.malformed("misplaced packet in vf file"));
    }
    machine.reset_registers();
    machine.f = first_font;
    machine.state = DVIState::InPage;
    Ok(machine.reader.tell() + packet_len)
}
