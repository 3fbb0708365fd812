use std::collections::HashMap;
use std::io::{Read, Seek};

use log::debug;

use crate::dvi::dispatch::{entry_for, ArgSpec, DVIState, Handler};
use crate::dvi::file_reader::DVIFileReader;
use crate::dvi::{RawBox, RawText};
use crate::error::{DviError, Result};
use crate::fixed::mul2012;
use crate::font::{tfm_file, vf_file, DVIFont};
use crate::paths::find_tex_file;

/// The machinery shared between the DVI page interpreter and the VF packet
/// interpreter: the positional reader, the parser state, the registers that
/// exist while marks are being placed, and the opcode handlers that mutate
/// them. The two drivers differ only in their framing loops.
pub(crate) struct DVIMachine<R: Read + Seek> {
    pub reader: DVIFileReader<R>,
    pub filename: String,
    pub state: DVIState,

    // Registers, only meaningful while placing marks: the pen position
    // (h, v), the horizontal strides (w, x), the vertical strides (y, z),
    // and the current font selector f.
    pub h: i64,
    pub v: i64,
    pub w: i64,
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub f: Option<i64>,
    pub stack: Vec<(i64, i64, i64, i64, i64, i64)>,

    pub text: Vec<RawText>,
    pub boxes: Vec<RawBox>,
    pub fonts: HashMap<i64, DVIFont>,

    // Support-file locations batched through the cache when the file was
    // opened, so font definitions resolve without further lookups.
    pub pathnames: HashMap<String, Option<String>>,
}

impl<R: Read + Seek> DVIMachine<R> {
    pub fn new(reader: R, filename: String) -> Self {
        DVIMachine {
            reader: DVIFileReader::new(reader),
            filename,
            state: DVIState::Pre,
            h: 0,
            v: 0,
            w: 0,
            x: 0,
            y: 0,
            z: 0,
            f: None,
            stack: Vec::new(),
            text: Vec::new(),
            boxes: Vec::new(),
            fonts: HashMap::new(),
            pathnames: HashMap::new(),
        }
    }

    pub fn malformed(&self, reason: impl Into<String>) -> DviError {
        DviError::malformed(&self.filename, reason)
    }

    /// Zero the registers and forget the accumulated marks, as done at the
    /// start of a page or a VF packet.
    pub fn reset_registers(&mut self) {
        self.h = 0;
        self.v = 0;
        self.w = 0;
        self.x = 0;
        self.y = 0;
        self.z = 0;
        self.stack.clear();
        self.text.clear();
        self.boxes.clear();
    }

    /// Run one opcode: check the state precondition, read the arguments the
    /// dispatch table calls for, and apply the handler.
    pub fn execute(&mut self, opcode: u8) -> Result<()> {
        let entry = entry_for(opcode);
        if let Some(required) = entry.state {
            if self.state != required {
                return Err(DviError::StatePrecondition {
                    file: self.filename.clone(),
                    opcode,
                });
            }
        }
        let delta = opcode - entry.min_opcode;
        let mut args = Vec::with_capacity(entry.args.len());
        for spec in entry.args {
            args.push(self.read_argspec(*spec, delta)?);
        }
        self.run(entry.handler, opcode, &args)
    }

    fn read_argspec(&mut self, spec: ArgSpec, delta: u8) -> Result<Option<i64>> {
        let delta = delta as usize;
        Ok(match spec {
            ArgSpec::Raw => Some(delta as i64),
            ArgSpec::U1 => Some(self.reader.read_arg(1, false)?),
            ArgSpec::U4 => Some(self.reader.read_arg(4, false)?),
            ArgSpec::S4 => Some(self.reader.read_arg(4, true)?),
            ArgSpec::Slen => {
                if delta == 0 {
                    None
                } else {
                    Some(self.reader.read_arg(delta, true)?)
                }
            }
            ArgSpec::Slen1 => Some(self.reader.read_arg(delta + 1, true)?),
            ArgSpec::Ulen1 => Some(self.reader.read_arg(delta + 1, false)?),
            ArgSpec::Olen1 => Some(self.reader.read_arg(delta + 1, delta == 3)?),
        })
    }

    fn run(&mut self, handler: Handler, opcode: u8, args: &[Option<i64>]) -> Result<()> {
        // Only Slen arguments can be absent; req() is for the rest.
        let req = |idx: usize| args[idx].unwrap_or(0);

        match handler {
            Handler::SetChar => {
                let glyph = req(0) as u32;
                self.put_char(glyph, opcode)?;
                let advance = self.current_font(opcode)?.width_of(glyph);
                self.h += advance;
            }
            Handler::SetRule => {
                let (a, b) = (req(0), req(1));
                self.put_rule(a, b);
                self.h += b;
            }
            Handler::PutChar => {
                self.put_char(req(0) as u32, opcode)?;
            }
            Handler::PutRule => {
                self.put_rule(req(0), req(1));
            }
            Handler::Nop => {}
            Handler::Bop => {
                // Ten count registers and the previous-page pointer, all
                // unused here.
                self.state = DVIState::InPage;
                self.reset_registers();
            }
            Handler::Eop => {
                self.state = DVIState::Outer;
                self.h = 0;
                self.v = 0;
                self.w = 0;
                self.x = 0;
                self.y = 0;
                self.z = 0;
                self.stack.clear();
            }
            Handler::Push => {
                self.stack
                    .push((self.h, self.v, self.w, self.x, self.y, self.z));
            }
            Handler::Pop => {
                let (h, v, w, x, y, z) = self
                    .stack
                    .pop()
                    .ok_or_else(|| self.malformed("pop without matching push"))?;
                self.h = h;
                self.v = v;
                self.w = w;
                self.x = x;
                self.y = y;
                self.z = z;
            }
            Handler::Right => {
                self.h += req(0);
            }
            Handler::RightW => {
                if let Some(new_w) = args[0] {
                    self.w = new_w;
                }
                self.h += self.w;
            }
            Handler::RightX => {
                if let Some(new_x) = args[0] {
                    self.x = new_x;
                }
                self.h += self.x;
            }
            Handler::Down => {
                self.v += req(0);
            }
            Handler::DownY => {
                if let Some(new_y) = args[0] {
                    self.y = new_y;
                }
                self.v += self.y;
            }
            Handler::DownZ => {
                if let Some(new_z) = args[0] {
                    self.z = new_z;
                }
                self.v += self.z;
            }
            Handler::FntNum => {
                self.f = Some(req(0));
            }
            Handler::Special => {
                let data = self.reader.read_array(req(0) as usize)?;
                let printable: String = data
                    .iter()
                    .map(|&ch| {
                        if (32..127).contains(&ch) {
                            (ch as char).to_string()
                        } else {
                            format!("<{:02x}>", ch)
                        }
                    })
                    .collect();
                debug!("encountered special: {}", printable);
            }
            Handler::FntDef => {
                let (k, c, s, d) = (req(0), req(1) as u32, req(2), req(3));
                let (a, l) = (req(4) as usize, req(5) as usize);
                self.fnt_def_real(k, c, s, d, a, l)?;
            }
            Handler::Pre => {
                let (i, num, den, mag, k) = (req(0), req(1), req(2), req(3), req(4));
                let _comment = self.reader.read_array(k as usize)?;
                if i != 2 {
                    return Err(DviError::UnknownFormat(i as u8));
                }
                // TeX always writes these exact values; anything else would
                // change the length unit.
                if num != 25400000 || den != 7227 * 65536 {
                    return Err(DviError::NonstandardUnits);
                }
                if mag != 1000 {
                    return Err(DviError::NonstandardMagnification);
                }
                self.state = DVIState::Outer;
            }
            Handler::Post => {
                self.state = DVIState::PostPost;
            }
            Handler::PostPost => {
                return Err(self.malformed("post-postamble opcode 249 outside the postamble"));
            }
            Handler::Unknown => {
                return Err(self.malformed(format!("unknown command: byte {}", opcode)));
            }
        }
        Ok(())
    }

    fn current_font(&self, opcode: u8) -> Result<&DVIFont> {
        let f = self.f.ok_or_else(|| DviError::StatePrecondition {
            file: self.filename.clone(),
            opcode,
        })?;
        self.fonts
            .get(&f)
            .ok_or_else(|| self.malformed(format!("undefined font number {}", f)))
    }

    /// Place one glyph at the current pen position. For a virtual font the
    /// character expands into the marks its packet defines, positioned and
    /// scaled through the outer font's 20.12 scale factor.
    fn put_char(&mut self, glyph: u32, opcode: u8) -> Result<()> {
        let font = self.current_font(opcode)?.clone();
        match &font.vf {
            None => {
                let width = font.width_of(glyph);
                self.text.push(RawText {
                    x: self.h,
                    y: self.v,
                    font: font.clone(),
                    glyph,
                    width,
                });
            }
            Some(vf) => {
                let scale = font.scale;
                let packet = vf.chars.get(&glyph).ok_or_else(|| {
                    self.malformed(format!(
                        "virtual font {} defines no character {}",
                        font.texname, glyph
                    ))
                })?;
                for mark in &packet.text {
                    let subfont = DVIFont::new(
                        mul2012(scale, mark.font.scale),
                        mark.font.tfm.clone(),
                        mark.font.texname.clone(),
                        mark.font.vf.clone(),
                    );
                    let width = subfont.width_of(mark.glyph);
                    self.text.push(RawText {
                        x: self.h + mul2012(mark.x, scale),
                        y: self.v + mul2012(mark.y, scale),
                        font: subfont,
                        glyph: mark.glyph,
                        width,
                    });
                }
                for mark in &packet.boxes {
                    self.boxes.push(RawBox {
                        x: self.h + mul2012(mark.x, scale),
                        y: self.v + mul2012(mark.y, scale),
                        height: mul2012(mark.height, scale),
                        width: mul2012(mark.width, scale),
                    });
                }
            }
        }
        Ok(())
    }

    fn put_rule(&mut self, a: i64, b: i64) {
        // Rules with non-positive extent are suppressed.
        if a > 0 && b > 0 {
            self.boxes.push(RawBox {
                x: self.h,
                y: self.v,
                height: a,
                width: b,
            });
        }
    }

    /// Define font `k` with checksum `c` and scale `s`, reading the `a + l`
    /// name bytes that follow. The metrics file is required; a virtual font
    /// file is optional.
    pub fn fnt_def_real(
        &mut self,
        k: i64,
        c: u32,
        s: i64,
        _d: i64,
        a: usize,
        l: usize,
    ) -> Result<()> {
        let name_bytes = self.reader.read_array(a + l)?;
        let fontname = std::str::from_utf8(&name_bytes[name_bytes.len() - l..])
            .map_err(|_| self.malformed("non-ascii font name in font definition"))?
            .to_string();

        let tfm = match self.pathname_of(&format!("{}.tfm", fontname))? {
            Some(pathname) => tfm_file(&pathname)?,
            None => None,
        };
        let tfm = tfm.ok_or_else(|| DviError::MissingFontMetrics(fontname.clone()))?;
        if c != 0 && tfm.checksum != 0 && c != tfm.checksum {
            return Err(DviError::ChecksumMismatch(fontname));
        }

        let vf = match self.pathname_of(&format!("{}.vf", fontname))? {
            Some(pathname) => vf_file(&pathname)?,
            None => None,
        };

        self.fonts.insert(k, DVIFont::new(s, Some(tfm), fontname, vf));
        Ok(())
    }

    fn pathname_of(&mut self, filename: &str) -> Result<Option<String>> {
        if let Some(entry) = self.pathnames.get(filename) {
            return Ok(entry.clone());
        }
        // Font definitions normally name fonts that were already located
        // when the file was opened; anything else goes through the default
        // cache.
        let found = find_tex_file(filename, None)?;
        self.pathnames.insert(filename.to_string(), found.clone());
        Ok(found)
    }
}
