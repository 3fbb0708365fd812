use std::cmp::{max, min};
use std::fs;
use std::fs::File;
use std::io;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;

use crate::cache::{with_default_cache, TeXSupportCache};
use crate::dvi::dispatch::DVIState;
use crate::dvi::machine::DVIMachine;
use crate::dvi::{Box, Page, Text};
use crate::error::{DviError, Result};
use crate::paths::find_tex_files;

/// A reader for a dvi ("device-independent") file, as produced by TeX.
///
/// Pages are read by iteration, in file order only. The underlying file is
/// owned from construction and released when the reader goes out of scope.
///
/// The dpi value chooses the units of the produced coordinates; pass `None`
/// to get TeX's internal units, which are mostly useful for debugging. The
/// cache parameter allows injecting a support cache; the default is the
/// shared process-wide one.
pub struct DVIReader<R: Read + Seek> {
    machine: DVIMachine<R>,
    dpi: Option<f64>,
    baseline: Option<f64>,
    fontnames: Vec<String>,
}

impl DVIReader<BufReader<File>> {
    pub fn new<P: AsRef<Path>>(
        filename: P,
        dpi: Option<f64>,
        cache: Option<&mut TeXSupportCache>,
    ) -> Result<Self> {
        let path = filename.as_ref();
        debug!("Dvi: {}", path.display());
        let file = File::open(path)?;
        let baseline = read_baseline(path)?;
        DVIReader::from_reader(
            BufReader::new(file),
            path.display().to_string(),
            dpi,
            baseline,
            cache,
        )
    }
}

impl<R: Read + Seek> DVIReader<R> {
    pub(crate) fn from_reader(
        reader: R,
        filename: String,
        dpi: Option<f64>,
        baseline: Option<f64>,
        mut cache: Option<&mut TeXSupportCache>,
    ) -> Result<Self> {
        let mut machine = DVIMachine::new(reader, filename);
        let fontnames = read_fonts(&mut machine)?;

        // Populate the support cache with the pathnames every referenced
        // font might need, in one locator call.
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

        Ok(DVIReader {
            machine,
            dpi,
            baseline,
            fontnames,
        })
    }

    /// The names of all fonts the postamble defines, sorted.
    pub fn fontnames(&self) -> &[String] {
        &self.fontnames
    }

    /// Read one page worth of opcodes. `Ok(true)` means a page finished,
    /// `Ok(false)` means the postamble was reached and no page remains.
    fn read_page(&mut self) -> Result<bool> {
        loop {
            let opcode = match self.machine.reader.read_u8() {
                Ok(opcode) => opcode,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(self.machine.malformed("unexpected end of file"));
                }
                Err(err) => return Err(err.into()),
            };
            self.machine.execute(opcode)?;
            if opcode == 140 {
                // end of page
                return Ok(true);
            }
            if self.machine.state == DVIState::PostPost {
                return Ok(false);
            }
        }
    }

    /// Turn the marks of the page just read into a `Page`, converting
    /// coordinates to dpi units unless raw units were requested.
    fn output(&mut self) -> Page {
        let text = std::mem::take(&mut self.machine.text);
        let boxes = std::mem::take(&mut self.machine.boxes);

        let mut minx = i64::max_value();
        let mut miny = i64::max_value();
        let mut maxx = i64::min_value();
        let mut maxy = i64::min_value();
        let mut maxy_pure = i64::min_value();
        for mark in &boxes {
            minx = min(minx, mark.x);
            miny = min(miny, mark.y - mark.height);
            maxx = max(maxx, mark.x + mark.width);
            maxy = max(maxy, mark.y);
            maxy_pure = max(maxy_pure, mark.y);
        }
        for mark in &text {
            let (height, depth) = mark.font.height_depth_of(mark.glyph);
            minx = min(minx, mark.x);
            miny = min(miny, mark.y - height);
            maxx = max(maxx, mark.x + mark.width);
            maxy = max(maxy, mark.y + depth);
            maxy_pure = max(maxy_pure, mark.y);
        }
        if text.is_empty() && boxes.is_empty() {
            minx = 0;
            miny = 0;
            maxx = 0;
            maxy = 0;
            maxy_pure = 0;
        }

        match self.dpi {
            None => Page {
                // Raw dvi coordinates, for debugging.
                text: text
                    .into_iter()
                    .map(|t| Text {
                        x: t.x as f64,
                        y: t.y as f64,
                        font: t.font,
                        glyph: t.glyph,
                        width: t.width as f64,
                    })
                    .collect(),
                boxes: boxes
                    .into_iter()
                    .map(|b| Box {
                        x: b.x as f64,
                        y: b.y as f64,
                        height: b.height as f64,
                        width: b.width as f64,
                    })
                    .collect(),
                width: (maxx - minx) as f64,
                height: (maxy_pure - miny) as f64,
                descent: (maxy - maxy_pure) as f64,
            },
            Some(dpi) => {
                // Convert from TeX's "scaled points" to dpi units, flipping
                // the y axis so the origin is at the page's lower left.
                let d = dpi / (72.27 * 65536.0);
                let descent = match self.baseline {
                    Some(baseline) => baseline,
                    None => (maxy - maxy_pure) as f64 * d,
                };
                Page {
                    text: text
                        .into_iter()
                        .map(|t| Text {
                            x: (t.x - minx) as f64 * d,
                            y: (maxy - t.y) as f64 * d - descent,
                            font: t.font,
                            glyph: t.glyph,
                            width: t.width as f64 * d,
                        })
                        .collect(),
                    boxes: boxes
                        .into_iter()
                        .map(|b| Box {
                            x: (b.x - minx) as f64 * d,
                            y: (maxy - b.y) as f64 * d - descent,
                            height: b.height as f64 * d,
                            width: b.width as f64 * d,
                        })
                        .collect(),
                    width: (maxx - minx) as f64 * d,
                    height: (maxy_pure - miny) as f64 * d,
                    descent,
                }
            }
        }
    }
}

impl<R: Read + Seek> Iterator for DVIReader<R> {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Result<Page>> {
        if self.machine.state == DVIState::PostPost {
            return None;
        }
        match self.read_page() {
            Ok(true) => Some(Ok(self.output())),
            Ok(false) => None,
            Err(err) => {
                // An error ends the iteration.
                self.machine.state = DVIState::PostPost;
                Some(Err(err))
            }
        }
    }
}

/// Read the postamble of the file and return the sorted names of the fonts
/// it defines. The scan starts from the end of the file, skipping over the
/// 223 padding bytes to find the post-postamble pointer.
fn read_fonts<R: Read + Seek>(machine: &mut DVIMachine<R>) -> Result<Vec<String>> {
    let filename = machine.filename.clone();
    let reader = &mut machine.reader;
    let mut offset: i64 = -1;
    let mut byte = 0u8;
    while offset > -100 {
        reader.seek(SeekFrom::End(offset))?;
        byte = reader.read_u8()?;
        if byte != 223 {
            break;
        }
        offset -= 1;
    }
    if offset >= -4 {
        return Err(machine.malformed("too few 223 bytes"));
    }
    if byte != 2 {
        return Err(machine.malformed("post-postamble identification byte not 2"));
    }
    reader.seek(SeekFrom::End(offset - 4))?;
    let post_offset = reader.read_u32()?;
    reader.seek(SeekFrom::Start(u64::from(post_offset)))?;
    let byte = match reader.read_u8() {
        Ok(byte) => byte,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(machine.malformed(format!(
                "postamble offset {} out of range",
                post_offset
            )));
        }
        Err(err) => return Err(err.into()),
    };
    if byte != 248 {
        return Err(machine.malformed(format!("postamble not found at offset {}", post_offset)));
    }

    // Skip the postamble header: pointer, num, den, mag, the maximum page
    // dimensions, the stack depth and the page count.
    reader.skip(28)?;
    let mut fonts = Vec::new();
    loop {
        let byte = reader.read_u8()?;
        match byte {
            243..=246 => {
                let _k = reader.read_arg((byte - 243 + 1) as usize, byte == 246)?;
                let _c = reader.read_arg(4, false)?;
                let _s = reader.read_arg(4, false)?;
                let _d = reader.read_arg(4, false)?;
                let a = reader.read_arg(1, false)? as usize;
                let l = reader.read_arg(1, false)? as usize;
                let name = reader.read_array(a + l)?;
                let name = std::str::from_utf8(&name[name.len() - l..])
                    .map_err(|_| {
                        DviError::malformed(&filename, "non-ascii font name in postamble")
                    })?
                    .to_string();
                fonts.push(name);
            }
            249 => break,
            _ => {
                return Err(machine.malformed(format!("opcode {} in postamble", byte)));
            }
        }
    }
    reader.seek(SeekFrom::Start(0))?;
    fonts.sort();
    fonts.dedup();
    Ok(fonts)
}

/// Look for a sidecar file written by the LaTeX preview package, holding
/// the page depth for tight-bounding-box rendering. Non-existence is not an
/// error.
fn read_baseline(path: &Path) -> Result<Option<f64>> {
    let baseline_path = path.with_extension("baseline");
    if !baseline_path.is_file() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&baseline_path)?;
    let malformed = || {
        DviError::malformed(
            &baseline_path.display().to_string(),
            "expected three whitespace-separated numbers",
        )
    };
    let mut parts = contents.split_whitespace();
    let depth = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_height), Some(depth), Some(_width), None) => depth,
        _ => return Err(malformed()),
    };
    let depth = depth.parse::<f64>().map_err(|_| malformed())?;
    Ok(Some(depth))
}
