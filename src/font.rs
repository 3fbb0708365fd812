use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use log::debug;
use lru::LruCache;

use crate::error::Result;
use crate::fixed::mul2012;
use crate::tfm::TFMFile;
use crate::vf::VFFile;

/// A font that a DVI file refers to.
///
/// Holds the font's TeX name and size and knows the widths of its glyphs in
/// glyph-space units (typically 1/1000 of the point size). Comparison and
/// hashing key on the name and size only; the metric handles are
/// implementation aids.
///
/// The size is in Adobe points, converted from the slightly smaller TeX
/// points; the scale is the factor by which the font is scaled from its
/// natural size, as a 20.12 fixed-point integer.
#[derive(Clone)]
pub struct DVIFont {
    pub texname: String,
    pub size: f64,
    pub scale: i64,
    pub widths: Arc<Vec<i32>>,
    pub(crate) tfm: Option<Arc<TFMFile>>,
    pub(crate) vf: Option<Arc<VFFile>>,
}

impl DVIFont {
    pub(crate) fn new(
        scale: i64,
        tfm: Option<Arc<TFMFile>>,
        texname: String,
        vf: Option<Arc<VFFile>>,
    ) -> Self {
        let widths = match &tfm {
            Some(tfm) => {
                let nchars = tfm.width.keys().max().map_or(0, |&last| last + 1);
                (0..nchars)
                    .map(|chr| {
                        let width = i64::from(*tfm.width.get(&chr).unwrap_or(&0));
                        ((1000 * width) >> 20) as i32
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        DVIFont {
            size: size_from_scale(scale),
            texname,
            scale,
            widths: Arc::new(widths),
            tfm,
            vf,
        }
    }

    /// Rebuild a font from cached glyph-space widths, without metric files.
    pub(crate) fn from_widths(scale: i64, texname: String, widths: Vec<i32>) -> Self {
        DVIFont {
            size: size_from_scale(scale),
            texname,
            scale,
            widths: Arc::new(widths),
            tfm: None,
            vf: None,
        }
    }

    /// Width of a glyph in DVI units.
    pub(crate) fn width_of(&self, glyph: u32) -> i64 {
        match self.tfm.as_ref().and_then(|tfm| tfm.width.get(&glyph)) {
            Some(&width) => mul2012(i64::from(width), self.scale),
            None => {
                debug!("No width for char {} in font {}.", glyph, self.texname);
                0
            }
        }
    }

    /// Height and depth of a glyph in DVI units.
    pub(crate) fn height_depth_of(&self, glyph: u32) -> (i64, i64) {
        let lookup = |table: Option<&i32>, name: &str| match table {
            Some(&value) => mul2012(i64::from(value), self.scale),
            None => {
                debug!("No {} for char {} in font {}", name, glyph, self.texname);
                0
            }
        };
        let tfm = self.tfm.as_ref();
        (
            lookup(tfm.and_then(|tfm| tfm.height.get(&glyph)), "height"),
            lookup(tfm.and_then(|tfm| tfm.depth.get(&glyph)), "depth"),
        )
    }
}

fn size_from_scale(scale: i64) -> f64 {
    scale as f64 * (72.0 / (72.27 * 65536.0))
}

impl fmt::Debug for DVIFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<DVIFont {} *{}>", self.texname, self.scale as f64 / 1048576.0)
    }
}

impl PartialEq for DVIFont {
    fn eq(&self, other: &Self) -> bool {
        self.texname == other.texname && self.size == other.size
    }
}

impl Eq for DVIFont {}

impl Hash for DVIFont {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.texname.hash(state);
        self.size.to_bits().hash(state);
    }
}

// With multiple text objects per figure (e.g. tick labels) the same tfm and
// vf files are opened many times, so the loaded files are memoized by their
// full pathname for the lifetime of the process.
lazy_static! {
    static ref TFM_FILES: Mutex<LruCache<String, Option<Arc<TFMFile>>>> =
        Mutex::new(LruCache::unbounded());
    static ref VF_FILES: Mutex<LruCache<String, Option<Arc<VFFile>>>> =
        Mutex::new(LruCache::unbounded());
}

/// Load a TFM file by pathname, memoized. A missing file is `None`, not an
/// error; callers decide whether that is fatal.
pub(crate) fn tfm_file(pathname: &str) -> Result<Option<Arc<TFMFile>>> {
    if let Some(hit) = TFM_FILES.lock().unwrap().get(pathname) {
        return Ok(hit.clone());
    }
    let loaded = if Path::new(pathname).is_file() {
        Some(Arc::new(TFMFile::from_path(pathname)?))
    } else {
        None
    };
    TFM_FILES
        .lock()
        .unwrap()
        .put(pathname.to_string(), loaded.clone());
    Ok(loaded)
}

/// Load a VF file by pathname, memoized; `None` when the file is missing.
pub(crate) fn vf_file(pathname: &str) -> Result<Option<Arc<VFFile>>> {
    if let Some(hit) = VF_FILES.lock().unwrap().get(pathname) {
        return Ok(hit.clone());
    }
    let loaded = if Path::new(pathname).is_file() {
        Some(Arc::new(VFFile::new(pathname, None)?))
    } else {
        None
    };
    VF_FILES
        .lock()
        .unwrap()
        .put(pathname.to_string(), loaded.clone());
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tfm_with_widths(widths: &[(u32, i32)]) -> Arc<TFMFile> {
        Arc::new(TFMFile {
            checksum: 0,
            design_size: 0,
            width: widths.iter().cloned().collect::<HashMap<_, _>>(),
            height: HashMap::new(),
            depth: HashMap::new(),
        })
    }

    #[test]
    fn it_derives_the_size_from_the_scale() {
        let font = DVIFont::new(655360, None, "cmr10".to_string(), None);
        // 10 TeX points converted to Adobe points.
        assert!((font.size - 10.0 * 72.0 / 72.27).abs() < 1e-9);
    }

    #[test]
    fn it_builds_glyph_space_widths_up_to_the_last_char() {
        let tfm = tfm_with_widths(&[(2, 1 << 20), (4, 3 << 19)]);
        let font = DVIFont::new(655360, Some(tfm), "f".to_string(), None);
        assert_eq!(*font.widths, vec![0, 0, 1000, 0, 1500]);
    }

    #[test]
    fn glyph_widths_scale_through_the_fixed_point_factor() {
        let tfm = tfm_with_widths(&[(65, 1 << 20)]);
        let font = DVIFont::new(655360, Some(tfm), "f".to_string(), None);
        // One em at scale 655360 is the scale itself.
        assert_eq!(font.width_of(65), 655360);
        assert_eq!(font.width_of(66), 0);
    }

    #[test]
    fn fonts_compare_by_name_and_size_only() {
        let a = DVIFont::new(655360, None, "cmr10".to_string(), None);
        let mut b = DVIFont::new(655360, None, "cmr10".to_string(), None);
        b.widths = Arc::new(vec![1, 2, 3]);
        assert_eq!(a, b);

        let c = DVIFont::new(655360, None, "cmmi10".to_string(), None);
        let d = DVIFont::new(327680, None, "cmr10".to_string(), None);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn missing_files_memoize_to_none() {
        assert!(tfm_file("/nonexistent/nowhere.tfm").unwrap().is_none());
        assert!(vf_file("/nonexistent/nowhere.vf").unwrap().is_none());
    }
}
