//! Helpers shared by the unit tests: builders for synthetic DVI, TFM and VF
//! byte streams, and temp-dir fixtures with a pre-populated support cache.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use lazy_static::lazy_static;
use tempfile::TempDir;

use crate::cache::{with_default_cache, TeXSupportCache};

/// 10pt as a 20.12 scale factor, the natural size of cmr10.
pub const CMR10_SCALE: u32 = 655360;
/// The fixture font's width, height and depth words for 'A'.
pub const CMR10_WIDTH_A: i32 = 0x000C_0000;
pub const CMR10_HEIGHT_A: i32 = 0x000A_F000;
pub const CMR10_CHECKSUM: u32 = 0x1234_5678;

/// Build a minimal TFM file: characters `bc..` with the given
/// (width, height, depth) fix words, one table slot per character plus the
/// mandatory zero slot.
pub fn make_tfm(checksum: u32, bc: u8, chars: &[(u32, u32, u32)]) -> Vec<u8> {
    assert!(!chars.is_empty() && chars.len() <= 14);
    let nchars = chars.len() as u16;
    let ntable = nchars + 1;
    let mut bytes = Vec::new();
    let push_u16 = |bytes: &mut Vec<u8>, v: u16| bytes.extend_from_slice(&v.to_be_bytes());
    let push_u32 = |bytes: &mut Vec<u8>, v: u32| bytes.extend_from_slice(&v.to_be_bytes());

    // Prolog: lf, lh, bc, ec, nw, nh, nd, ni, nl, nk, ne, np.
    push_u16(&mut bytes, 6 + 2 + nchars + 3 * ntable);
    push_u16(&mut bytes, 2);
    push_u16(&mut bytes, u16::from(bc));
    push_u16(&mut bytes, u16::from(bc) + nchars - 1);
    push_u16(&mut bytes, ntable);
    push_u16(&mut bytes, ntable);
    push_u16(&mut bytes, ntable);
    for _ in 0..5 {
        push_u16(&mut bytes, 0);
    }

    // Header: checksum and design size.
    push_u32(&mut bytes, checksum);
    push_u32(&mut bytes, 0x00A0_0000);

    // Char info: each character indexes its own table slot.
    for idx in 0..chars.len() {
        let slot = (idx + 1) as u8;
        bytes.extend_from_slice(&[slot, (slot << 4) | slot, 0, 0]);
    }

    for table in 0..3 {
        push_u32(&mut bytes, 0);
        for &(w, h, d) in chars {
            push_u32(&mut bytes, [w, h, d][table]);
        }
    }
    bytes
}

/// Bytes of the fixture font, a one-character cmr10 stand-in.
pub fn cmr10_tfm() -> Vec<u8> {
    make_tfm(
        CMR10_CHECKSUM,
        65,
        &[(CMR10_WIDTH_A as u32, CMR10_HEIGHT_A as u32, 0)],
    )
}

/// Builder for synthetic DVI byte streams. `finish` appends a postamble
/// naming the given font definitions, the post-postamble pointer and the
/// 223 padding.
pub struct DVIBuilder {
    bytes: Vec<u8>,
}

impl DVIBuilder {
    pub fn new() -> Self {
        DVIBuilder { bytes: Vec::new() }
    }

    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn raw(mut self, byte: u8) -> Self {
        self.bytes.push(byte);
        self
    }

    pub fn pre(self) -> Self {
        self.pre_with(2, 25400000, 7227 * 65536, 1000)
    }

    pub fn pre_with(mut self, format: u8, num: u32, den: u32, mag: u32) -> Self {
        self.bytes.extend_from_slice(&[247, format]);
        self.u32(num);
        self.u32(den);
        self.u32(mag);
        self.bytes.push(0); // no comment
        self
    }

    pub fn bop(mut self) -> Self {
        self.bytes.push(139);
        for count in 0..10 {
            self.i32(if count == 0 { 1 } else { 0 });
        }
        self.i32(-1);
        self
    }

    pub fn eop(mut self) -> Self {
        self.bytes.push(140);
        self
    }

    pub fn fnt_def(mut self, k: u8, checksum: u32, scale: u32, design: u32, name: &str) -> Self {
        self.bytes.extend_from_slice(&[243, k]);
        self.u32(checksum);
        self.u32(scale);
        self.u32(design);
        self.bytes.push(0);
        self.bytes.push(name.len() as u8);
        self.bytes.extend_from_slice(name.as_bytes());
        self
    }

    pub fn fnt_num(mut self, k: u8) -> Self {
        assert!(k < 64);
        self.bytes.push(171 + k);
        self
    }

    pub fn set_char(mut self, chr: u8) -> Self {
        assert!(chr < 128);
        self.bytes.push(chr);
        self
    }

    pub fn push(mut self) -> Self {
        self.bytes.push(141);
        self
    }

    pub fn pop(mut self) -> Self {
        self.bytes.push(142);
        self
    }

    pub fn right4(mut self, b: i32) -> Self {
        self.bytes.push(146);
        self.i32(b);
        self
    }

    pub fn w0(mut self) -> Self {
        self.bytes.push(147);
        self
    }

    pub fn w3(mut self, b: i32) -> Self {
        self.bytes.push(150);
        self.bytes.extend_from_slice(&b.to_be_bytes()[1..]);
        self
    }

    pub fn down4(mut self, a: i32) -> Self {
        self.bytes.push(160);
        self.i32(a);
        self
    }

    pub fn set_rule(mut self, a: i32, b: i32) -> Self {
        self.bytes.push(132);
        self.i32(a);
        self.i32(b);
        self
    }

    pub fn put_rule(mut self, a: i32, b: i32) -> Self {
        self.bytes.push(137);
        self.i32(a);
        self.i32(b);
        self
    }

    pub fn special(mut self, data: &[u8]) -> Self {
        self.bytes.push(239);
        self.bytes.push(data.len() as u8);
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn finish(mut self, fontdefs: &[(u8, u32, u32, u32, &str)]) -> Vec<u8> {
        let post_offset = self.bytes.len() as u32;
        self.bytes.push(248);
        self.u32(0); // pointer to the last page, unused
        self.u32(25400000);
        self.u32(7227 * 65536);
        self.u32(1000);
        self.u32(0); // tallest page height
        self.u32(0); // widest page width
        self.bytes.extend_from_slice(&[0, 2]); // stack depth
        self.bytes.extend_from_slice(&[0, 1]); // page count
        for &(k, checksum, scale, design, name) in fontdefs {
            self = self.fnt_def(k, checksum, scale, design, name);
        }
        self.bytes.push(249);
        self.u32(post_offset);
        self.bytes.push(2);
        self.bytes.extend_from_slice(&[223, 223, 223, 223]);
        self.bytes
    }
}

/// Builder for synthetic VF byte streams.
pub struct VFBuilder {
    bytes: Vec<u8>,
}

impl VFBuilder {
    pub fn new() -> Self {
        VFBuilder { bytes: Vec::new() }
    }

    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn pre(mut self) -> Self {
        self.bytes.extend_from_slice(&[247, 202, 0]);
        self.u32(0); // checksum
        self.u32(0x00A0_0000); // design size
        self
    }

    pub fn fnt_def(mut self, k: u8, checksum: u32, scale: u32, design: u32, name: &str) -> Self {
        self.bytes.extend_from_slice(&[243, k]);
        self.u32(checksum);
        self.u32(scale);
        self.u32(design);
        self.bytes.push(0);
        self.bytes.push(name.len() as u8);
        self.bytes.extend_from_slice(name.as_bytes());
        self
    }

    pub fn short_packet(mut self, chr: u8, width: u32, body: &[u8]) -> Self {
        assert!(body.len() < 242);
        self.bytes.push(body.len() as u8);
        self.bytes.push(chr);
        self.bytes.extend_from_slice(&width.to_be_bytes()[1..]);
        self.bytes.extend_from_slice(body);
        self
    }

    pub fn long_packet(mut self, chr: u32, width: u32, body: &[u8]) -> Self {
        self.bytes.push(242);
        self.u32(body.len() as u32);
        self.u32(chr);
        self.u32(width);
        self.bytes.extend_from_slice(body);
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.bytes.push(248);
        self.bytes
    }
}

/// A DVI fragment placing one glyph of the default font at an offset, used
/// as a VF packet body.
pub fn packet_body(dx: i32, dy: i32, chr: u8) -> Vec<u8> {
    let mut body = vec![146];
    body.extend_from_slice(&dx.to_be_bytes());
    body.push(160);
    body.extend_from_slice(&dy.to_be_bytes());
    body.push(chr);
    body
}

/// A temp directory holding fixture files and a support cache that already
/// knows where the fixture font lives.
pub struct Fixture {
    pub dir: TempDir,
}

pub fn fixture_dir() -> Fixture {
    Fixture {
        dir: tempfile::tempdir().unwrap(),
    }
}

impl Fixture {
    pub fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir.path().join("texsupport.2.db")
    }

    /// A cache seeded with the fixture cmr10 metrics and negative entries
    /// for its other support files.
    pub fn cache(&self) -> TeXSupportCache {
        let tfm_path = self.write("cmr10.tfm", &cmr10_tfm());
        let mut cache = TeXSupportCache::new(Some(&self.cache_path())).unwrap();
        let mut mapping = HashMap::new();
        mapping.insert(
            "cmr10.tfm".to_string(),
            Some(tfm_path.display().to_string()),
        );
        mapping.insert("cmr10.vf".to_string(), None);
        mapping.insert("cmr10.pfb".to_string(), None);
        self.populate(&mut cache, mapping);
        cache
    }

    pub fn populate(&self, cache: &mut TeXSupportCache, mapping: HashMap<String, Option<String>>) {
        let tx = cache.transaction().unwrap();
        tx.update_pathnames(&mapping).unwrap();
        tx.commit().unwrap();
    }

    /// Record negative entries for every support file of a font.
    pub fn record_missing(&self, cache: &mut TeXSupportCache, fontname: &str) {
        let mapping = ["tfm", "vf", "pfb"]
            .iter()
            .map(|suffix| (format!("{}.{}", fontname, suffix), None))
            .collect();
        self.populate(cache, mapping);
    }
}

lazy_static! {
    static ref SHARED_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

/// The directory backing the process-wide default cache during tests. The
/// environment override has to be in place before the first default-cache
/// use anywhere in the process, so every test that touches the default
/// cache goes through here.
pub fn shared_cache_dir() -> PathBuf {
    let mut guard = SHARED_DIR.lock().unwrap();
    if guard.is_none() {
        let dir = std::env::temp_dir().join(format!("dviread-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        std::env::set_var("DVIREAD_CACHEDIR", &dir);
        *guard = Some(dir);
    }
    guard.clone().unwrap()
}

/// Insert pathname entries into the process-wide default cache.
pub fn populate_shared_cache(mapping: HashMap<String, Option<String>>) {
    shared_cache_dir();
    with_default_cache(|cache| {
        let tx = cache.transaction()?;
        tx.update_pathnames(&mapping)?;
        tx.commit()
    })
    .unwrap();
}
