//! Parsers for the `psfonts.map` format mapping TeX font names to
//! PostScript fonts, and for the PostScript-encoding subset referenced from
//! such maps.
//!
//! For historical reasons TeX knows many Type-1 fonts by different names
//! than the outside world, and its native Metafont fonts need Type-1
//! counterparts for embedding; map files such as `psfonts.map`,
//! `pdftex.map` and `dvipdfm.map` provide that mapping.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;

use crate::cache::TeXSupportCache;
use crate::error::{DviError, Result};
use crate::paths::find_tex_file;

/// PostScript transformations applied to a font: the arguments of the
/// `SlantFont` and `ExtendFont` snippets in a map entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FontEffects {
    pub slant: Option<f64>,
    pub extend: Option<f64>,
}

/// One entry of a psfonts.map style file. The encoding and filename are
/// pathnames once resolved through [`PsfontsMap::lookup`]; built-in fonts
/// may have no filename at all.
#[derive(Debug, Clone, PartialEq)]
pub struct PsFont {
    pub texname: String,
    pub psname: String,
    pub effects: FontEffects,
    pub encoding: Option<String>,
    pub filename: Option<String>,
}

/// A psfonts.map formatted file.
pub struct PsfontsMap {
    fonts: HashMap<String, PsFont>,
    filename: String,
}

// The words of a map line after the two names: an effects string, an
// encoding reference (`<[`, or `<` with a name ending in .enc), or a font
// file reference (`<` or `<<`). Quotes group a word containing spaces.
#[derive(Debug, PartialEq)]
enum Word {
    Plain(String),
    EncodingRef(String),
    FileRef(String),
}

fn classify(token: &str) -> Word {
    if let Some(rest) = token.strip_prefix("<[") {
        Word::EncodingRef(rest.to_string())
    } else if let Some(rest) = token.strip_prefix("<<").or_else(|| token.strip_prefix('<')) {
        // The .enc suffix marks an encoding regardless of whether the
        // reference uses one or two angle brackets.
        if rest.ends_with(".enc") {
            Word::EncodingRef(rest.to_string())
        } else {
            Word::FileRef(rest.to_string())
        }
    } else {
        Word::Plain(token.to_string())
    }
}

fn tokenize(line: &str) -> Vec<Word> {
    let bytes = line.as_bytes();
    let mut words = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        while at < bytes.len() && bytes[at].is_ascii_whitespace() {
            at += 1;
        }
        if at >= bytes.len() {
            break;
        }
        if bytes[at] == b'"' {
            let end = bytes[at + 1..]
                .iter()
                .position(|&b| b == b'"')
                .map(|offset| at + 1 + offset)
                .unwrap_or(bytes.len());
            words.push(classify(&line[at + 1..end]));
            at = end + 1;
        } else {
            let start = at;
            while at < bytes.len() && !bytes[at].is_ascii_whitespace() {
                at += 1;
            }
            words.push(classify(&line[start..at]));
        }
    }
    words
}

lazy_static! {
    static ref EFFECTS_RE: Regex = Regex::new(
        r"(?x) (?P<slant> -?[0-9]*(?:\.[0-9]+)) \s* SlantFont
             | (?P<extend>-?[0-9]*(?:\.[0-9]+)) \s* ExtendFont"
    )
    .expect("effects pattern is valid");
}

fn parse_effects(effects: &str) -> FontEffects {
    let mut result = FontEffects::default();
    for captures in EFFECTS_RE.captures_iter(effects) {
        if let Some(slant) = captures.name("slant") {
            result.slant = slant.as_str().parse().ok();
        } else if let Some(extend) = captures.name("extend") {
            result.extend = extend.as_str().parse().ok();
        }
    }
    result
}

impl PsfontsMap {
    pub fn new<P: AsRef<Path>>(filename: P) -> Result<Self> {
        let path = filename.as_ref();
        let raw = fs::read(path)?;
        let mut map = PsfontsMap {
            fonts: HashMap::new(),
            filename: path.display().to_string(),
        };
        map.parse(&String::from_utf8_lossy(&raw));
        Ok(map)
    }

    fn parse(&mut self, contents: &str) {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('%') {
                continue;
            }
            let mut words = tokenize(line).into_iter();
            // The first two words are the TeX name and the PostScript name.
            let texname = match words.next() {
                Some(Word::Plain(word)) => word,
                _ => continue,
            };
            let psname = match words.next() {
                Some(Word::Plain(word)) => word,
                _ => continue,
            };

            let mut effects = String::new();
            let mut encoding = None;
            let mut filename = None;
            for word in words {
                match word {
                    Word::Plain(word) => effects = word,
                    Word::EncodingRef(enc) => {
                        // When a font carries several encodings, the last
                        // one wins, following pdfTeX.
                        if encoding.is_some() {
                            debug!("Multiple encodings for {} = {}", texname, psname);
                        }
                        encoding = Some(enc);
                    }
                    Word::FileRef(file) => filename = Some(file),
                }
            }

            self.fonts.insert(
                texname.clone(),
                PsFont {
                    texname,
                    psname,
                    effects: parse_effects(&effects),
                    encoding,
                    filename,
                },
            );
        }
    }

    /// Look up an entry by TeX name. Relative encoding and font-file paths
    /// are resolved through the locator; an unknown name is `None`.
    pub fn lookup(
        &self,
        texname: &str,
        cache: Option<&mut TeXSupportCache>,
    ) -> Result<Option<PsFont>> {
        let entry = match self.fonts.get(texname) {
            Some(entry) => entry.clone(),
            None => {
                info!(
                    "No PostScript font for the TeX font \"{}\" in \"{}\"; \
                     only fonts with an associated PostScript font file can \
                     be handled, which can often be fixed by installing a \
                     suitable PostScript font package.",
                    texname, self.filename
                );
                return Ok(None);
            }
        };
        let mut cache = cache;
        let PsFont {
            texname,
            psname,
            effects,
            encoding,
            filename,
        } = entry;
        let filename = match filename {
            Some(name) if !name.starts_with('/') => find_tex_file(&name, cache.as_deref_mut())?,
            other => other,
        };
        let encoding = match encoding {
            Some(name) if !name.starts_with('/') => find_tex_file(&name, cache.as_deref_mut())?,
            other => other,
        };
        Ok(Some(PsFont {
            texname,
            psname,
            effects,
            encoding,
            filename,
        }))
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }
}

/// The list of character names in a `*.enc` file referenced from a
/// psfonts.map style file; understands a very limited subset of
/// PostScript.
pub struct Encoding {
    pub encoding: Vec<String>,
}

lazy_static! {
    static ref NAME_RE: Regex =
        Regex::new(r"/([^\[\]{}<>\s]+)").expect("name pattern is valid");
}

impl Encoding {
    pub fn new<P: AsRef<Path>>(filename: P) -> Result<Self> {
        let path = filename.as_ref();
        debug!("Parsing TeX encoding {}", path.display());
        let raw = fs::read(path)?;
        let text = String::from_utf8_lossy(&raw);

        // Strip comments, join the lines, and keep the bracketed vector.
        // The separator keeps names on adjacent lines apart.
        let data: String = text
            .lines()
            .map(|line| line.split('%').next().unwrap_or("").trim())
            .collect::<Vec<_>>()
            .join(" ");
        let file = path.display().to_string();
        let begin = data
            .find('[')
            .ok_or_else(|| DviError::malformed(&file, "cannot locate beginning of encoding"))?;
        let data = &data[begin..];
        let end = data
            .find(']')
            .ok_or_else(|| DviError::malformed(&file, "cannot locate end of encoding"))?;
        let data = &data[..end];

        let encoding = NAME_RE
            .captures_iter(data)
            .map(|captures| captures[1].to_string())
            .collect();
        debug!("Result: {:?}", encoding);
        Ok(Encoding { encoding })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.encoding.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_dir;

    #[test]
    fn it_parses_plain_entries() {
        let fixture = fixture_dir();
        let path = fixture.write(
            "psfonts.map",
            b"% comment line\n\
              ptmb8r Times-Bold <8r.enc <ptmb8a.pfb\n\
              \n\
              cmr10 CMR10 </fonts/cmr10.pfb\n",
        );
        let map = PsfontsMap::new(&path).unwrap();
        assert_eq!(map.len(), 2);

        let entry = map.lookup("cmr10", None).unwrap().unwrap();
        assert_eq!(entry.psname, "CMR10");
        assert_eq!(entry.encoding, None);
        // An absolute path needs no locator round trip.
        assert_eq!(entry.filename, Some("/fonts/cmr10.pfb".to_string()));
    }

    #[test]
    fn it_parses_effects_and_quoted_words() {
        let fixture = fixture_dir();
        let path = fixture.write(
            "effects.map",
            b"ptmbo8r Times-Bold \" .167 SlantFont \" <8r.enc <ptmb8a.pfb\n\
              phvro8rn Helvetica \".82 ExtendFont .1763 SlantFont\" <8r.enc\n",
        );
        let map = PsfontsMap::new(&path).unwrap();

        let slanted = map.fonts.get("ptmbo8r").unwrap();
        assert_eq!(slanted.effects.slant, Some(0.167));
        assert_eq!(slanted.effects.extend, None);

        let both = map.fonts.get("phvro8rn").unwrap();
        assert_eq!(both.effects.extend, Some(0.82));
        assert_eq!(both.effects.slant, Some(0.1763));
    }

    #[test]
    fn encoding_references_take_several_forms_and_the_last_wins() {
        let fixture = fixture_dir();
        let path = fixture.write(
            "enc.map",
            b"fa PsA <[myenc <fa.pfb\n\
              fb PsB <other.enc <fb.pfb\n\
              fc PsC \"<[quoted enc\" <fc.pfb\n\
              fd PsD <first.enc <[second <fd.pfb\n",
        );
        let map = PsfontsMap::new(&path).unwrap();
        assert_eq!(
            map.fonts.get("fa").unwrap().encoding,
            Some("myenc".to_string())
        );
        assert_eq!(
            map.fonts.get("fb").unwrap().encoding,
            Some("other.enc".to_string())
        );
        assert_eq!(
            map.fonts.get("fc").unwrap().encoding,
            Some("quoted enc".to_string())
        );
        assert_eq!(
            map.fonts.get("fd").unwrap().encoding,
            Some("second".to_string())
        );
    }

    #[test]
    fn double_angle_references_parse_like_single_ones() {
        let fixture = fixture_dir();
        let path = fixture.write("subset.map", b"fe PsE <<full.pfb\nff PsF <<dbl.enc <ff.pfb\n");
        let map = PsfontsMap::new(&path).unwrap();
        assert_eq!(
            map.fonts.get("fe").unwrap().filename,
            Some("full.pfb".to_string())
        );
        // A double-angle name ending in .enc is still an encoding.
        let entry = map.fonts.get("ff").unwrap();
        assert_eq!(entry.encoding, Some("dbl.enc".to_string()));
        assert_eq!(entry.filename, Some("ff.pfb".to_string()));
    }

    #[test]
    fn unknown_names_look_up_as_none() {
        let fixture = fixture_dir();
        let path = fixture.write("empty.map", b"% nothing\n");
        let map = PsfontsMap::new(&path).unwrap();
        assert!(map.lookup("missing", None).unwrap().is_none());
    }

    #[test]
    fn it_extracts_encoding_vectors() {
        let fixture = fixture_dir();
        let path = fixture.write(
            "8r.enc",
            b"% an encoding\n\
              /TeXBase1Encoding [\n\
              /.notdef /dotaccent % trailing comment\n\
              /fi /fl\n\
              ] def\n",
        );
        let enc = Encoding::new(&path).unwrap();
        assert_eq!(enc.encoding, [".notdef", "dotaccent", "fi", "fl"]);
    }

    #[test]
    fn an_encoding_without_brackets_is_malformed() {
        let fixture = fixture_dir();
        let path = fixture.write("broken.enc", b"/NoVector here\n");
        match Encoding::new(&path) {
            Err(DviError::Malformed { reason, .. }) => {
                assert!(reason.contains("beginning of encoding"))
            }
            other => panic!("expected malformed error, got {:?}", other.map(|_| ())),
        }
    }
}
