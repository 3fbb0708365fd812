//! A persistent cache of data related to TeX support files: results from
//! :program:`kpsewhich` and the contents of parsed dvi files.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::Read;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lazy_static::lazy_static;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::dvi::{Box, Text};
use crate::error::{DviError, Result};
use crate::font::DVIFont;

/// The version stamped into the database with `PRAGMA user_version`. A
/// database with any other version is rejected, never migrated; deleting
/// the file resets the cache.
pub const SCHEMA_VERSION: i64 = 2;

lazy_static! {
    // A single shared instance at the default location, so the schema
    // check runs once per process. The underlying connection must be used
    // from one thread at a time, hence the mutex; callers needing real
    // multi-threaded access open their own connection to the same file.
    static ref SHARED_CACHE: Mutex<Option<TeXSupportCache>> = Mutex::new(None);
}

/// Run `f` with the process-wide cache instance, opening it at the default
/// location on first use.
pub fn with_default_cache<T, F>(f: F) -> Result<T>
where
    F: FnOnce(&mut TeXSupportCache) -> Result<T>,
{
    let mut maybe_cache = SHARED_CACHE.lock().unwrap();
    if maybe_cache.is_none() {
        *maybe_cache = Some(TeXSupportCache::new(None)?);
    }
    f(maybe_cache.as_mut().expect("cache was just initialized"))
}

fn default_cache_dir() -> PathBuf {
    if let Ok(dir) = env::var("DVIREAD_CACHEDIR") {
        return PathBuf::from(dir);
    }
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("dviread")
}

/// The support-file cache over an embedded SQLite database.
///
/// Reads go through the connection directly; all writes go through a
/// [`CacheTransaction`], which commits explicitly and rolls back when
/// dropped.
///
/// ```no_run
/// # use std::collections::HashMap;
/// # fn main() -> dviread::Result<()> {
/// let mut cache = dviread::TeXSupportCache::new(None)?;
/// let tx = cache.transaction()?;
/// let mut mapping = HashMap::new();
/// mapping.insert("pdftex.map".to_string(),
///                Some("/usr/local/pdftex.map".to_string()));
/// tx.update_pathnames(&mapping)?;
/// tx.commit()?;
/// let pathnames = cache.get_pathnames(&["pdftex.map".to_string()])?;
/// # Ok(())
/// # }
/// ```
pub struct TeXSupportCache {
    connection: Connection,
    filename: PathBuf,
}

impl TeXSupportCache {
    /// Open or create the cache. With no filename, the cache lives at
    /// `texsupport.{version}.db` in the standard cache directory.
    pub fn new(filename: Option<&Path>) -> Result<Self> {
        let filename = match filename {
            Some(filename) => filename.to_path_buf(),
            None => {
                let dir = default_cache_dir();
                fs::create_dir_all(&dir)?;
                dir.join(format!("texsupport.{}.db", SCHEMA_VERSION))
            }
        };
        debug!("opening support cache {}", filename.display());

        let connection = Connection::open(&filename)?;
        let _mode: String =
            connection.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        connection.execute_batch(
            "PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        let version: i64 = connection.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        let cache = TeXSupportCache {
            connection,
            filename,
        };
        if version == 0 {
            cache.create()?;
        } else if version != SCHEMA_VERSION {
            return Err(DviError::CacheVersion {
                file: cache.filename.display().to_string(),
                found: version,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(cache)
    }

    fn create(&self) -> Result<()> {
        self.connection.execute_batch(
            "PRAGMA page_size=4096;
             CREATE TABLE file_path(
                 filename TEXT PRIMARY KEY NOT NULL,
                 pathname TEXT
             ) WITHOUT ROWID;
             CREATE TABLE dvi_file(
                 id INTEGER PRIMARY KEY,
                 name UNIQUE NOT NULL,
                 mtime INTEGER,
                 size INTEGER
             );
             CREATE TABLE dvi_font(
                 id INTEGER PRIMARY KEY,
                 texname UNIQUE NOT NULL
             );
             CREATE TABLE dvi_font_metrics(
                 id INTEGER NOT NULL
                     REFERENCES dvi_font(id) ON DELETE CASCADE,
                 scale INTEGER NOT NULL,
                 widths BLOB NOT NULL,
                 PRIMARY KEY (id, scale)
             );
             CREATE TABLE dvi(
                 fileid INTEGER NOT NULL
                     REFERENCES dvi_file(id) ON DELETE CASCADE,
                 pageno INTEGER NOT NULL,
                 seq INTEGER NOT NULL,
                 x INTEGER NOT NULL,
                 y INTEGER NOT NULL,
                 height INTEGER NOT NULL,
                 width INTEGER NOT NULL,
                 depth INTEGER NOT NULL,
                 fontid INTEGER,
                 fontscale INTEGER,
                 glyph INTEGER,
                 PRIMARY KEY (fileid, pageno, seq)
             ) WITHOUT ROWID;
             CREATE TABLE dvi_baseline(
                 fileid INTEGER NOT NULL
                     REFERENCES dvi_file(id) ON DELETE CASCADE,
                 pageno INTEGER NOT NULL,
                 baseline REAL NOT NULL,
                 PRIMARY KEY (fileid, pageno)
             ) WITHOUT ROWID;
             PRAGMA user_version=2;",
        )?;
        Ok(())
    }

    /// Optional optimization phase after updating data; executes sqlite's
    /// `PRAGMA optimize`, which may spend some time up front to improve
    /// later query performance.
    pub fn optimize(&self) -> Result<()> {
        self.connection.execute_batch("PRAGMA optimize;")?;
        Ok(())
    }

    /// Begin a transaction for a batch of writes.
    pub fn transaction(&mut self) -> Result<CacheTransaction<'_>> {
        Ok(CacheTransaction {
            tx: self.connection.transaction()?,
        })
    }

    /// Query the cache for pathnames related to `filenames`. The result
    /// covers only the filenames that exist in the cache; a `None` value is
    /// a recorded miss, meaning the named file is known not to exist.
    pub fn get_pathnames(&self, filenames: &[String]) -> Result<HashMap<String, Option<String>>> {
        if filenames.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; filenames.len()].join(",");
        let sql = format!(
            "SELECT filename, pathname FROM file_path WHERE filename IN ({})",
            placeholders
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(filenames.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut result = HashMap::new();
        for row in rows {
            let (filename, pathname) = row?;
            result.insert(filename, pathname);
        }
        Ok(result)
    }

    /// Query the database identifier of a dvi file. The stored identity is
    /// `(name, mtime, size)`; if the file on disk no longer matches, the
    /// cached contents are stale and no id is returned.
    pub fn dvi_id(&self, name: &str) -> Result<Option<i64>> {
        let row = self
            .connection
            .query_row(
                "SELECT id, mtime, size FROM dvi_file WHERE name=?1 LIMIT 1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        if let Some((id, mtime, size)) = row {
            let (current_mtime, current_size) = file_identity(name)?;
            if mtime == current_mtime && size == current_size {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Reconstruct the fonts used by the marks of a dvi file, with their
    /// glyph-space widths inflated from the stored blobs.
    pub fn dvi_fonts(&self, fileid: i64) -> Result<HashMap<(String, i64), DVIFont>> {
        let mut stmt = self.connection.prepare(
            "SELECT texname, fontscale, widths FROM
             (SELECT DISTINCT fontid, fontscale FROM dvi WHERE fileid=?1) d
             JOIN dvi_font f ON (d.fontid=f.id)
             JOIN dvi_font_metrics m ON (d.fontid=m.id AND d.fontscale=m.scale)",
        )?;
        let rows = stmt.query_map(params![fileid], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;
        let mut fonts = HashMap::new();
        for row in rows {
            let (texname, scale, blob) = row?;
            let widths = inflate_widths(&blob)?;
            fonts.insert(
                (texname.clone(), scale),
                DVIFont::from_widths(scale, texname, widths),
            );
        }
        Ok(fonts)
    }

    pub fn dvi_page_exists(&self, fileid: i64, pageno: i64) -> Result<bool> {
        let row = self
            .connection
            .query_row(
                "SELECT 1 FROM dvi WHERE fileid=?1 AND pageno=?2 LIMIT 1",
                params![fileid, pageno],
                |_| Ok(()),
            )
            .optional()?;
        Ok(row.is_some())
    }

    /// The bounding box of a page's marks. `max_y_pure` is like `max_y` but
    /// ignores glyph depth.
    pub fn dvi_page_boundingbox(
        &self,
        fileid: i64,
        pageno: i64,
    ) -> Result<Option<PageBoundingBox>> {
        let row = self.connection.query_row(
            "SELECT min(x)          min_x,
                    min(y - height) min_y,
                    max(x + width)  max_x,
                    max(y + depth)  max_y,
                    max(y)          max_y_pure
             FROM dvi WHERE fileid=?1 AND pageno=?2",
            params![fileid, pageno],
            |row| {
                Ok((
                    row.get::<_, Option<f64>>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                ))
            },
        )?;
        Ok(match row {
            (Some(min_x), Some(min_y), Some(max_x), Some(max_y), Some(max_y_pure)) => {
                Some(PageBoundingBox {
                    min_x,
                    min_y,
                    max_x,
                    max_y,
                    max_y_pure,
                })
            }
            _ => None,
        })
    }

    /// The boxes of a page, in insertion order.
    pub fn dvi_page_boxes(&self, fileid: i64, pageno: i64) -> Result<Vec<Box>> {
        let mut stmt = self.connection.prepare(
            "SELECT x, y, height, width FROM dvi
             WHERE fileid=?1 AND pageno=?2 AND fontid IS NULL ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![fileid, pageno], |row| {
            Ok(Box {
                x: row.get(0)?,
                y: row.get(1)?,
                height: row.get(2)?,
                width: row.get(3)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DviError::from)
    }

    /// The text of a page, in insertion order.
    pub fn dvi_page_text(&self, fileid: i64, pageno: i64) -> Result<Vec<PageTextRow>> {
        let mut stmt = self.connection.prepare(
            "SELECT x, y, height, width, depth, f.texname, fontscale, glyph
             FROM dvi JOIN dvi_font f ON (dvi.fontid=f.id)
             WHERE fileid=?1 AND pageno=?2 AND fontid IS NOT NULL ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![fileid, pageno], |row| {
            Ok(PageTextRow {
                x: row.get(0)?,
                y: row.get(1)?,
                height: row.get(2)?,
                width: row.get(3)?,
                depth: row.get(4)?,
                texname: row.get(5)?,
                fontscale: row.get(6)?,
                glyph: row.get(7)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DviError::from)
    }

    pub fn dvi_get_baseline(&self, fileid: i64, pageno: i64) -> Result<Option<f64>> {
        Ok(self
            .connection
            .query_row(
                "SELECT baseline FROM dvi_baseline WHERE fileid=?1 AND pageno=?2",
                params![fileid, pageno],
                |row| row.get(0),
            )
            .optional()?)
    }
}

/// A mark row of a page, joined with its font name.
#[derive(Debug, Clone, PartialEq)]
pub struct PageTextRow {
    pub x: f64,
    pub y: f64,
    pub height: f64,
    pub width: f64,
    pub depth: f64,
    pub texname: String,
    pub fontscale: i64,
    pub glyph: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub max_y_pure: f64,
}

/// A batch of writes to the cache. Dropping the handle without calling
/// [`CacheTransaction::commit`] rolls everything back.
pub struct CacheTransaction<'conn> {
    tx: Transaction<'conn>,
}

impl CacheTransaction<'_> {
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Upsert a filename-to-pathname mapping; `None` records that the
    /// named file does not exist.
    pub fn update_pathnames(&self, mapping: &HashMap<String, Option<String>>) -> Result<()> {
        let mut stmt = self.tx.prepare_cached(
            "INSERT OR REPLACE INTO file_path (filename, pathname) VALUES (?1, ?2)",
        )?;
        for (filename, pathname) in mapping {
            stmt.execute(params![filename, pathname])?;
        }
        Ok(())
    }

    /// Record a dvi file, deleting any earlier row (and, through the
    /// cascades, its marks and baselines). Returns the new identifier.
    pub fn dvi_new_file(&self, name: &str) -> Result<i64> {
        let (mtime, size) = file_identity(name)?;
        self.tx
            .execute("DELETE FROM dvi_file WHERE name=?1", params![name])?;
        self.tx.execute(
            "INSERT INTO dvi_file (name, mtime, size) VALUES (?1, ?2, ?3)",
            params![name, mtime, size],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Record dvi fonts and return their database identifiers.
    pub fn dvi_font_sync_ids(&self, fontnames: &[String]) -> Result<HashMap<String, i64>> {
        {
            let mut insert = self
                .tx
                .prepare_cached("INSERT OR IGNORE INTO dvi_font (texname) VALUES (?1)")?;
            for name in fontnames {
                insert.execute(params![name])?;
            }
        }
        let mut select = self
            .tx
            .prepare_cached("SELECT id FROM dvi_font WHERE texname=?1")?;
        let mut fontid = HashMap::new();
        for name in fontnames {
            let id: i64 = select.query_row(params![name], |row| row.get(0))?;
            fontid.insert(name.clone(), id);
        }
        Ok(fontid)
    }

    /// Record a font's glyph-space widths under `(texname, scale)`, once.
    pub fn dvi_font_sync_metrics(&self, font: &DVIFont) -> Result<()> {
        let exists = self
            .tx
            .query_row(
                "SELECT 1 FROM dvi_font_metrics m, dvi_font f
                 WHERE m.id=f.id AND f.texname=?1 AND m.scale=?2 LIMIT 1",
                params![font.texname, font.scale],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Ok(());
        }

        // Widths are stored as 32-bit words although the normal range is
        // around 1000 units; that and the repetition make them very
        // compressible.
        let mut raw = Vec::with_capacity(4 * font.widths.len());
        for width in font.widths.iter() {
            raw.extend_from_slice(&width.to_le_bytes());
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&raw)?;
        let widths = encoder.finish()?;

        self.tx.execute(
            "INSERT INTO dvi_font_metrics (id, scale, widths)
             SELECT id, ?2, ?3 FROM dvi_font WHERE texname=?1",
            params![font.texname, font.scale, widths],
        )?;
        Ok(())
    }

    /// Record one box mark of a page; `seq` orders the marks.
    pub fn dvi_add_box(&self, mark: &Box, fileid: i64, pageno: i64, seq: i64) -> Result<()> {
        self.tx.execute(
            "INSERT INTO dvi (fileid, pageno, seq, x, y, height, width, depth)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
            params![fileid, pageno, seq, mark.x, mark.y, mark.height, mark.width],
        )?;
        Ok(())
    }

    /// Record one text mark of a page; the glyph's height and depth come
    /// from the font metrics.
    pub fn dvi_add_text(
        &self,
        mark: &Text,
        fileid: i64,
        pageno: i64,
        seq: i64,
        fontid: i64,
    ) -> Result<()> {
        let (height, depth) = mark.font.height_depth_of(mark.glyph);
        self.tx.execute(
            "INSERT INTO dvi (fileid, pageno, seq,
                              x, y, height, width, depth, fontid, fontscale, glyph)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                fileid,
                pageno,
                seq,
                mark.x,
                mark.y,
                height,
                mark.width,
                depth,
                fontid,
                mark.font.scale,
                mark.glyph
            ],
        )?;
        Ok(())
    }

    pub fn dvi_add_baseline(&self, fileid: i64, pageno: i64, baseline: f64) -> Result<()> {
        self.tx.execute(
            "INSERT INTO dvi_baseline (fileid, pageno, baseline) VALUES (?1, ?2, ?3)",
            params![fileid, pageno, baseline],
        )?;
        Ok(())
    }
}

fn file_identity(name: &str) -> Result<(i64, i64)> {
    let metadata = fs::metadata(name)?;
    let mtime = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0);
    Ok((mtime, metadata.len() as i64))
}

fn inflate_widths(blob: &[u8]) -> Result<Vec<i32>> {
    let mut data = Vec::new();
    ZlibDecoder::new(blob).read_to_end(&mut data)?;
    Ok(data
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
