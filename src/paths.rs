//! Finding TeX support files through :program:`kpsewhich`, with the
//! results persisted in the support cache.

use std::collections::HashMap;
use std::path::MAIN_SEPARATOR;
use std::process::Command;

use log::{debug, warn};

use crate::cache::{with_default_cache, TeXSupportCache};
use crate::error::Result;

/// Find multiple files in the texmf tree with a single call to
/// :program:`kpsewhich`, consulting the cache first and persisting both
/// hits and misses. A name the locator cannot resolve maps to `None`;
/// missing files are never an error here, callers decide whether absence
/// is fatal.
pub fn find_tex_files(
    filenames: &[String],
    cache: Option<&mut TeXSupportCache>,
) -> Result<HashMap<String, Option<String>>> {
    match cache {
        Some(cache) => find_tex_files_in(filenames, cache),
        None => with_default_cache(|cache| find_tex_files_in(filenames, cache)),
    }
}

fn find_tex_files_in(
    filenames: &[String],
    cache: &mut TeXSupportCache,
) -> Result<HashMap<String, Option<String>>> {
    let mut result = cache.get_pathnames(filenames)?;
    let missing: Vec<String> = filenames
        .iter()
        .filter(|name| !result.contains_key(*name))
        .cloned()
        .collect();
    if missing.is_empty() {
        return Ok(result);
    }

    debug!("find_tex_files: kpsewhich {}", missing.join(" "));
    let output = match Command::new("kpsewhich").args(&missing).output() {
        Ok(output) => output,
        Err(err) => {
            // When the locator itself cannot run, report the files as not
            // found for this call but leave the cache alone, so a repaired
            // TeX installation is picked up later.
            warn!("could not run kpsewhich: {}", err);
            for name in missing {
                result.insert(name, None);
            }
            return Ok(result);
        }
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let pathnames: Vec<String> = stdout.lines().map(str::to_string).collect();
    debug!("find_tex_files result: {:?}", pathnames);

    let mapping = match_pathnames(&missing, &pathnames);
    let tx = cache.transaction()?;
    tx.update_pathnames(&mapping)?;
    tx.commit()?;
    result.extend(mapping);
    Ok(result)
}

/// Find a single file in the texmf tree. `find_tex_files` is more efficient
/// when several names are needed, since it batches them into one
/// :program:`kpsewhich` call.
pub fn find_tex_file(
    filename: &str,
    cache: Option<&mut TeXSupportCache>,
) -> Result<Option<String>> {
    let mut result = find_tex_files(&[filename.to_string()], cache)?;
    Ok(result.remove(filename).unwrap_or(None))
}

/// Match filenames to pathnames in lists that are in matching order, except
/// that some filenames may lack pathnames. A line is attributed to the next
/// input name only if it ends with that name after a path separator;
/// otherwise the name is recorded as unresolved and the line is tried
/// against the following name.
fn match_pathnames(
    filenames: &[String],
    pathnames: &[String],
) -> HashMap<String, Option<String>> {
    let mut result: HashMap<String, Option<String>> =
        filenames.iter().map(|name| (name.clone(), None)).collect();
    let mut pathnames = pathnames.iter();
    let mut pathname = pathnames.next();
    for filename in filenames {
        let current = match pathname {
            Some(current) => current,
            None => break,
        };
        if current.ends_with(&format!("{}{}", MAIN_SEPARATOR, filename)) {
            result.insert(filename.clone(), Some(current.clone()));
            pathname = pathnames.next();
        }
    }
    result
}
