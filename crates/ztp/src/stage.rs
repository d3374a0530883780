//! Media staging
//!
//! Materializes the located installer in its final, directly
//! attachable form under the work root. Decompression writes through
//! a temp file in the destination directory followed by an atomic
//! rename, so a reader never observes a half-written image. Staging
//! is cache population: an existing destination is reused as-is.

use std::io::{BufReader, BufWriter};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::installer::{Compression, InstallerCandidate};
use crate::virt::driver::Driver;

/// File name stem for staged installer media under the work root.
const STAGED_STEM: &str = "pfsense-installer";

/// Destination path for a candidate's staged form.
pub fn staged_path(work_root: &Utf8Path, candidate: &InstallerCandidate) -> Utf8PathBuf {
    work_root.join(format!("{STAGED_STEM}.{}", candidate.format.extension()))
}

/// Staged media left behind by a prior run, if any.
pub fn existing_staged(work_root: &Utf8Path) -> Option<Utf8PathBuf> {
    ["img", "iso"]
        .iter()
        .map(|ext| work_root.join(format!("{STAGED_STEM}.{ext}")))
        .find(|p| p.is_file())
}

/// Stage `candidate` under `work_root`, returning the attachable path.
///
/// Gzip sources are decompressed; raw sources already inside the work
/// root are referenced in place, raw sources elsewhere are copied to
/// the canonical destination. A pre-existing destination short-circuits.
/// Decompression and copying are mutating steps, so in plan mode they
/// are logged and the would-be destination is returned untouched.
pub fn stage(
    candidate: &InstallerCandidate,
    work_root: &Utf8Path,
    driver: &Driver,
) -> Result<Utf8PathBuf> {
    let dest = staged_path(work_root, candidate);
    if dest.is_file() {
        debug!("staged media already present: {dest}");
        return Ok(dest);
    }
    if candidate.compression == Compression::None && candidate.path.parent() == Some(work_root) {
        debug!("raw installer already under work root, using in place");
        return Ok(candidate.path.clone());
    }

    if driver.is_plan() {
        match candidate.compression {
            Compression::Gzip => info!("plan: decompress {} -> {dest}", candidate.path),
            Compression::None => info!("plan: copy {} -> {dest}", candidate.path),
        }
        return Ok(dest);
    }

    std::fs::create_dir_all(work_root).map_err(|e| Error::io(work_root.as_str(), e))?;

    match candidate.compression {
        Compression::Gzip => {
            info!("decompressing {} -> {dest}", candidate.path);
            decompress_atomically(&candidate.path, &dest)?;
        }
        Compression::None => {
            info!("copying {} -> {dest}", candidate.path);
            copy_atomically(&candidate.path, &dest)?;
        }
    }

    Ok(dest)
}

/// Gunzip `source` into `dest` via temp-file-then-rename.
///
/// On any failure the temp file is dropped and `dest` is untouched.
fn decompress_atomically(source: &Utf8Path, dest: &Utf8Path) -> Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| Error::Runtime(format!("staging destination has no parent: {dest}")))?;
    let input = std::fs::File::open(source).map_err(|e| Error::io(source.as_str(), e))?;
    let mut decoder = GzDecoder::new(BufReader::new(input));

    let tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::io(dir.as_str(), e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        std::io::copy(&mut decoder, &mut writer)
            .and_then(|_| std::io::Write::flush(&mut writer))
            .map_err(|e| Error::Runtime(format!("decompressing {source} failed: {e}")))?;
    }
    tmp.persist(dest)
        .map_err(|e| Error::io(dest.as_str(), e.error))?;
    normalize_mode(dest)?;
    Ok(())
}

/// Copy `source` to `dest` with the same atomicity guarantee.
fn copy_atomically(source: &Utf8Path, dest: &Utf8Path) -> Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| Error::Runtime(format!("staging destination has no parent: {dest}")))?;
    let mut input = std::fs::File::open(source).map_err(|e| Error::io(source.as_str(), e))?;
    let tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::io(dir.as_str(), e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        std::io::copy(&mut input, &mut writer)
            .and_then(|_| std::io::Write::flush(&mut writer))
            .map_err(|e| Error::io(source.as_str(), e))?;
    }
    tmp.persist(dest)
        .map_err(|e| Error::io(dest.as_str(), e.error))?;
    normalize_mode(dest)?;
    Ok(())
}

/// Make staged media world-readable so the hypervisor user can open it.
#[cfg(unix)]
fn normalize_mode(path: &Utf8Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .map_err(|e| Error::io(path.as_str(), e))
}

#[cfg(not(unix))]
fn normalize_mode(_path: &Utf8Path) -> Result<()> {
    Ok(())
}
