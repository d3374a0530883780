//! Installer media discovery
//!
//! Finds the pfSense installer image for a run. Resolution is
//! deterministic: an explicit override path wins (and failing to
//! satisfy it is fatal), then the named environment keys in fixed
//! priority order, then an ordered directory/pattern scan where
//! "serial" media outrank graphical ones, compressed outrank raw, and
//! the most recently modified file wins ties within one pattern.

use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::config_iso::{CONFIG_ISO_LATEST, CONFIG_ISO_LEGACY};
use crate::env::Env;
use crate::errors::{Error, Result};

/// Payload format of an installer image, inferred from its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    /// Raw disk image (`.img`), attached as a USB disk.
    RawDisk,
    /// Optical image (`.iso`), attached as a cdrom.
    OpticalImage,
}

impl MediaFormat {
    /// Canonical extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::RawDisk => "img",
            MediaFormat::OpticalImage => "iso",
        }
    }
}

/// Compression wrapping around the installer payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Gzip-compressed, must be staged before attachment.
    Gzip,
    /// Directly attachable.
    None,
}

/// One resolved installer image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerCandidate {
    /// Absolute path to the media file.
    pub path: Utf8PathBuf,
    /// Inferred payload format.
    pub format: MediaFormat,
    /// Inferred compression.
    pub compression: Compression,
}

impl InstallerCandidate {
    /// Infer format and compression from a file name.
    ///
    /// Fails with a configuration error when the name matches neither
    /// `.img[.gz]` nor `.iso[.gz]` — an explicitly named installer we
    /// cannot classify is operator error, not something to guess at.
    pub fn from_path(path: &Utf8Path) -> Result<Self> {
        let name = path.file_name().unwrap_or_default();
        let (stem, compression) = match name.strip_suffix(".gz") {
            Some(stem) => (stem, Compression::Gzip),
            None => (name, Compression::None),
        };
        let format = if stem.ends_with(".img") {
            MediaFormat::RawDisk
        } else if stem.ends_with(".iso") {
            MediaFormat::OpticalImage
        } else {
            return Err(Error::Config(format!(
                "cannot infer installer format from '{path}' (expected .img/.iso, optionally .gz)"
            )));
        };
        Ok(InstallerCandidate {
            path: path.to_owned(),
            format,
            compression,
        })
    }
}

/// One entry of the ordered search-pattern ladder.
#[derive(Debug, Clone, Copy)]
struct SearchPattern {
    /// File name must contain "serial" when set.
    serial: bool,
    /// Required file name suffix.
    suffix: &'static str,
}

impl SearchPattern {
    fn matches(&self, name: &str) -> bool {
        name.ends_with(self.suffix) && (!self.serial || name.contains("serial"))
    }

    fn display(&self) -> String {
        if self.serial {
            format!("*serial*{}", self.suffix)
        } else {
            format!("*{}", self.suffix)
        }
    }
}

/// Most-specific-first: serial before graphical, compressed before
/// raw, disk image before optical.
const SEARCH_PATTERNS: &[SearchPattern] = &[
    SearchPattern { serial: true, suffix: ".img.gz" },
    SearchPattern { serial: true, suffix: ".iso.gz" },
    SearchPattern { serial: true, suffix: ".img" },
    SearchPattern { serial: true, suffix: ".iso" },
    SearchPattern { serial: false, suffix: ".img.gz" },
    SearchPattern { serial: false, suffix: ".iso.gz" },
    SearchPattern { serial: false, suffix: ".img" },
    SearchPattern { serial: false, suffix: ".iso" },
];

/// Locate the installer for this run, or `Ok(None)` when nothing was
/// found anywhere. The caller decides whether `None` is fatal: it is
/// when the domain does not exist yet, and only a warning otherwise.
pub fn locate(env: &Env) -> Result<Option<InstallerCandidate>> {
    // 1. Explicit override: not satisfiable means fatal, never a
    // silent fall-through to weaker sources.
    if let Some(override_path) = &env.installer_override {
        return match existing_with_sibling(override_path) {
            Some(path) => Ok(Some(InstallerCandidate::from_path(&path)?)),
            None => Err(Error::Config(format!(
                "installer override '{override_path}' not found (also tried its .gz sibling)"
            ))),
        };
    }

    // 2. Named environment keys, fixed priority order.
    for named in [&env.installer_img, &env.installer_iso]
        .into_iter()
        .flatten()
    {
        if let Some(path) = existing_with_sibling(named) {
            debug!("installer resolved from named key: {path}");
            return Ok(Some(InstallerCandidate::from_path(&path)?));
        }
    }

    // 3. Ordered directory/pattern scan; the first directory yielding
    // any match wins, later directories are not consulted.
    for dir in env.installer_search_dirs() {
        if let Some(found) = scan_directory(&dir)? {
            return Ok(Some(found));
        }
    }

    Ok(None)
}

/// Check `path` for existence, falling back to its compression
/// sibling (`foo.img.gz` for `foo.img` and vice versa).
fn existing_with_sibling(path: &Utf8Path) -> Option<Utf8PathBuf> {
    if path.is_file() {
        return Some(path.to_owned());
    }
    let sibling = match path.as_str().strip_suffix(".gz") {
        Some(raw) => Utf8PathBuf::from(raw),
        None => Utf8PathBuf::from(format!("{path}.gz")),
    };
    sibling.is_file().then_some(sibling)
}

/// Scan one directory through the pattern ladder; within one pattern
/// the most recently modified match wins. The rendered configuration
/// ISO lives in the same work root and also ends in `.iso`, so it is
/// excluded by name: it is never installer media.
fn scan_directory(dir: &Utf8Path) -> Result<Option<InstallerCandidate>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let entries = collect_files(dir)?;
    for pattern in SEARCH_PATTERNS {
        let best = entries
            .iter()
            .filter(|(name, _, _)| {
                name != CONFIG_ISO_LATEST && name != CONFIG_ISO_LEGACY && pattern.matches(name)
            })
            .max_by_key(|(_, _, mtime)| *mtime);
        if let Some((name, path, _)) = best {
            debug!("installer matched {} in {dir}: {name}", pattern.display());
            return Ok(Some(InstallerCandidate::from_path(path)?));
        }
    }
    Ok(None)
}

fn collect_files(dir: &Utf8Path) -> Result<Vec<(String, Utf8PathBuf, SystemTime)>> {
    let mut out = Vec::new();
    let entries = dir.read_dir_utf8().map_err(|e| Error::io(dir.as_str(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir.as_str(), e))?;
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        let mtime = meta.modified().map_err(|e| Error::io(dir.as_str(), e))?;
        out.push((entry.file_name().to_string(), entry.into_path(), mtime));
    }
    Ok(out)
}
