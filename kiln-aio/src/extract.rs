// kiln-aio/src/extract.rs
// Unpacks source tarballs into a staging directory.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use kiln_common::error::{KilnError, Result};
use tar::Archive;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// Infers the archive kind from the file name (`.tar`, `.tar.gz`, `.tgz`).
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

fn open_archive(path: &Path, kind: ArchiveKind) -> Result<Archive<Box<dyn Read>>> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = match kind {
        ArchiveKind::Tar => Box::new(file),
        ArchiveKind::TarGz => Box::new(GzDecoder::new(file)),
    };
    Ok(Archive::new(reader))
}

fn extract_err(archive: &Path, what: impl std::fmt::Display) -> KilnError {
    KilnError::Extract(format!("{}: {}", archive.display(), what))
}

/// Returns the single top-level directory every entry lives under, if there is one.
pub fn infer_archive_root_dir(archive_path: &Path, kind: ArchiveKind) -> Result<Option<PathBuf>> {
    let mut archive = open_archive(archive_path, kind)?;
    let mut roots = HashSet::new();
    let mut nested = false;

    for entry in archive.entries().map_err(|e| extract_err(archive_path, e))? {
        let entry = entry.map_err(|e| extract_err(archive_path, e))?;
        let path = entry
            .path()
            .map_err(|e| extract_err(archive_path, e))?
            .into_owned();
        let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
        match components.next() {
            Some(Component::Normal(name)) => {
                roots.insert(PathBuf::from(name));
                if roots.len() > 1 {
                    debug!(
                        "Multiple top-level items in {}, no single root.",
                        archive_path.display()
                    );
                    return Ok(None);
                }
                if components.next().is_some() || entry.header().entry_type().is_dir() {
                    nested = true;
                }
            }
            Some(_) => return Ok(None),
            None => continue,
        }
    }

    if nested {
        Ok(roots.into_iter().next())
    } else {
        Ok(None)
    }
}

/// Maps an archive member path onto `root` after dropping `strip_components` leading
/// components. `Ok(None)` means nothing is left after stripping.
fn staged_path(
    root: &Path,
    archive_path: &Path,
    member: &Path,
    strip_components: usize,
) -> Result<Option<PathBuf>> {
    let stripped: Vec<Component> = member
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .skip(strip_components)
        .collect();
    if stripped.is_empty() {
        return Ok(None);
    }
    let mut target_path = root.to_path_buf();
    for comp in stripped {
        match comp {
            Component::Normal(p) => target_path.push(p),
            _ => {
                error!(
                    "Unsafe component {:?} in TAR path {} within {}",
                    comp,
                    member.display(),
                    archive_path.display()
                );
                return Err(extract_err(
                    archive_path,
                    format!("unsafe path component in {}", member.display()),
                ));
            }
        }
    }
    Ok(Some(target_path))
}

/// Resolves `..` and `.` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Fails unless the nearest existing ancestor of `path` (itself included) resolves
/// inside `root`. Catches symlinks already on disk that point out of the tree.
fn ensure_within(root: &Path, archive_path: &Path, path: &Path) -> Result<()> {
    let mut existing = path;
    while fs::symlink_metadata(existing).is_err() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }
    let resolved = existing.canonicalize().map_err(|e| {
        extract_err(archive_path, format!("cannot resolve {}: {}", existing.display(), e))
    })?;
    if !resolved.starts_with(root) {
        error!(
            "{} resolves to {}, outside the extraction directory {}",
            path.display(),
            resolved.display(),
            root.display()
        );
        return Err(extract_err(
            archive_path,
            format!("{} leads outside {}", path.display(), root.display()),
        ));
    }
    Ok(())
}

/// Extracts `archive_path` into `target_dir`, dropping the first
/// `strip_components` path components of every entry. Entries that would escape
/// `target_dir`, directly or through a link, abort the extraction.
pub fn extract_archive(
    archive_path: &Path,
    kind: ArchiveKind,
    target_dir: &Path,
    strip_components: usize,
) -> Result<usize> {
    debug!(
        "Extracting archive '{}' ({:?}) to '{}' (strip_components={})",
        archive_path.display(),
        kind,
        target_dir.display(),
        strip_components
    );
    crate::fs::create_dir_all(target_dir)?;
    let root = target_dir.canonicalize()?;
    let mut archive = open_archive(archive_path, kind)?;
    archive.set_preserve_permissions(true);

    let mut unpacked = 0;
    for entry in archive.entries().map_err(|e| extract_err(archive_path, e))? {
        let mut entry = entry.map_err(|e| extract_err(archive_path, e))?;
        let original_path = entry
            .path()
            .map_err(|e| extract_err(archive_path, e))?
            .into_owned();
        let Some(target_path) =
            staged_path(&root, archive_path, &original_path, strip_components)?
        else {
            continue;
        };
        let parent = target_path.parent().unwrap_or(&root).to_path_buf();
        ensure_within(&root, archive_path, &parent)?;

        let entry_type = entry.header().entry_type();
        let link_name = if entry_type.is_symlink() || entry_type.is_hard_link() {
            let link = entry
                .link_name()
                .map_err(|e| extract_err(archive_path, e))?
                .ok_or_else(|| {
                    extract_err(
                        archive_path,
                        format!("link {} has no target", original_path.display()),
                    )
                })?;
            Some(link.into_owned())
        } else {
            None
        };
        if let (true, Some(link)) = (entry_type.is_symlink(), &link_name) {
            let resolved = normalize_lexically(&parent.join(link));
            if !resolved.starts_with(&root) {
                error!(
                    "Symlink {} -> {} points outside the extraction directory",
                    original_path.display(),
                    link.display()
                );
                return Err(extract_err(
                    archive_path,
                    format!(
                        "symlink {} -> {} points outside the extraction directory",
                        original_path.display(),
                        link.display()
                    ),
                ));
            }
        }

        crate::fs::create_dir_all(&parent)?;
        // Never write through a link that is already on disk at this path.
        if fs::symlink_metadata(&target_path).is_ok_and(|m| m.file_type().is_symlink()) {
            fs::remove_file(&target_path)?;
        }

        if let (true, Some(link)) = (entry_type.is_hard_link(), &link_name) {
            if link.has_root() {
                return Err(extract_err(
                    archive_path,
                    format!("hard link {} has an absolute target", original_path.display()),
                ));
            }
            let source = staged_path(&root, archive_path, link, strip_components)?.ok_or_else(
                || {
                    extract_err(
                        archive_path,
                        format!("hard link {} has an empty target", original_path.display()),
                    )
                },
            )?;
            ensure_within(&root, archive_path, &source)?;
            if fs::symlink_metadata(&target_path).is_ok() {
                fs::remove_file(&target_path)?;
            }
            fs::hard_link(&source, &target_path).map_err(|e| {
                extract_err(archive_path, format!("{}: {}", original_path.display(), e))
            })?;
            unpacked += 1;
            continue;
        }

        entry.unpack(&target_path).map_err(|e| {
            warn!("Failed to unpack {}: {}", target_path.display(), e);
            extract_err(archive_path, format!("{}: {}", original_path.display(), e))
        })?;
        unpacked += 1;
    }
    debug!("Unpacked {} entries from {}", unpacked, archive_path.display());
    Ok(unpacked)
}

/// Extracts a source tarball, stripping its single root directory when it has one.
pub fn extract_source_archive(archive_path: &Path, target_dir: &Path) -> Result<usize> {
    let kind = ArchiveKind::from_path(archive_path).ok_or_else(|| {
        extract_err(archive_path, "unsupported archive type (expected .tar, .tar.gz or .tgz)")
    })?;
    let strip = match infer_archive_root_dir(archive_path, kind)? {
        Some(root) => {
            debug!("Stripping archive root '{}'", root.display());
            1
        }
        None => 0,
    };
    extract_archive(archive_path, kind, target_dir, strip)
}
