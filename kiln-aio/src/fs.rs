/*
File: kiln-aio/src/fs.rs
Purpose: Primitive synchronous filesystem operations used while staging sources and
finishing a keg.
*/
use std::{
    fs,
    io::{self, Write},
    path::Path,
    sync::Arc,
};

use kiln_common::error::{KilnError, Result};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

/// Creates a directory and all its parent components if they are missing.
pub fn create_dir_all(path: &Path) -> Result<()> {
    debug!("Creating directory recursively: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        error!("Failed create dir {}: {}", path.display(), e);
        KilnError::from(e)
    })
}

/// Recursively copies the tree under `src` into `dst`, which is created if needed.
/// Symlinks are recreated rather than followed. Returns the number of files copied.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<usize> {
    debug!("Copying tree {} -> {}", src.display(), dst.display());
    create_dir_all(dst)?;
    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            KilnError::Io(Arc::new(io::Error::new(
                io::ErrorKind::Other,
                format!("walking {}: {}", src.display(), e),
            )))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| KilnError::NotFound(format!("{}: {}", entry.path().display(), e)))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(entry.path())?;
            create_symlink(&link_target, &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                error!(
                    "Failed copy {} -> {}: {}",
                    entry.path().display(),
                    target.display(),
                    e
                );
                KilnError::from(e)
            })?;
            copied += 1;
        }
    }
    debug!("Copied {} files into {}", copied, dst.display());
    Ok(copied)
}

/// Creates a symbolic link. Unix only.
#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    debug!("Creating symlink {} -> {}", link.display(), target.display());
    std::os::unix::fs::symlink(target, link).map_err(|e| {
        error!(
            "Failed create symlink {} -> {}: {}",
            link.display(),
            target.display(),
            e
        );
        KilnError::from(e)
    })
}

#[cfg(not(unix))]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    warn!(
        "Symlink creation not supported on this platform: {} -> {}",
        link.display(),
        target.display()
    );
    Err(KilnError::Config(
        "Symlinks not supported on this platform".to_string(),
    ))
}

/// Points `link` at `target`, replacing whatever link or file was there before.
pub fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        create_dir_all(parent)?;
    }
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.is_dir() && !meta.file_type().is_symlink() => {
            return Err(KilnError::Config(format!(
                "refusing to replace directory {} with a symlink",
                link.display()
            )));
        }
        Ok(_) => {
            debug!("Removing existing link {}", link.display());
            fs::remove_file(link)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    create_symlink(target, link)
}

/// Atomically writes data to a file using a temporary file in the same directory.
pub fn atomic_write_file(original_path: &Path, content: &[u8]) -> Result<()> {
    let dir = original_path.parent().ok_or_else(|| {
        KilnError::NotFound(format!(
            "Cannot get parent directory for {}",
            original_path.display()
        ))
    })?;
    create_dir_all(dir)?;

    let mut temp_file = NamedTempFile::new_in(dir)?;
    debug!(
        "Atomically writing {} bytes to {} via temp file {}",
        content.len(),
        original_path.display(),
        temp_file.path().display()
    );
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;

    temp_file.persist(original_path).map_err(|e| {
        error!(
            "Failed to persist temporary file over {}: {}",
            original_path.display(),
            e.error
        );
        KilnError::Io(Arc::new(e.error))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(original_path, fs::Permissions::from_mode(0o644)) {
            warn!(
                "Failed to set permissions on {}: {}",
                original_path.display(),
                e
            );
        }
    }
    Ok(())
}
