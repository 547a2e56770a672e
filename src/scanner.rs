use failure::Fail;
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

#[derive(Fail, Debug)]
pub enum Error {
    #[fail(display = "Error walking {:?}: {}", root, cause)]
    Walk {
        root: PathBuf,
        #[fail(cause)]
        cause: walkdir::Error,
    },
    #[fail(display = "Invalid path: {:?}: {}", path, reason)]
    InvalidPath { path: PathBuf, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Image files found in one directory.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ImageGroup {
    /// Directory relative to the scan root, `/`-separated
    pub dir: String,
    pub files: Vec<String>,
}

/// Collect, per directory under `root/tracked`, the names of files ending
/// with `extension`. Directories without such files are left out.
pub fn scan<P: AsRef<Path>>(root: P, tracked: &str, extension: &str) -> Result<Vec<ImageGroup>> {
    let root = root.as_ref();
    let mut groups: Vec<ImageGroup> = Vec::new();
    let mut index: HashMap<PathBuf, usize> = HashMap::new();

    for entry in WalkDir::new(root.join(tracked)).sort_by(|a, b| a.file_name().cmp(b.file_name())) {
        let entry = entry.map_err(|cause| Error::Walk {
            root: root.to_path_buf(),
            cause,
        })?;
        if !is_file(&entry) {
            continue;
        }
        let name = match entry.file_name().to_str() {
            Some(name) if name.ends_with(extension) => name.to_string(),
            _ => continue,
        };

        let parent = entry.path().parent().ok_or_else(|| Error::InvalidPath {
            path: entry.path().to_path_buf(),
            reason: "no parent directory",
        })?;
        let slot = match index.get(parent) {
            Some(&slot) => slot,
            None => {
                groups.push(ImageGroup {
                    dir: relative_title(root, parent)?,
                    files: Vec::new(),
                });
                index.insert(parent.to_path_buf(), groups.len() - 1);
                groups.len() - 1
            }
        };
        debug!("Found {} in {}", name, groups[slot].dir);
        groups[slot].files.push(name);
    }

    Ok(groups)
}

/// Regular files and symlinks to them. Symlinked directories aren't descended.
fn is_file(entry: &DirEntry) -> bool {
    if entry.file_type().is_file() {
        return true;
    }
    entry.path_is_symlink()
        && fs::metadata(entry.path())
            .map(|m| m.is_file())
            .unwrap_or(false)
}

fn relative_title(root: &Path, dir: &Path) -> Result<String> {
    let rel = dir.strip_prefix(root).map_err(|_| Error::InvalidPath {
        path: dir.to_path_buf(),
        reason: "outside of scan root",
    })?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                Error::InvalidPath {
                    path: dir.to_path_buf(),
                    reason: "not valid UTF-8",
                }
            })?),
            _ => {
                return Err(Error::InvalidPath {
                    path: dir.to_path_buf(),
                    reason: "unexpected path component",
                })
            }
        }
    }
    Ok(parts.join("/"))
}
