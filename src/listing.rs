//! Sender-side listing traversal.
//!
//! Every command-line argument is expanded eagerly, before the connection
//! starts, into an ordered sequence of entries. A directory's entry always
//! precedes the entries beneath it, and the argument's basename names the
//! root entry on the wire.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use walkdir::WalkDir;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

#[derive(Clone, Debug)]
pub struct ListingEntry {
    pub kind: EntryKind,
    /// Receiver-visible path, `/`-separated regardless of host OS.
    pub relative_path: String,
    pub absolute_path: PathBuf,
}

#[derive(Default)]
pub struct FileListing {
    entries: Vec<ListingEntry>,
}

impl FileListing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expands one argument: the entry itself, then its children depth
    /// first in the order the filesystem reports them.
    pub fn add(&mut self, path: &Path) -> Result<()> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("path `{}` does not exist", path.display()))?;

        let root_name = absolute
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("path `{}` has no usable basename", path.display()))?;

        for entry in WalkDir::new(&absolute).follow_links(false) {
            let entry = entry.with_context(|| format!("walking `{}`", absolute.display()))?;

            let kind = if entry.file_type().is_dir() {
                EntryKind::Directory
            } else if entry.file_type().is_file() {
                EntryKind::File
            } else {
                // Symlinks and special files are not transferable.
                continue;
            };

            let suffix = entry
                .path()
                .strip_prefix(&absolute)
                .with_context(|| format!("`{}` escaped its root", entry.path().display()))?;

            let mut relative_path = root_name.clone();
            for component in suffix.components() {
                let name = component
                    .as_os_str()
                    .to_str()
                    .ok_or_else(|| anyhow!("`{}` is not valid UTF-8", entry.path().display()))?;
                relative_path.push('/');
                relative_path.push_str(name);
            }

            self.entries.push(ListingEntry {
                kind,
                relative_path,
                absolute_path: entry.path().to_path_buf(),
            });
        }
        Ok(())
    }

    pub fn finalize(self) -> Result<Vec<ListingEntry>> {
        if self.entries.is_empty() {
            bail!("no files to send");
        }
        Ok(self.entries)
    }
}
