use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::region::{self, Markers, PLACEHOLDER_LINE, Region};

const BACKUP_SUFFIX: &str = ".quick-proxy-setup.bak";

/// Deterministic sibling backup path for a managed file.
pub fn backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".into());
    path.with_file_name(format!("{name}{BACKUP_SUFFIX}"))
}

/// Owns one managed file and the fixed-length region inside it.
///
/// The whole file is held as a line buffer. Mutations render the full buffer
/// and replace the file; the previous content is copied to [`backup_path`]
/// first.
#[derive(Debug)]
pub struct ConfigMutator {
    path: PathBuf,
    markers: Markers,
    len: usize,
    lines: Vec<String>,
}

impl ConfigMutator {
    pub fn open(path: impl Into<PathBuf>, markers: Markers, len: usize) -> Result<Self> {
        let mut m = Self {
            path: path.into(),
            markers,
            len,
            lines: Vec::new(),
        };
        m.reload()?;
        Ok(m)
    }

    /// Like [`ConfigMutator::open`], but creates missing parent directories and
    /// an empty file first.
    pub fn open_or_create(path: impl Into<PathBuf>, markers: Markers, len: usize) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::new(
                        ErrorKind::ExternalTool,
                        format!("failed to create dir {}: {e}", parent.display()),
                    )
                })?;
            }
            fs::write(&path, "").map_err(|e| {
                Error::new(
                    ErrorKind::ExternalTool,
                    format!("failed to create {}: {e}", path.display()),
                )
            })?;
            debug!(path = %path.display(), "created empty config file");
        }
        Self::open(path, markers, len)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }

    pub fn reload(&mut self) -> Result<()> {
        let data = fs::read_to_string(&self.path).map_err(|e| {
            Error::new(
                ErrorKind::Io,
                format!("failed to read {}: {e}", self.path.display()),
            )
        })?;
        self.lines = data.split('\n').map(ToOwned::to_owned).collect();
        Ok(())
    }

    pub fn region(&self) -> Result<Option<Region>> {
        region::locate(&self.lines, &self.markers, self.len)
    }

    /// Current interior lines, `None` before `initialize`.
    pub fn interior(&self) -> Result<Option<&[String]>> {
        Ok(self.region()?.map(|r| &self.lines[r.interior()]))
    }

    pub fn ensure_absent(&self) -> Result<()> {
        if let Some(r) = self.region()? {
            return Err(Error::new(
                ErrorKind::AlreadyInitialized,
                format!(
                    "{} already has a managed region at line {}",
                    self.path.display(),
                    r.start + 1
                ),
            ));
        }
        Ok(())
    }

    /// Appends an empty region at the end of the file.
    pub fn initialize(&mut self) -> Result<()> {
        self.ensure_absent()?;

        let mut text = self.render();
        text.push_str("\n\n");
        text.push_str(&self.markers.start);
        for _ in 0..self.len {
            text.push('\n');
            text.push_str(PLACEHOLDER_LINE);
        }
        text.push('\n');
        text.push_str(&self.markers.end);
        text.push('\n');

        self.write(&text)?;
        self.reload()
    }

    /// Replaces interior line `i` with `lines[i]`.
    pub fn set_lines<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<()> {
        if lines.len() != self.len {
            return Err(Error::new(
                ErrorKind::ArityMismatch,
                format!(
                    "{} expects {} managed lines, got {}",
                    self.path.display(),
                    self.len,
                    lines.len()
                ),
            ));
        }
        let Some(r) = self.region()? else {
            return Err(Error::new(
                ErrorKind::RegionNotFound,
                format!(
                    "no managed region in {}; run init first",
                    self.path.display()
                ),
            ));
        };

        let mut next = self.lines.clone();
        for (slot, line) in next[r.interior()].iter_mut().zip(lines) {
            *slot = line.as_ref().to_string();
        }
        self.write(&next.join("\n"))?;
        self.lines = next;
        Ok(())
    }

    pub fn clear_lines(&mut self) -> Result<()> {
        let blank = vec![PLACEHOLDER_LINE; self.len];
        self.set_lines(&blank)
    }

    fn write(&self, contents: &str) -> Result<()> {
        if self.path.exists() {
            let backup = backup_path(&self.path);
            fs::copy(&self.path, &backup).map_err(|e| {
                Error::new(
                    ErrorKind::Io,
                    format!(
                        "failed to back up {} to {}: {e}",
                        self.path.display(),
                        backup.display()
                    ),
                )
            })?;
            debug!(path = %self.path.display(), backup = %backup.display(), "backed up config file");
        }
        write_replace(&self.path, contents)?;
        debug!(path = %self.path.display(), bytes = contents.len(), "rewrote config file");
        Ok(())
    }
}

// Write to a sibling temp file and rename it over the target. Symlinks are
// followed so dotfile-manager links keep pointing at the real file.
fn write_replace(path: &Path, contents: &str) -> Result<()> {
    let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let io_err = |e: std::io::Error| {
        Error::new(
            ErrorKind::Io,
            format!("failed to write {}: {e}", target.display()),
        )
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(contents.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    if let Ok(meta) = fs::metadata(&target) {
        fs::set_permissions(tmp.path(), meta.permissions()).map_err(io_err)?;
    }
    tmp.persist(&target).map_err(|e| io_err(e.error))?;
    Ok(())
}
