//! Kernel firmware search path handling.
//!
//! The flash-update command names firmware by file name only, so the image
//! has to be placed where the kernel firmware loader looks for it.

use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::DevlinkError;

/// A directory the kernel firmware loader searches while this value lives.
pub trait FirmwareSearchPath: Send {
    fn path(&self) -> &Path;
}

/// Points the firmware loader's custom search path at a directory and puts
/// the previous value back on drop.
#[derive(Debug)]
pub struct KernelSearchPathLocker {
    sysfs_param: PathBuf,
    path: PathBuf,
    previous: Option<String>,
}

impl KernelSearchPathLocker {
    /// Lock `path` into the loader parameter file `sysfs_param`
    /// (normally `/sys/module/firmware_class/parameters/path`).
    pub fn new(sysfs_param: &Path, path: &Path) -> Result<Self, DevlinkError> {
        let current = fs::read_to_string(sysfs_param).map_err(|e| {
            DevlinkError::from(e).context(format!("failed to read {}", sysfs_param.display()))
        })?;
        let current = current.trim_end_matches('\n').to_string();
        let wanted = path.to_string_lossy().into_owned();

        if current == wanted {
            debug!(path = %wanted, "Firmware search path already set");
            return Ok(Self {
                sysfs_param: sysfs_param.to_path_buf(),
                path: path.to_path_buf(),
                previous: None,
            });
        }

        fs::write(sysfs_param, &wanted).map_err(|e| {
            DevlinkError::from(e).context(format!("failed to write {}", sysfs_param.display()))
        })?;
        debug!(old = %current, new = %wanted, "Firmware search path locked");
        Ok(Self {
            sysfs_param: sysfs_param.to_path_buf(),
            path: path.to_path_buf(),
            previous: Some(current),
        })
    }
}

impl FirmwareSearchPath for KernelSearchPathLocker {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for KernelSearchPathLocker {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        // An empty write would be ignored by the kernel; a single newline clears it.
        let value = if previous.is_empty() { "\n".to_string() } else { previous };
        match fs::write(&self.sysfs_param, &value) {
            Ok(()) => debug!(path = %value.trim_end(), "Firmware search path restored"),
            Err(e) => warn!(error = %e, "Failed to restore firmware search path"),
        }
    }
}

/// Create `dir` and any missing parents with mode 0700.
pub fn ensure_firmware_dir(dir: &Path) -> Result<(), DevlinkError> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| DevlinkError::Internal(format!("failed to create '{}': {e}", dir.display())))
}

/// A firmware image written into the search path, removed on drop.
#[derive(Debug)]
pub struct FirmwareFile {
    path: PathBuf,
}

impl FirmwareFile {
    /// Write `data` to `dir/name`. A partially written file is removed
    /// before the error is returned.
    pub fn create(dir: &Path, name: &str, data: &[u8]) -> Result<Self, DevlinkError> {
        let file = Self {
            path: dir.join(name),
        };
        debug!(path = %file.path.display(), len = data.len(), "Writing firmware");
        file.write(data)
            .map_err(|e| DevlinkError::from(e).context(format!("failed to write {}", file.path.display())))?;
        Ok(file)
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        use std::io::Write;
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)?;
        f.write_all(data)?;
        f.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name the kernel is given in `FLASH_UPDATE_FILE_NAME`.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Drop for FirmwareFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to delete temporary firmware file");
            }
        }
    }
}

/// `<bus>-<dev>-<component|default>.bin`
pub fn firmware_file_name(bus_name: &str, dev_name: &str, component: Option<&str>) -> String {
    format!("{}-{}-{}.bin", bus_name, dev_name, component.unwrap_or("default"))
}
