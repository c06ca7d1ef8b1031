use std::path::{Path, PathBuf};

use anyhow::Context;
use tempfile::TempPath;

const TEMP_SUFFIX_LEN: usize = 6;

/// The file a disk churner works on.
#[derive(Debug)]
pub struct DiskTarget {
    pub path: PathBuf,
    /// Set if we created the file; dropping it deletes the file
    pub temp: Option<TempPath>,
}

impl DiskTarget {
    /// Uses `path` as is, unless it is a directory, in which case a fresh file is created inside it.
    pub fn resolve(path: &Path) -> anyhow::Result<Self> {
        if path.is_dir() {
            let temp = create_temp_file_in(path)?;
            Ok(Self {
                path: temp.to_path_buf(),
                temp: Some(temp),
            })
        } else {
            Ok(Self {
                path: path.to_path_buf(),
                temp: None,
            })
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

/// Creates an empty file `lb.<pid>.<random>` with mode 0600 in `dir` that did not exist before.
pub fn create_temp_file_in(dir: &Path) -> anyhow::Result<TempPath> {
    let file = tempfile::Builder::new()
        .prefix(&format!("lb.{}.", std::process::id()))
        .rand_bytes(TEMP_SUFFIX_LEN)
        .tempfile_in(dir)
        .with_context(|| format!("disk path {dir:?} is not writable"))?;
    Ok(file.into_temp_path())
}
