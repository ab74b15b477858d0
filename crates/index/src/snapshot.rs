use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::backend::PersistOutcome;
use crate::error::{IndexError, Result};

/// Reads a snapshot; a missing file is `Ok(None)`.
pub(crate) fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).map_err(|err| IndexError::io(path, err))?;
    let value = serde_json::from_reader(BufReader::new(file))?;
    Ok(Some(value))
}

/// Rewrites the whole snapshot through a sibling temp file and a rename.
pub(crate) fn write<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| IndexError::io(parent, err))?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    {
        let file = File::create(&tmp).map_err(|err| IndexError::io(&tmp, err))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush().map_err(|err| IndexError::io(&tmp, err))?;
    }
    fs::rename(&tmp, path).map_err(|err| IndexError::io(path, err))?;
    Ok(())
}

pub(crate) fn persist<T: Serialize>(backend: &str, path: &Path, value: &T) -> PersistOutcome {
    let started = Instant::now();
    match write(path, value) {
        Ok(()) => PersistOutcome::Written {
            elapsed: started.elapsed(),
        },
        Err(err) => {
            warn!(backend, path = %path.display(), "snapshot write failed: {err}");
            PersistOutcome::Failed(err.to_string())
        }
    }
}

pub(crate) fn load_or_default<T: DeserializeOwned + Default>(backend: &str, path: &Path) -> T {
    match read(path) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(err) => {
            warn!(backend, path = %path.display(), "ignoring unreadable snapshot: {err}");
            T::default()
        }
    }
}
