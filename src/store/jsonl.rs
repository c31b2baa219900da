use std::{
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex as StdMutex,
};

use super::{LocationStore, StoreError};
use crate::tracking::PositionSample;

/// Buffer kept as one JSON document per line, so samples survive a restart.
pub struct JsonLinesStore {
    path: PathBuf,
    // Serializes appends against drains; a line is written in one call.
    lock: StdMutex<()>,
}

impl JsonLinesStore {
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: StdMutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<PositionSample>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut samples = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(sample) => samples.push(sample),
                // A torn tail line from a crash mid-write.
                Err(e) => log::warn!(
                    "Skipping unreadable line {} in {}: {}",
                    i + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(samples)
    }
}

impl LocationStore for JsonLinesStore {
    fn append(&self, sample: PositionSample) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&sample)?;
        line.push('\n');

        let _guard = self.lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        if ends_torn(&mut file)? {
            // Close off the fragment so it does not swallow this sample.
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn drain_all(&self) -> Result<Vec<PositionSample>, StoreError> {
        let _guard = self.lock.lock().unwrap();
        let samples = self.read_all()?;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(samples)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.read_all()?.len())
    }
}

/// Whether the file ends part way through a line.
fn ends_torn(file: &mut fs::File) -> Result<bool, StoreError> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
