use std::{fs, path::PathBuf};

use super::{DispatchError, SchedulerJob};

/// Persisted list of installed jobs, read back by
/// [`DispatchScheduler::restore`](super::DispatchScheduler::restore).
pub struct JobTable {
    path: Option<PathBuf>,
}

impl JobTable {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn load(&self) -> Result<Vec<SchedulerJob>, DispatchError> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, jobs: &[SchedulerJob]) -> Result<(), DispatchError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let persisted: Vec<&SchedulerJob> = jobs.iter().filter(|j| j.persisted).collect();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&persisted)?)?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}
