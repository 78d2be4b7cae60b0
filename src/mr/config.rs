use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

use super::error::{Stage, StageError};

/// What a stage does when a partition cannot be opened, read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run with the first storage or input error.
    #[default]
    Propagate,
    /// Log the error and carry on as if the partition held no (more) data.
    Tolerate,
}

impl FailurePolicy {
    /// Applies the policy to one partition-level result. Callback and join
    /// failures always pass through untouched.
    pub fn settle<T: Default>(self, stage: Stage, result: Result<T, StageError>) -> Result<T, StageError> {
        match result {
            Err(err) if self == FailurePolicy::Tolerate && err.is_io_failure() => {
                log::error!("{} stage: {}; continuing without that data", stage, err);
                Ok(T::default())
            }
            other => other,
        }
    }
}

/// File-name prefixes of the intermediate and output stores. Partition `i`
/// of a store lives at `<dir>/<prefix><i>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreNames {
    pub mapper_out: String,
    pub combiner_out: String,
    pub reducer_in: String,
    pub reducer_out: String,
}

impl Default for StoreNames {
    fn default() -> Self {
        StoreNames {
            mapper_out: "mapper_out".to_string(),
            combiner_out: "combiner_out".to_string(),
            reducer_in: "reducer_in".to_string(),
            reducer_out: "reducer_out".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapReduceConfig {
    pub mappers: usize,
    pub reducers: usize,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub store_names: StoreNames,
    /// Upper bound on concurrently running tasks of one stage. Defaults to
    /// the stage's partition count.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./work/")
}

impl MapReduceConfig {
    pub fn new(mappers: usize, reducers: usize) -> Self {
        MapReduceConfig {
            mappers,
            reducers,
            work_dir: default_work_dir(),
            store_names: StoreNames::default(),
            max_concurrency: None,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let config: MapReduceConfig = serde_json::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_store_names(mut self, store_names: StoreNames) -> Self {
        self.store_names = store_names;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.mappers == 0 {
            return Err(anyhow!("mapper count must be positive"));
        }
        if self.reducers == 0 {
            return Err(anyhow!("reducer count must be positive"));
        }
        if self.max_concurrency == Some(0) {
            return Err(anyhow!("max_concurrency must be positive"));
        }
        let names = &self.store_names;
        let in_work_dir = [&names.mapper_out, &names.combiner_out, &names.reducer_in];
        if in_work_dir.iter().chain([&&names.reducer_out]).any(|name| name.is_empty()) {
            return Err(anyhow!("store names must not be empty"));
        }
        for (i, a) in in_work_dir.iter().enumerate() {
            if in_work_dir[i + 1..].contains(a) {
                return Err(anyhow!("store name {:?} is used twice in the work directory", a));
            }
        }
        Ok(())
    }

    /// Number of tasks of a stage with `partitions` partitions allowed to
    /// run at once.
    pub fn concurrency(&self, partitions: usize) -> usize {
        self.max_concurrency
            .map_or(partitions, |limit| limit.min(partitions))
            .max(1)
    }

    pub fn work_path(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }
}
