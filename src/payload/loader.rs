use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ClusterError, Result};
use crate::payload::job::Job;
use crate::payload::range_sum::RangeSum;

/// Turns a payload file into a runnable [`Job`].
pub trait WorkLoader: Send + Sync {
    fn load(&self, payload: &Path) -> Result<Box<dyn Job>>;
}

/// Contents of a payload file: which registered job to run, plus its settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub job: String,
    #[serde(default)]
    pub nodes: Option<usize>,
}

pub type JobFactory = fn(&Manifest) -> Box<dyn Job>;

/// Resolves manifests against jobs registered at compile time.
#[derive(Default)]
pub struct RegistryLoader {
    factories: HashMap<String, JobFactory>,
}

impl RegistryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader knowing every job shipped with this crate.
    pub fn with_builtin() -> Self {
        let mut loader = Self::new();
        loader.register(RangeSum::NAME, RangeSum::from_manifest);
        loader
    }

    pub fn register(&mut self, name: &str, factory: JobFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl WorkLoader for RegistryLoader {
    fn load(&self, payload: &Path) -> Result<Box<dyn Job>> {
        let text = std::fs::read_to_string(payload)?;
        let manifest: Manifest = serde_json::from_str(&text)?;
        let factory = self
            .factories
            .get(&manifest.job)
            .ok_or_else(|| ClusterError::UnknownPayload(manifest.job.clone()))?;
        Ok(factory(&manifest))
    }
}
