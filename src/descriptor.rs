use crate::error::TestbedError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDescriptor {
    namespace: String,
    manifests: Vec<PathBuf>,
    working_directory: PathBuf,
    environment_variables: BTreeMap<String, String>,
}

impl EnvironmentDescriptor {
    pub fn new(namespace: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            namespace: namespace.into(),
            manifests: Vec::new(),
            working_directory: working_directory.into(),
            environment_variables: BTreeMap::new(),
        }
    }

    pub fn manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifests.push(path.into());
        self
    }

    pub fn manifests<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.manifests.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_variables.insert(key.into(), value.into());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn manifest_paths(&self) -> &[PathBuf] {
        &self.manifests
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn environment_variables(&self) -> &BTreeMap<String, String> {
        &self.environment_variables
    }

    pub fn network_name(&self) -> String {
        format!("{}_default", self.namespace)
    }

    pub fn validate(&self) -> Result<(), TestbedError> {
        if self.namespace.trim().is_empty() {
            return Err(TestbedError::Config(
                "namespace must be non-empty".to_string(),
            ));
        }
        if !is_valid_project_name(&self.namespace) {
            return Err(TestbedError::Config(format!(
                "namespace '{}' is not a valid project name (lowercase letters, digits, '-' and '_', starting with a letter or digit)",
                self.namespace
            )));
        }
        if self.manifests.is_empty() {
            return Err(TestbedError::Config(
                "at least one manifest is required".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_valid_project_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}
