use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Model and policy files in a temporary directory, removed on drop
pub struct TestFiles {
    dir: TempDir,
    model_path: PathBuf,
    policy_path: PathBuf,
}

impl TestFiles {
    pub fn new(model: &str, policy: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let model_path = dir.path().join("model.conf");
        let policy_path = dir.path().join("policy.csv");
        std::fs::write(&model_path, model).expect("Failed to write model");
        std::fs::write(&policy_path, policy).expect("Failed to write policy");
        Self {
            dir,
            model_path,
            policy_path,
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn policy_path(&self) -> &Path {
        &self.policy_path
    }

    pub fn write_policy(&self, policy: &str) {
        std::fs::write(&self.policy_path, policy).expect("Failed to write policy");
    }

    pub fn read_policy(&self) -> String {
        std::fs::read_to_string(&self.policy_path).expect("Failed to read policy")
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
