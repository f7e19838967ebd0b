use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A temporary directory of `.kdl` policy files
pub struct PolicyDir {
    dir: TempDir,
}

impl PolicyDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn with_file(self, name: &str, contents: &str) -> Self {
        fs::write(self.dir.path().join(name), contents).expect("Failed to write policy file");
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
