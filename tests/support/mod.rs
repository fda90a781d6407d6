use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join(".plnr")
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        fs::create_dir_all(self.data_dir())?;
        let path = self.data_dir().join(".plnr.toml");
        fs::write(&path, contents)?;
        Ok(path)
    }
}

pub fn plnr_cmd(dir: &TestDir) -> Command {
    let mut cmd = Command::cargo_bin("plnr").expect("plnr binary");
    cmd.current_dir(dir.path());
    cmd.env_remove("PLNR_DATA_DIR");
    cmd.env_remove("PLNR_CALENDAR");
    cmd.env_remove("PLNR_ACTOR");
    cmd
}
