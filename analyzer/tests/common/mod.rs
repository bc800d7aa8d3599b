use assert_cmd::Command;
use assert_cmd::assert::Assert;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

pub struct AnalyzerTestHelper<'a> {
    pub work_dir: TempDir,
    name: &'a str,
    counter: AtomicUsize,
}

impl<'a> AnalyzerTestHelper<'a> {
    pub fn new(name: &'a str) -> Self {
        Self {
            work_dir: TempDir::new().unwrap(),
            name,
            counter: AtomicUsize::new(0),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("analyzer").unwrap();
        cmd.current_dir(self.work_dir.path())
            .env(
                "ANALYZER_RUN_ID",
                format!(
                    "{}-{}",
                    self.name,
                    self.counter.fetch_add(1, Ordering::Relaxed)
                ),
            )
            .env("ANALYZER_OUTPUT_PROGRESS", "plain")
            .env("ANALYZER_DISABLE_DEFAULT_CONFIG", "true")
            .env("ANALYZER_MIN_LOADING_MS", "0")
            .env("NO_COLOR", "1");
        cmd
    }

    pub fn run_command(&self, args: &[&str]) -> Assert {
        self.command().args(args).assert()
    }

    /// Runs `session`, feeding `input` through stdin.
    pub fn session(&self, args: &[&str], input: &str) -> Assert {
        self.command()
            .arg("session")
            .args(args)
            .write_stdin(input.to_string())
            .assert()
    }

    pub fn analyze(&self, text: &str, args: &[&str]) -> Assert {
        self.command().arg("analyze").arg(text).args(args).assert()
    }

    /// Writes `contents` to a file in the work dir and returns its path.
    pub fn write_config(&self, contents: &str) -> String {
        let path = self.work_dir.path().join("analyzer.yaml");
        std::fs::write(&path, contents).unwrap();
        path.display().to_string()
    }

    pub fn clean_work_dir(self) {
        self.work_dir.close().unwrap();
    }
}
