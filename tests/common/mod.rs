#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

/// Isolated `HOME` and resources directory for one CLI run.
pub struct Sandbox {
    pub dir: tempfile::TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create sandbox");
        fs::create_dir_all(dir.path().join("home")).expect("create home");
        fs::create_dir_all(dir.path().join("resources/tools")).expect("create resources");
        fs::create_dir_all(dir.path().join("workspace")).expect("create workspace");
        Self { dir }
    }

    pub fn home(&self) -> PathBuf {
        self.dir.path().join("home")
    }

    pub fn resources(&self) -> PathBuf {
        self.dir.path().join("resources")
    }

    pub fn workspace(&self) -> PathBuf {
        self.dir.path().join("workspace")
    }

    pub fn write_secret(&self, secret: &str) -> PathBuf {
        let path = self.resources().join("private-key.pub");
        fs::write(&path, secret).expect("write secret");
        path
    }

    /// Environment every CLI run in this sandbox gets.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("HOME", path_string(&self.home())),
            ("RESOURCES_PATH", path_string(&self.resources())),
            ("WORKSPACE_HOME", path_string(&self.workspace())),
            ("WST_OUTPUT_FORMAT", "json".to_string()),
        ]
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_wst") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "wst.exe" } else { "wst" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve wst binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, sandbox: &Sandbox, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("wst-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("MAX_CONTAINER_SIZE")
        .env_remove("MAX_WORKSPACE_FOLDER_SIZE")
        .env_remove("SHARED_LINKS_ENABLED")
        .env_remove("SSH_JUMPHOST_TARGET")
        .env_remove("WST_BASE_URL")
        .env_remove("WST_SERVER_ROOT")
        .env_remove("WST_ACTIVITY_LOG")
        .env_remove("WORKSPACE_PORT");
    for (name, value) in sandbox.env() {
        command.env(name, value);
    }
    let output = command.output().expect("execute wst command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
