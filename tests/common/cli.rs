use assert_cmd::Command;
use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

#[derive(Debug)]
pub struct CsyncRun {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
    pub duration: Duration,
    pub log_path: PathBuf,
}

pub struct CsyncWorkspace {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub log_dir: PathBuf,
}

impl CsyncWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path().to_path_buf();
        let log_dir = root.join("logs");
        fs::create_dir_all(&log_dir).expect("log dir");
        fs::create_dir_all(root.join(".contact-sync")).expect("workspace dir");
        Self {
            temp_dir,
            root,
            log_dir,
        }
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join(".contact-sync")
    }

    pub fn write_config(&self, yaml: &str) {
        fs::write(self.workspace_dir().join("config.yaml"), yaml).expect("write config");
    }

    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.root.join(name);
        fs::write(&path, contents).expect("write file");
        path
    }
}

pub fn run_csync<I, S>(workspace: &CsyncWorkspace, args: I, label: &str) -> CsyncRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_csync_with_env(
        workspace,
        args,
        std::iter::empty::<(String, String)>(),
        label,
    )
}

pub fn run_csync_with_env<I, S, E, K, V>(
    workspace: &CsyncWorkspace,
    args: I,
    env_vars: E,
    label: &str,
) -> CsyncRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    E: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("csync"));
    cmd.current_dir(&workspace.root);
    cmd.args(args);
    cmd.env_remove("CSYNC_WORKSPACE");
    cmd.env("CSYNC_PRINCIPAL", "ops@example.org");
    cmd.envs(env_vars);
    cmd.env("NO_COLOR", "1");
    cmd.env("RUST_LOG", "contact_sync=debug");
    cmd.env("RUST_BACKTRACE", "1");
    cmd.env("HOME", &workspace.root);

    let start = Instant::now();
    let output = cmd.output().expect("run csync");
    let duration = start.elapsed();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let log_path = workspace.log_dir.join(format!("{label}.log"));
    let timestamp = SystemTime::now();
    let log_body = format!(
        "label: {label}\nstarted: {:?}\nduration: {:?}\nstatus: {}\nargs: {:?}\ncwd: {}\n\nstdout:\n{}\n\nstderr:\n{}\n",
        timestamp,
        duration,
        output.status,
        cmd.get_args().collect::<Vec<_>>(),
        workspace.root.display(),
        stdout,
        stderr
    );
    fs::write(&log_path, log_body).expect("write log");

    CsyncRun {
        stdout,
        stderr,
        status: output.status,
        duration,
        log_path,
    }
}

pub fn extract_json_payload(stdout: &str) -> String {
    let lines: Vec<&str> = stdout.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            return lines[idx..].join("\n").trim().to_string();
        }
    }
    stdout.trim().to_string()
}

pub fn parse_json(run: &CsyncRun) -> serde_json::Value {
    let payload = extract_json_payload(&run.stdout);
    serde_json::from_str(&payload)
        .unwrap_or_else(|err| panic!("stdout is not JSON ({err}): {}", run.stdout))
}
