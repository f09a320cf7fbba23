use serde_json::Value;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    fn new(prefix: &str) -> Self {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "iamsim-cli-{prefix}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&path).expect("temp dir should be created");
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn run_iamsim<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = env!("CARGO_BIN_EXE_iamsim");
    Command::new(bin)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("iamsim command should execute")
}

fn parse_json_stdout(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout should be JSON ({e})\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        )
    })
}

const CLEAN_SCRIPT: &str = r#"{"op":"register","kind":"policy","name":"P1"}
{"op":"register","kind":"user","name":"U1"}
{"op":"attach","from":{"kind":"policy","name":"P1"},"to":{"kind":"user","name":"U1"},"relation":"associated-with","counter":"iam:attachments:P1"}
"#;

#[test]
fn replay_json_reports_final_state() {
    let tmp = TempDirGuard::new("replay-json");
    let script = tmp.path().join("ops.jsonl");
    fs::write(&script, CLEAN_SCRIPT).expect("script should be written");

    let output = run_iamsim([
        OsStr::new("replay"),
        script.as_os_str(),
        OsStr::new("--json"),
    ]);
    assert_eq!(output.status.code(), Some(0));

    let report = parse_json_stdout(&output);
    assert_eq!(report["failed"], 0);
    assert_eq!(report["nodes"], 2);
    assert_eq!(report["edges"], 1);
    assert_eq!(report["steps"][2]["value"], 1);
}

#[test]
fn replay_exits_two_when_a_step_fails() {
    let tmp = TempDirGuard::new("replay-fail");
    let script = tmp.path().join("ops.jsonl");
    let text = format!("{CLEAN_SCRIPT}{{\"op\":\"unregister\",\"kind\":\"policy\",\"name\":\"P1\"}}\n");
    fs::write(&script, text).expect("script should be written");

    let output = run_iamsim([
        OsStr::new("replay"),
        script.as_os_str(),
        OsStr::new("--json"),
    ]);
    assert_eq!(output.status.code(), Some(2));

    let report = parse_json_stdout(&output);
    assert_eq!(report["failed"], 1);
    assert_eq!(report["steps"][3]["code"], "DeleteConflict");
}

#[test]
fn replay_honours_config_relation_overrides() {
    let tmp = TempDirGuard::new("replay-config");
    let script = tmp.path().join("ops.jsonl");
    let config = tmp.path().join("iamsim.toml");
    let text = format!("{CLEAN_SCRIPT}{{\"op\":\"unregister\",\"kind\":\"policy\",\"name\":\"P1\"}}\n");
    fs::write(&script, text).expect("script should be written");
    fs::write(
        &config,
        "[graph.relations]\nassociated-with = { blocking = false }\n\n[logging]\nfilter = \"warn\"\n",
    )
    .expect("config should be written");

    let output = run_iamsim([
        OsStr::new("replay"),
        script.as_os_str(),
        OsStr::new("--config"),
        config.as_os_str(),
        OsStr::new("--json"),
    ]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(parse_json_stdout(&output)["edges"], 0);
}

#[test]
fn replay_rejects_malformed_script() {
    let tmp = TempDirGuard::new("replay-bad");
    let script = tmp.path().join("ops.jsonl");
    fs::write(&script, "{\"op\":\"register\"}\n").expect("script should be written");

    let output = run_iamsim([OsStr::new("replay"), script.as_os_str()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 1"));
}

#[test]
fn config_json_prints_defaults() {
    let output = run_iamsim(["config", "--json"]);
    assert_eq!(output.status.code(), Some(0));

    let config = parse_json_stdout(&output);
    assert_eq!(config["coordinator"]["default_mode"], "lenient");
    assert_eq!(config["store"]["namespace"], "iam");
}

#[test]
fn config_rejects_invalid_values() {
    let tmp = TempDirGuard::new("config-invalid");
    let config = tmp.path().join("iamsim.toml");
    fs::write(&config, "[coordinator]\ndivergence_log_capacity = 0\n")
        .expect("config should be written");

    let output = run_iamsim([
        OsStr::new("config"),
        OsStr::new("--config"),
        config.as_os_str(),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("divergence_log_capacity"));
}

#[test]
fn bundled_demo_replays_with_expected_conflicts() {
    let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos");
    let output = run_iamsim([
        OsStr::new("replay"),
        demos.join("attach_detach.jsonl").as_os_str(),
        OsStr::new("--config"),
        demos.join("iamsim.toml").as_os_str(),
        OsStr::new("--json"),
    ]);
    assert_eq!(output.status.code(), Some(2));

    let report = parse_json_stdout(&output);
    assert_eq!(report["failed"], 2);
    assert_eq!(report["divergences"], 1);
    assert_eq!(report["steps"][3]["code"], "DeleteConflict");
    assert_eq!(report["steps"][6]["code"], "DeleteConflict");
    assert_eq!(report["nodes"], 1);
    assert_eq!(report["edges"], 0);
}
