use crate::support::{init_tracing, load_config_or_exit, to_pretty_json_or_exit};
use iamsim_coherence::{Engine, ReplayReport, read_script_from_path, replay};
use std::path::PathBuf;

/// Exit status when the script ran but at least one step failed.
const STEP_FAILURE_EXIT: i32 = 2;

pub fn run(script: String, config: Option<String>, json_output: bool) {
    let config = load_config_or_exit(config.as_deref());
    init_tracing(&config.logging);

    let path = PathBuf::from(script);
    if !path.exists() {
        eprintln!("error: script not found: {}", path.display());
        std::process::exit(1);
    }

    let ops = read_script_from_path(&path).unwrap_or_else(|e| {
        eprintln!("error: failed to read {}: {e}", path.display());
        std::process::exit(1);
    });

    let engine = Engine::new(config);
    tracing::info!(script = %path.display(), steps = ops.len(), "replaying script");
    let report = replay(&engine, &ops);

    if json_output {
        println!("{}", to_pretty_json_or_exit(&report));
    } else {
        print_text(&path, &report);
    }

    if !report.succeeded() {
        std::process::exit(STEP_FAILURE_EXIT);
    }
}

fn print_text(path: &std::path::Path, report: &ReplayReport) {
    println!("iamsim replay");
    println!("  Script: {}", path.display());
    for step in &report.steps {
        let status = if !step.ok {
            "FAIL"
        } else if step.divergence {
            "DIVERGED"
        } else {
            "ok"
        };
        match (&step.code, &step.message) {
            (Some(code), Some(message)) => {
                println!("  {:>3} {:<16} {status} {code}: {message}", step.step, step.op)
            }
            _ => println!("  {:>3} {:<16} {status}", step.step, step.op),
        }
    }
    println!(
        "  Failed: {}  Divergences: {}",
        report.failed, report.divergences
    );
    println!(
        "  Final: {} nodes, {} edges, {} keys",
        report.nodes, report.edges, report.keys
    );
}
