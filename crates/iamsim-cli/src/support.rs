use iamsim_kernel::{EngineConfig, LogFormat, LoggingConfig};
use std::path::Path;
use tracing_subscriber::EnvFilter;

pub fn load_config_or_exit(path: Option<&str>) -> EngineConfig {
    let Some(path) = path else {
        return EngineConfig::default();
    };
    EngineConfig::load(Path::new(path)).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    })
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.filter`.
/// Events go to stderr so stdout stays machine-readable.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match logging.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = installed {
        eprintln!("warning: tracing subscriber already installed: {e}");
    }
}

pub fn to_pretty_json_or_exit(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("error: failed to serialize output: {e}");
        std::process::exit(1);
    })
}
