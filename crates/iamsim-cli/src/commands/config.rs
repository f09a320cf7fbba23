use crate::support::{load_config_or_exit, to_pretty_json_or_exit};

pub fn run(config: Option<String>, json_output: bool) {
    let source = config.clone().unwrap_or_else(|| "<defaults>".to_string());
    let config = load_config_or_exit(config.as_deref());

    if json_output {
        println!("{}", to_pretty_json_or_exit(&config));
        return;
    }

    println!("iamsim config");
    println!("  Source: {source}");
    println!(
        "  Coordinator: default_mode={} divergence_log_capacity={}",
        config.coordinator.default_mode, config.coordinator.divergence_log_capacity
    );
    println!(
        "  Graph: allow_force_delete={}",
        config.graph.allow_force_delete
    );
    let catalog = config.graph.catalog();
    for (relation, blocking) in catalog.overrides() {
        println!("    {relation}: blocking={blocking}");
    }
    println!("  Store: namespace={}", config.store.namespace);
    println!("  Logging: filter={}", config.logging.filter);
}
