use aikv_redlock::{logging, AttemptBudget, Config, QuorumLock};
use std::time::Duration;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line arguments structure
struct CliArgs {
    config_path: Option<String>,
    nodes: Vec<String>,
    timeout_ms: Option<i64>,
    hold_ms: Option<u64>,
    force: bool,
    resource: Option<String>,
    show_help: bool,
    show_version: bool,
}

fn print_help() {
    println!(
        "aikv-redlock v{} - Quorum lock over Redis protocol nodes",
        VERSION
    );
    println!();
    println!("USAGE:");
    println!("    aikv-redlock [OPTIONS] <RESOURCE>");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>    Path to configuration file (TOML format)");
    println!("    -n, --node <ADDR>      Lock node HOST:PORT, repeat for each node (at least 3)");
    println!("    -t, --timeout <MS>     Make a single attempt within MS instead of blocking");
    println!("                           (-1 lets every node wait without a deadline)");
    println!("        --hold <MS>        Hold the lock for MS, default: until Ctrl-C");
    println!("        --force            Force-release RESOURCE on every node and exit");
    println!("    -h, --help             Print help information");
    println!("    -v, --version          Print version information");
    println!();
    println!("EXAMPLES:");
    println!("    # Hold 'orders' on three local nodes until Ctrl-C");
    println!("    aikv-redlock -n 127.0.0.1:6379 -n 127.0.0.1:6380 -n 127.0.0.1:6381 orders");
    println!();
    println!("    # One attempt of at most 2 seconds, hold for 10 seconds");
    println!("    aikv-redlock -c redlock.toml --timeout 2000 --hold 10000 orders");
    println!();
    println!("CONFIGURATION FILE:");
    println!("    [lock]");
    println!("    nodes = [\"127.0.0.1:6379\", \"127.0.0.1:6380\", \"127.0.0.1:6381\"]");
    println!("    quorum = \"majority\"   # or \"all\"");
    println!("    lease_ms = 30000");
    println!("    watchdog = true");
    println!("    io_timeout_ms = 1000");
    println!("    poll_interval_ms = 100");
    println!("    attempt_budget_per_node_ms = 1500");
    println!("    clock_drift_factor = 0.0");
    println!();
    println!("    [retry]");
    println!("    base_delay_ms = 50");
    println!("    max_delay_ms = 1000");
    println!("    max_wait_ms = 0         # 0 waits forever");
    println!();
    println!("    [logging]");
    println!("    level = \"info\"        # trace, debug, info, warn, error");
    println!("    format = \"text\"       # or \"json\"");
}

fn print_version() {
    println!("aikv-redlock {}", VERSION);
}

fn value_of(args: &[String], i: usize, what: &str) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires {} argument", args[i], what);
            std::process::exit(1);
        }
    }
}

/// Parse command line arguments
fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        nodes: Vec::new(),
        timeout_ms: None,
        hold_ms: None,
        force: false,
        resource: None,
        show_help: false,
        show_version: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                cli.show_help = true;
                return cli;
            }
            "-v" | "--version" => {
                cli.show_version = true;
                return cli;
            }
            "-c" | "--config" => {
                cli.config_path = Some(value_of(&args, i, "a file path"));
                i += 1;
            }
            "-n" | "--node" => {
                cli.nodes.push(value_of(&args, i, "an address"));
                i += 1;
            }
            "-t" | "--timeout" => {
                let value = value_of(&args, i, "a millisecond");
                match value.parse::<i64>() {
                    Ok(ms) => cli.timeout_ms = Some(ms),
                    Err(_) => {
                        eprintln!("Error: Invalid timeout '{}'", value);
                        std::process::exit(1);
                    }
                }
                i += 1;
            }
            "--hold" => {
                let value = value_of(&args, i, "a millisecond");
                match value.parse::<u64>() {
                    Ok(ms) => cli.hold_ms = Some(ms),
                    Err(_) => {
                        eprintln!("Error: Invalid hold time '{}'", value);
                        std::process::exit(1);
                    }
                }
                i += 1;
            }
            "--force" => cli.force = true,
            arg if arg.starts_with('-') => {
                eprintln!("Error: Unknown option '{}'. Use --help for usage.", arg);
                std::process::exit(1);
            }
            arg => {
                if cli.resource.is_some() {
                    eprintln!(
                        "Error: Unexpected argument '{}'. Use --help for usage.",
                        arg
                    );
                    std::process::exit(1);
                }
                cli.resource = Some(arg.to_string());
            }
        }
        i += 1;
    }

    cli
}

/// Load configuration from file and merge with CLI arguments
fn load_config(cli: &CliArgs) -> Config {
    let mut config = match cli.config_path {
        Some(ref path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config file '{}': {}", path, e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    // CLI nodes replace the configured ones
    if !cli.nodes.is_empty() {
        config.lock.nodes = cli.nodes.clone();
    }

    config
}

async fn hold(hold_ms: Option<u64>) {
    match hold_ms {
        Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        None => {
            info!("Holding lock, press Ctrl-C to release");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = parse_args();

    if cli.show_help {
        print_help();
        return;
    }
    if cli.show_version {
        print_version();
        return;
    }

    let resource = match cli.resource {
        Some(ref resource) => resource.clone(),
        None => {
            eprintln!("Error: missing RESOURCE. Use --help for usage.");
            std::process::exit(1);
        }
    };

    let config = load_config(&cli);
    logging::init(&config.logging);

    let lock = match QuorumLock::from_config(&resource, &config) {
        Ok(lock) => lock,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if cli.force {
        let report = lock.force_unlock().await;
        for (node, e) in &report.failures {
            warn!("Force release on {} failed: {}", node, e);
        }
        std::process::exit(if report.is_clean() { 0 } else { 1 });
    }

    let acquired = match cli.timeout_ms {
        Some(ms) => {
            let outcome = lock.try_acquire(AttemptBudget::from_millis(ms)).await;
            if !outcome.granted {
                warn!(
                    "'{}' not acquired ({}/{} nodes, {} required)",
                    resource,
                    outcome.acquired_count(),
                    lock.nodes().len(),
                    lock.quorum()
                );
            }
            outcome.granted
        }
        None => match lock.lock().await {
            Ok(_) => true,
            Err(e) => {
                warn!("'{}' not acquired: {}", resource, e);
                false
            }
        },
    };

    if !acquired {
        std::process::exit(1);
    }

    info!("Acquired '{}'", resource);
    hold(cli.hold_ms).await;
    lock.unlock().await;
    info!("Released '{}'", resource);
}
