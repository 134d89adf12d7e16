// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! MSCORE command-line entry point.
//!
//! ## Subcommands
//!
//! - `mscore-cli serve` - Run the model-serving runtime until Ctrl-C (default)
//! - `mscore-cli publish|latest|versions|promote|prune|verify` - Artifact store
//! - `mscore-cli models list|probe` - Inspect model files
//! - `mscore-cli config show|defaults|validate` - Configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use mscore::cli::{config_cmd, models_cmd, store_cmd, EXIT_USAGE};
use mscore::config::{self, EnvConfig};
use mscore::engine::BackendSet;
use mscore::models::scan_models;
use mscore::shutdown::ShutdownResult;
use mscore::telemetry::{init_logging, init_metrics};
use mscore::{Runtime, RuntimeConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    let code = match command {
        "help" | "--help" | "-h" => {
            match args.get(2) {
                Some(subcommand) => print_command_help(subcommand),
                None => print_usage(),
            }
            0
        }
        "version" | "--version" | "-V" => {
            println!("mscore {}", env!("CARGO_PKG_VERSION"));
            0
        }
        "config" => match args.get(2).map(|s| s.as_str()).unwrap_or("show") {
            "show" => config_cmd::run_show(),
            "defaults" => {
                config_cmd::run_defaults();
                0
            }
            "validate" => config_cmd::run_validate(),
            other => {
                eprintln!("Unknown config subcommand: {}", other);
                print_command_help("config");
                EXIT_USAGE
            }
        },
        _ => match load_config() {
            Some(cfg) => run_command(command, &args, cfg).await,
            None => EXIT_USAGE,
        },
    };
    ExitCode::from(code.clamp(0, 255) as u8)
}

async fn run_command(command: &str, args: &[String], cfg: EnvConfig) -> i32 {
    let rest = args.get(2..).unwrap_or(&[]);
    match command {
        "serve" | "" => run_serve(cfg).await,
        "publish" => {
            let (positional, flags) = split_flags(rest);
            let [name, file] = positional.as_slice() else {
                return usage_error("publish");
            };
            let mut store = cfg.store.clone();
            store.compress |= flags.contains_key("--compress");
            let metadata = flags
                .get("--metadata")
                .and_then(|v| v.as_deref())
                .map(Path::new);
            store_cmd::run_publish(&store, name, Path::new(file), metadata)
        }
        "latest" => match rest {
            [name] => store_cmd::run_latest(&cfg.store, name),
            _ => usage_error("latest"),
        },
        "versions" => match rest {
            [name] => store_cmd::run_versions(&cfg.store, name),
            _ => usage_error("versions"),
        },
        "promote" => match rest {
            [name, version] => store_cmd::run_promote(&cfg.store, name, version),
            _ => usage_error("promote"),
        },
        "prune" => match rest {
            [] => store_cmd::run_prune(&cfg.store, cfg.keep_versions),
            [keep] => match keep.parse::<usize>() {
                Ok(keep) => store_cmd::run_prune(&cfg.store, keep),
                Err(_) => usage_error("prune"),
            },
            _ => usage_error("prune"),
        },
        "verify" => {
            let json = rest.iter().any(|a| a == "--json");
            store_cmd::run_verify(&cfg.store, json)
        }
        "models" => match rest {
            [] => models_cmd::run_list(&cfg.models_dir),
            [sub] if sub == "list" => models_cmd::run_list(&cfg.models_dir),
            [sub, path] if sub == "probe" => {
                models_cmd::run_probe(Path::new(path), BackendSet::default()).await
            }
            _ => usage_error("models"),
        },
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            EXIT_USAGE
        }
    }
}

fn load_config() -> Option<EnvConfig> {
    match config::load() {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            None
        }
    }
}

/// Split `--flag [value]` pairs from positional arguments. `--compress` takes no value.
fn split_flags(args: &[String]) -> (Vec<String>, BTreeMap<String, Option<String>>) {
    let mut positional = Vec::new();
    let mut flags = BTreeMap::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--compress" => {
                flags.insert(arg.clone(), None);
            }
            flag if flag.starts_with("--") => {
                flags.insert(arg.clone(), iter.next().cloned());
            }
            _ => positional.push(arg.clone()),
        }
    }
    (positional, flags)
}

fn usage_error(command: &str) -> i32 {
    eprintln!("Invalid arguments for '{}'.", command);
    print_command_help(command);
    EXIT_USAGE
}

async fn run_serve(cfg: EnvConfig) -> i32 {
    if let Err(e) = init_logging(&cfg.log) {
        eprintln!("Logging setup failed: {}", e);
        return EXIT_USAGE;
    }
    init_metrics();

    let runtime = match Runtime::new(RuntimeConfig::from(&cfg), BackendSet::default()) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "runtime startup failed");
            return 1;
        }
    };
    runtime.start();
    preload(&runtime, &cfg.models_dir).await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received, draining");

    match runtime.shutdown(cfg.shutdown_timeout).await {
        ShutdownResult::Complete => 0,
        ShutdownResult::Timeout { remaining } => {
            tracing::warn!(remaining, "shutdown timed out with requests in flight");
            1
        }
    }
}

/// Load the newest file of every model key found under `models_dir`.
async fn preload(runtime: &Runtime, models_dir: &Path) {
    let mut newest: BTreeMap<String, (PathBuf, mscore::models::ModelIdentity)> = BTreeMap::new();
    for (path, identity) in scan_models(models_dir, true) {
        let key = identity.cache_key();
        let replace = newest
            .get(&key)
            .map_or(true, |(_, cur)| identity.version_cmp(cur).is_gt());
        if replace {
            newest.insert(key, (path, identity));
        }
    }
    for (key, (path, _)) in newest {
        match runtime.load_model(&path, None).await {
            Ok(lease) => tracing::info!(
                key = %key,
                path = %lease.metadata().model_path.display(),
                "model preloaded"
            ),
            Err(e) => tracing::warn!(key = %key, error = %e, "model preload failed"),
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "mscore - versioned model serving core v{}

USAGE:
    mscore-cli [COMMAND] [OPTIONS]

COMMANDS:
    serve                         Run the runtime until Ctrl-C (default)
    publish <name> <file>         Publish an artifact to the registry
    latest <name>                 Show the newest published version
    versions <name>               List published versions
    promote <name> <version>      Mark a version Active
    prune [keep]                  Delete all but the newest versions
    verify                        Check registry integrity (exit 1 on issues)
    models [list|probe <file>]    Inspect versioned model files
    config [show|defaults|validate]
    version                       Show version information
    help [command]                Show help

ENVIRONMENT:
    MSCORE_CONFIG        TOML config file
    MSCORE_MODELS_DIR    Models directory (default: models)
    MSCORE_REGISTRY_DIR  Registry directory (default: registry)
    MSCORE_LOG_LEVEL     Log filter (default: info)
    See 'mscore-cli config defaults' for every variable.

EXIT CODES:
    0  Success / Healthy
    1  Failure / Issues found
    2  Usage or configuration error
",
        version
    );
}

fn print_command_help(command: &str) {
    match command {
        "publish" => eprintln!(
            "mscore-cli publish <name> <file> [--compress] [--metadata FILE]

    Copies <file> into registry/<name>/<version>/ with an atomic rename,
    writes its metadata.json sidecar and updates registry_index.json.
    --metadata reads training provenance from a JSON file."
        ),
        "prune" => eprintln!(
            "mscore-cli prune [keep]

    Deletes all but the <keep> newest versions of every model
    (default MSCORE_KEEP_VERSIONS). Active versions are never deleted."
        ),
        "verify" => eprintln!(
            "mscore-cli verify [--json]

    Re-hashes the latest artifact of every model and flags missing,
    corrupted and expired entries. Exits 1 when any issue is found."
        ),
        "models" => eprintln!(
            "mscore-cli models [list | probe <file>]

    list   Versioned model files under MSCORE_MODELS_DIR
    probe  Load one file and run its synthetic health probe"
        ),
        "config" => eprintln!(
            "mscore-cli config <show|defaults|validate>

    show      Effective configuration (file + environment)
    defaults  Built-in defaults
    validate  Warn about inconsistent settings (exit 1 on warnings)"
        ),
        "latest" | "versions" | "promote" | "serve" => print_usage(),
        _ => eprintln!("No detailed help available for '{}'. Use 'mscore-cli help'.", command),
    }
}
