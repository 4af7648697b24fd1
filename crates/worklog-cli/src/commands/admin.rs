use std::path::Path;
use std::time::Duration;

use clap::CommandFactory;
use clap_complete::{Shell, generate};
use console::style;
use worklog_config::{ConfigLoader, WarningSeverity, WorklogConfig};
use worklog_core::WorklogError;
use worklog_handoff::HandoffQueue;
use worklog_store::{DatabaseOptions, WorklogStore};

use super::{Cli, ConfigAction};

fn config_err(path: &Path, what: &str, e: impl std::fmt::Display) -> WorklogError {
    WorklogError::Config(format!("{what} {}: {e}", path.display()))
}

fn toml_string(s: &str) -> String {
    toml_edit::Value::from(s).to_string().trim().to_string()
}

/// Default `worklog.toml` with the data paths next to the config file.
fn default_config_text(dir: &Path) -> String {
    let db = toml_string(&dir.join("worklog.db").to_string_lossy());
    let handoffs = toml_string(&dir.join("handoffs").to_string_lossy());
    format!(
        r#"# Worklog configuration
# Environment overrides: WORKLOG_DB_PATH, WORKLOG_HANDOFF_DIR, WORKLOG_HOOK_MODE,
# WORKLOG_AGENT, WORKLOG_SYSTEM, WORKLOG_LOG_LEVEL

[database]
path = {db}
journal_mode = "delete"   # never "wal" on a network share
network_share = false
busy_timeout_ms = 1000

[retry]
max_attempts = 3
backoff_min_secs = 5.0
backoff_max_secs = 10.0
# deadline_secs = 30.0

[handoff]
dir = {handoffs}
# origin = "build-box"    # defaults to the hostname
stale_claim_secs = 600
poll_interval_secs = 60

[hooks]
mode = "remind"           # light, remind, full, aggressive
agent = "claude"

[curation]
agent = "curator"
duplicate_threshold = 0.8
orphan_min_importance = 5
promotion_min_importance = 6
promotion_min_age_hours = 24
lease_secs = 900

[logging]
level = "warn"
format = "pretty"         # pretty, compact, json
"#
    )
}

fn database_options(config: &WorklogConfig) -> DatabaseOptions {
    DatabaseOptions {
        journal_mode: config.database.journal_mode.clone(),
        busy_timeout: Duration::from_millis(config.database.busy_timeout_ms),
        network_share: config.database.network_share,
    }
}

pub(super) fn cmd_init(explicit: Option<&Path>, force: bool) -> worklog_core::Result<()> {
    let config_path = ConfigLoader::resolve_path(explicit);
    if config_path.exists() && !force {
        println!(
            "{} {} already exists (use --force to overwrite)",
            style("!").yellow().bold(),
            config_path.display()
        );
        return Ok(());
    }
    let dir = match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&dir)?;
    std::fs::write(&config_path, default_config_text(&dir))?;

    let config = ConfigLoader::apply_env_overrides(ConfigLoader::read_file(&config_path)?);
    std::fs::create_dir_all(&config.handoff.dir)?;
    let store = WorklogStore::open(&config.database.path, &database_options(&config))?;

    println!("{} Created {}", style("✓").green().bold(), config_path.display());
    println!("   database: {} ({} journal)", store.path(), store.journal_mode());
    println!("   handoffs: {}", config.handoff.dir.display());
    Ok(())
}

pub(super) fn cmd_config(
    explicit: Option<&Path>,
    json: bool,
    action: ConfigAction,
) -> worklog_core::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = ConfigLoader::load(explicit)?.get();
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                let text = toml::to_string_pretty(&config)
                    .map_err(|e| WorklogError::Config(format!("cannot render config: {e}")))?;
                print!("{text}");
            }
            Ok(())
        }
        ConfigAction::Set { key, value } => {
            cmd_config_set(&ConfigLoader::resolve_path(explicit), &key, &value)
        }
        ConfigAction::Path => {
            println!("{}", ConfigLoader::resolve_path(explicit).display());
            Ok(())
        }
    }
}

/// Set a dot-notation key, keeping the file's comments and layout. The edited
/// file must still parse and validate before it is written.
fn cmd_config_set(path: &Path, key: &str, value: &str) -> worklog_core::Result<()> {
    if !path.exists() {
        return Err(WorklogError::Config(format!(
            "{} does not exist. Run 'worklog init' first.",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path).map_err(|e| config_err(path, "cannot read", e))?;
    let mut doc = content
        .parse::<toml_edit::DocumentMut>()
        .map_err(|e| config_err(path, "invalid TOML in", e))?;

    let parts: Vec<&str> = key.split('.').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(WorklogError::validation("key", format!("invalid key '{key}'")));
    }
    let (leaf, tables) = match parts.split_last() {
        Some(split) => split,
        None => return Err(WorklogError::validation("key", "must not be empty")),
    };

    let mut item: &mut toml_edit::Item = doc.as_item_mut();
    for part in tables {
        if item.get(part).is_none() {
            item[part] = toml_edit::Item::Table(toml_edit::Table::new());
        }
        item = &mut item[part];
    }

    // bool, integer, float, or string
    let new_value = if value == "true" {
        toml_edit::value(true)
    } else if value == "false" {
        toml_edit::value(false)
    } else if let Ok(i) = value.parse::<i64>() {
        toml_edit::value(i)
    } else if let Ok(f) = value.parse::<f64>() {
        toml_edit::value(f)
    } else {
        toml_edit::value(value)
    };

    let old_value = item.get(leaf).map(|v| v.to_string());
    item[*leaf] = new_value;
    let updated = doc.to_string();

    let config = ConfigLoader::parse(&updated, path)?;
    config.validate().map_err(WorklogError::Config)?;
    std::fs::write(path, updated).map_err(|e| config_err(path, "cannot write", e))?;

    match old_value {
        Some(old) => println!("{} {key} = {value} (was {})", style("✓").green().bold(), old.trim()),
        None => println!("{} {key} = {value} (new)", style("✓").green().bold()),
    }
    Ok(())
}

pub(super) fn cmd_doctor(explicit: Option<&Path>) -> worklog_core::Result<()> {
    println!("{}", style("Worklog doctor").bold());
    println!();

    let config_path = ConfigLoader::resolve_path(explicit);
    let mut errors = 0;
    let mut warnings = 0;

    let config = if config_path.exists() {
        match ConfigLoader::read_file(&config_path) {
            Ok(c) => {
                println!("  {} config: {}", style("✓").green(), config_path.display());
                c
            }
            Err(e) => {
                println!("  {} {e}", style("✗").red());
                return Err(WorklogError::Config("config file could not be parsed".into()));
            }
        }
    } else {
        println!(
            "  {} config: {} not found, using defaults",
            style("!").yellow(),
            config_path.display()
        );
        warnings += 1;
        WorklogConfig::default()
    };
    let config = ConfigLoader::apply_env_overrides(config);

    match config.validate() {
        Ok(found) => {
            for w in &found {
                match w.severity {
                    WarningSeverity::Error => errors += 1,
                    WarningSeverity::Warning => warnings += 1,
                    WarningSeverity::Info => {}
                }
                println!("  {w}");
            }
        }
        Err(e) => {
            errors += e.lines().filter(|l| l.trim_start().starts_with('•')).count().max(1);
            println!("  {e}");
        }
    }

    let options = database_options(&config);
    match WorklogStore::open(&config.database.path, &options) {
        Ok(store) => {
            println!(
                "  {} database: {} ({} journal)",
                style("✓").green(),
                store.path(),
                store.journal_mode()
            );
            if !store.journal_mode().eq_ignore_ascii_case(&options.journal_mode) {
                println!(
                    "  {} journal mode is '{}' but '{}' is configured",
                    style("!").yellow(),
                    store.journal_mode(),
                    options.journal_mode
                );
                warnings += 1;
            }
        }
        Err(e) => {
            println!("  {} database: {e}", style("✗").red());
            errors += 1;
        }
    }

    let queue = HandoffQueue::new(&config.handoff.dir);
    match (queue.pending(), queue.claimed()) {
        (Ok(pending), Ok(claimed)) => {
            println!(
                "  {} handoffs: {} pending, {} claimed in {}",
                style("✓").green(),
                pending.len(),
                claimed.len(),
                config.handoff.dir.display()
            );
            if !pending.is_empty() {
                println!("     run 'worklog handoff process' to apply them");
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            println!("  {} handoffs: {e}", style("✗").red());
            errors += 1;
        }
    }

    println!();
    println!("  {errors} error(s), {warnings} warning(s)");
    if errors > 0 {
        return Err(WorklogError::Config(format!("doctor found {errors} error(s)")));
    }
    Ok(())
}

pub(super) fn cmd_version() -> worklog_core::Result<()> {
    println!("worklog v{}", env!("CARGO_PKG_VERSION"));
    println!("   SQLite: {}", worklog_store::sqlite_version());
    println!("   Target: {}", std::env::consts::ARCH);
    println!("   OS: {}", std::env::consts::OS);
    #[cfg(debug_assertions)]
    println!("   Profile: debug");
    #[cfg(not(debug_assertions))]
    println!("   Profile: release");
    Ok(())
}

pub(super) fn cmd_completions(shell: Shell) -> worklog_core::Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "worklog", &mut std::io::stdout());
    Ok(())
}
