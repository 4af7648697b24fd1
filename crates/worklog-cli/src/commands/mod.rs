use clap::{ArgGroup, Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use worklog_config::ConfigLoader;
use worklog_core::{
    HookMode, ItemRef, KnowledgeCategory, MemoryStatus, MemoryType, RelationshipType,
    ResearchStatus, RowId, Table, TaskType,
};
use worklog_curation::RelevanceTier;

mod admin;
mod context;
mod curate;
mod handoff;
mod hook;
mod reads;
mod records;

pub use context::LazyStore;
use context::Context;

/// Shared agent worklog: knowledge store, deferred writes, and curation
#[derive(Parser)]
#[command(name = "worklog", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to worklog.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append an entry to the work log
    Log(LogArgs),
    /// Store, show, or update knowledge base items
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },
    /// Store, fetch, or update memories
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Record recurring errors or look up known fixes
    Error {
        #[command(subcommand)]
        action: ErrorAction,
    },
    /// Store processed research sources
    Research {
        #[command(subcommand)]
        action: ResearchAction,
    },
    /// Filtered read of one table
    Query(QueryArgs),
    /// Search across tables (every word must match)
    Search {
        /// Words to search for
        term: String,
        /// Restrict to these tables (default: the core tables)
        #[arg(short, long = "table")]
        tables: Vec<Table>,
        /// Maximum number of hits
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Memories, knowledge and recent work about a topic
    Recall(RecallArgs),
    /// Recent work-log entries
    Recent {
        /// Only entries from this agent
        #[arg(short, long)]
        agent: Option<String>,
        /// How many days back to look
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Maximum number of entries
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Row counts for every table
    Tables,
    /// Inspect and replay deferred writes
    Handoff {
        #[command(subcommand)]
        action: HandoffAction,
    },
    /// Curation passes and candidate review
    Curate(CurateArgs),
    /// Entry points for agent session hooks
    Hook {
        #[command(subcommand)]
        action: HookAction,
    },
    /// Write a default worklog.toml and create the database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Show or edit configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Check configuration, database and handoff directory
    Doctor,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Show version and build info
    Version,
}

#[derive(Args)]
struct LogArgs {
    /// Kind of work (configuration, deployment, debugging, ... or any other text)
    task_type: TaskType,
    /// One-line summary
    title: String,
    /// What was done
    #[arg(short, long)]
    details: Option<String>,
    /// Why it was done this way
    #[arg(long)]
    rationale: Option<String>,
    /// How it turned out
    #[arg(short, long)]
    outcome: Option<String>,
    /// Tags (repeat or comma-separate)
    #[arg(short, long = "tag", value_delimiter = ',')]
    tags: Vec<String>,
    /// Files involved (repeat or comma-separate)
    #[arg(short, long = "file", value_delimiter = ',')]
    files: Vec<String>,
    /// Agent name (default: hooks.agent)
    #[arg(short, long)]
    agent: Option<String>,
}

#[derive(Subcommand)]
enum KnowledgeAction {
    /// Add a knowledge item
    Add {
        category: KnowledgeCategory,
        title: String,
        content: String,
        #[arg(short, long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
        /// Mark as a protocol agents must follow
        #[arg(long)]
        protocol: bool,
        #[arg(long)]
        source_url: Option<String>,
        /// System the item applies to (default: shared)
        #[arg(long)]
        system: Option<String>,
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Show one item
    Show { id: RowId },
    /// Change an item if it is still at the expected version
    Update {
        id: RowId,
        #[arg(long)]
        expected_version: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        /// Replace the tags
        #[arg(short, long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        protocol: Option<bool>,
        #[arg(long)]
        source_url: Option<String>,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Store a memory in staging
    Store {
        key: String,
        content: String,
        #[arg(short, long)]
        summary: Option<String>,
        #[arg(short = 't', long = "type", default_value = "fact")]
        memory_type: MemoryType,
        /// 1 (trivia) to 10 (critical)
        #[arg(short, long, default_value = "5")]
        importance: i64,
        #[arg(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long = "entity", value_delimiter = ',')]
        entities: Vec<String>,
        /// Replace an existing memory with the same key
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        system: Option<String>,
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Fetch a memory by key
    Get { key: String },
    /// Change a memory; a status change must be a legal transition
    Update {
        key: String,
        #[arg(long)]
        expected_version: Option<i64>,
        #[arg(long)]
        content: Option<String>,
        #[arg(short, long)]
        summary: Option<String>,
        #[arg(short, long)]
        importance: Option<i64>,
        /// Replace the tags
        #[arg(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        status: Option<MemoryStatus>,
        #[arg(short, long)]
        agent: Option<String>,
    },
}

#[derive(Subcommand)]
enum ErrorAction {
    /// Record an occurrence of an error and, optionally, its fix
    Record {
        /// Signature matched against future errors (regex or substring)
        signature: String,
        #[arg(short, long)]
        message: Option<String>,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        language: Option<String>,
        /// Project the pattern belongs to (default: all projects)
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        root_cause: Option<String>,
        #[arg(short, long)]
        resolution: Option<String>,
        #[arg(long)]
        prevention: Option<String>,
        #[arg(short, long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Known patterns matching an error message
    Match {
        message: String,
        #[arg(long)]
        platform: Option<String>,
    },
}

#[derive(Subcommand)]
enum ResearchAction {
    /// Store a processed source
    Add {
        title: String,
        #[arg(long, default_value = "article")]
        source_type: String,
        #[arg(short, long)]
        url: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(short, long)]
        summary: Option<String>,
        #[arg(long = "key-point")]
        key_points: Vec<String>,
        #[arg(long = "action-item")]
        actionable_items: Vec<String>,
        /// 1 to 10
        #[arg(short, long)]
        relevance: Option<i64>,
        #[arg(short, long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Move a research item to a new status
    Status {
        id: RowId,
        status: ResearchStatus,
        #[arg(long)]
        expected_version: i64,
    },
}

#[derive(Args)]
struct QueryArgs {
    table: Table,
    /// COLUMN=VALUE exact match (repeatable)
    #[arg(long = "eq", value_parser = parse_key_val)]
    eq: Vec<(String, String)>,
    /// COLUMN=TEXT case-insensitive substring match (repeatable)
    #[arg(long = "like", value_parser = parse_key_val)]
    like: Vec<(String, String)>,
    /// COLUMN=AGE, e.g. timestamp=7d or created_at=12h
    #[arg(long = "since", value_parser = parse_since)]
    since: Vec<(String, chrono::Duration)>,
    /// COLUMN=NUMBER lower bound, inclusive
    #[arg(long = "min", value_parser = parse_min)]
    min: Vec<(String, f64)>,
    /// Columns to select (default: all)
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,
    #[arg(long)]
    order_by: Option<String>,
    /// Sort ascending instead of descending
    #[arg(long)]
    asc: bool,
    #[arg(short = 'n', long, default_value = "20")]
    limit: usize,
    #[arg(long, default_value = "0")]
    offset: usize,
    /// Print only the number of matching rows
    #[arg(long)]
    count: bool,
}

#[derive(Args)]
struct RecallArgs {
    /// Topic to match (empty matches everything)
    #[arg(default_value = "")]
    topic: String,
    /// Memory types to include (default: fact, context)
    #[arg(short = 't', long = "type", value_delimiter = ',')]
    types: Vec<MemoryType>,
    #[arg(short, long, default_value = "5")]
    min_importance: i64,
    #[arg(short = 'n', long, default_value = "15")]
    limit: usize,
    /// Leave out recent work-log entries
    #[arg(long)]
    no_recent: bool,
}

#[derive(Subcommand)]
enum HandoffAction {
    /// List pending and claimed handoff files
    List,
    /// Replay pending handoffs once
    Process,
    /// Replay handoffs as they appear, until interrupted
    Watch {
        /// Seconds between rescans (default: handoff.poll_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Release claims abandoned by crashed processes
    Recover {
        /// Claims older than this many seconds (default: handoff.stale_claim_secs)
        #[arg(long)]
        max_age: Option<u64>,
    },
}

#[derive(Args)]
struct CurateArgs {
    /// Name recorded in history and used to hold leases (default: curation.agent)
    #[arg(short, long, global = true)]
    agent: Option<String>,

    #[command(subcommand)]
    action: CurateAction,
}

#[derive(Subcommand)]
enum CurateAction {
    /// Run every pass: tags, relationships, duplicates, orphans, promotion
    Full,
    /// Rewrite tags to canonical forms and queue unknown tags
    Tags,
    /// Add a canonical tag to the taxonomy
    AddTag {
        tag: String,
        #[arg(long = "alias", value_delimiter = ',')]
        aliases: Vec<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Make ALIAS resolve to CANONICAL
    Alias { canonical: String, alias: String },
    /// Unknown tags waiting for a decision
    PendingTags,
    /// Decide what an unknown tag means
    #[command(group(ArgGroup::new("decision").required(true).args(["alias_of", "add", "ignore"])))]
    ResolveTag {
        tag: String,
        /// Treat the tag as an alias of this canonical tag
        #[arg(long)]
        alias_of: Option<String>,
        /// Add the tag itself as a canonical tag
        #[arg(long)]
        add: bool,
        #[arg(long)]
        category: Option<String>,
        /// Leave the tag as it is
        #[arg(long)]
        ignore: bool,
    },
    /// Queue likely duplicates, then list the pending pairs
    Duplicates {
        /// Minimum similarity (default: curation.duplicate_threshold)
        #[arg(long)]
        threshold: Option<f64>,
        /// Only list pending pairs, do not scan
        #[arg(long)]
        list: bool,
    },
    /// Merge or dismiss a duplicate pair
    #[command(group(ArgGroup::new("decision").required(true).args(["keep", "dismiss"])))]
    ResolveDuplicate {
        id: RowId,
        #[arg(long)]
        expected_version: i64,
        /// Side to keep, as TABLE#ID; the other is marked a duplicate of it
        #[arg(long)]
        keep: Option<ItemRef>,
        #[arg(long)]
        dismiss: bool,
    },
    /// Important rows linked to nothing
    Orphans {
        #[arg(long)]
        min_importance: Option<i64>,
    },
    /// Link, relate, or archive an orphan
    #[command(group(ArgGroup::new("decision").required(true).args(["topic", "relate", "archive", "skip"])))]
    ResolveOrphan {
        /// Orphan as TABLE#ID
        item: ItemRef,
        /// Link to this topic (name or id)
        #[arg(long)]
        topic: Option<String>,
        #[arg(long, default_value = "1.0")]
        relevance: f64,
        /// Relate to this row (TABLE#ID)
        #[arg(long)]
        relate: Option<ItemRef>,
        #[arg(long, default_value = "relates_to")]
        kind: RelationshipType,
        #[arg(long)]
        archive: bool,
        #[arg(long)]
        skip: bool,
    },
    /// List promotion candidates, claim them, or auto-promote important ones
    Promote {
        /// Promote candidates with importance >= 8
        #[arg(long)]
        auto: bool,
        /// Lease the candidates for review by this agent
        #[arg(long, conflicts_with = "auto")]
        claim: bool,
    },
    /// Promote, archive, or skip one staging memory
    #[command(group(ArgGroup::new("decision").required(true).args(["promote", "archive", "skip"])))]
    Decide {
        memory_id: RowId,
        #[arg(long)]
        expected_version: i64,
        #[arg(long)]
        promote: bool,
        /// Importance added on promotion (capped at 10)
        #[arg(long)]
        boost: Option<i64>,
        #[arg(long)]
        archive: bool,
        #[arg(long)]
        skip: bool,
        #[arg(short, long, default_value = "manual review")]
        reason: String,
    },
    /// Link two rows
    Relate {
        source: ItemRef,
        target: ItemRef,
        #[arg(long, default_value = "relates_to")]
        kind: RelationshipType,
        #[arg(long, default_value = "1.0")]
        confidence: f64,
    },
    /// Relationships touching a row
    Related { item: ItemRef },
    /// Manage topics
    Topic {
        #[command(subcommand)]
        action: TopicAction,
    },
    /// Recent curation history
    History {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum TopicAction {
    /// Create a topic
    Create {
        name: String,
        /// Extra terms the topic matches (repeat or comma-separate)
        #[arg(long = "term", value_delimiter = ',')]
        terms: Vec<String>,
    },
    /// List topics
    List,
    /// Unlinked rows that mention the topic, best first
    Candidates {
        /// Topic name or id
        topic: String,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Link a row to a topic
    Link {
        topic: String,
        item: ItemRef,
        #[arg(long, default_value = "1.0")]
        relevance: f64,
    },
    /// Link every candidate at or above a tier, then rebuild the summary
    Index {
        topic: String,
        #[arg(long, default_value = "high")]
        min_tier: RelevanceTier,
    },
    /// Rebuild the summary from the linked rows
    Summary { topic: String },
}

#[derive(Subcommand)]
enum HookAction {
    /// Print context for a new session, scaled by hooks.mode
    SessionStart {
        /// Topic to recall (e.g. the project name)
        #[arg(short, long, default_value = "")]
        topic: String,
        /// Override hooks.mode
        #[arg(short, long)]
        mode: Option<HookMode>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Set a value in worklog.toml (dot-notation key, e.g. retry.max_attempts)
    Set { key: String, value: String },
    /// Print the config file path
    Path,
}

/// Parse "key=value" CLI arguments.
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Parse "column=AGE" where AGE is a number with an optional m/h/d/w suffix
/// (days when bare).
fn parse_since(s: &str) -> std::result::Result<(String, chrono::Duration), String> {
    let (column, age) = parse_key_val(s)?;
    let age = age.trim();
    let (digits, unit) = match age.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&age[..i], c),
        _ => (age, 'd'),
    };
    let n: i64 = digits
        .parse()
        .map_err(|_| format!("invalid age `{age}`, expected e.g. 7d or 12h"))?;
    let duration = match unit {
        'm' => chrono::Duration::minutes(n),
        'h' => chrono::Duration::hours(n),
        'd' => chrono::Duration::days(n),
        'w' => chrono::Duration::weeks(n),
        other => return Err(format!("unknown age unit `{other}` (use m, h, d or w)")),
    };
    Ok((column, duration))
}

fn parse_min(s: &str) -> std::result::Result<(String, f64), String> {
    let (column, value) = parse_key_val(s)?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid number `{value}`"))?;
    Ok((column, value))
}

/// Install the tracing subscriber. Logs go to stderr so stdout stays clean for
/// `--json` and hook output. A second call (tests) keeps the first subscriber.
fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match format {
        "json" => builder.json().with_target(true).try_init(),
        "compact" => builder.compact().with_target(false).try_init(),
        _ => builder.with_target(false).try_init(),
    };
}

impl Cli {
    pub async fn run(self) -> worklog_core::Result<()> {
        // Commands that must work without (or with a broken) config
        match &self.command {
            Commands::Version => return admin::cmd_version(),
            Commands::Completions { shell } => return admin::cmd_completions(*shell),
            Commands::Doctor => {
                init_tracing(self.log_level_or("warn"), "pretty");
                return admin::cmd_doctor(self.config.as_deref());
            }
            Commands::Init { force } => {
                init_tracing(self.log_level_or("info"), "pretty");
                return admin::cmd_init(self.config.as_deref(), *force);
            }
            Commands::Config { action } => {
                init_tracing(self.log_level_or("warn"), "pretty");
                return admin::cmd_config(self.config.as_deref(), self.json, action.clone());
            }
            _ => {}
        }

        let loader = ConfigLoader::load(self.config.as_deref())?;
        let config = loader.get();

        // --verbose > --quiet > --log-level > config; RUST_LOG beats all of them
        let level = self.log_level_or(&config.logging.level).to_string();
        init_tracing(&level, &config.logging.format);

        let ctx = Context::new(config, self.json);
        match self.command {
            Commands::Log(args) => records::cmd_log(&ctx, args).await,
            Commands::Knowledge { action } => records::cmd_knowledge(&ctx, action).await,
            Commands::Memory { action } => records::cmd_memory(&ctx, action).await,
            Commands::Error { action } => records::cmd_error(&ctx, action).await,
            Commands::Research { action } => records::cmd_research(&ctx, action).await,
            Commands::Query(args) => reads::cmd_query(&ctx, args),
            Commands::Search {
                term,
                tables,
                limit,
            } => reads::cmd_search(&ctx, &term, &tables, limit),
            Commands::Recall(args) => reads::cmd_recall(&ctx, args),
            Commands::Recent { agent, days, limit } => {
                reads::cmd_recent(&ctx, agent.as_deref(), days, limit)
            }
            Commands::Tables => reads::cmd_tables(&ctx),
            Commands::Handoff { action } => handoff::cmd_handoff(&ctx, action).await,
            Commands::Curate(args) => curate::cmd_curate(&ctx, args),
            Commands::Hook { action } => hook::cmd_hook(&ctx, action),
            Commands::Version
            | Commands::Completions { .. }
            | Commands::Doctor
            | Commands::Init { .. }
            | Commands::Config { .. } => Ok(()),
        }
    }

    fn log_level_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(fallback)
        }
    }
}
