//! Write commands. Every insert goes through the retrying writer so a busy or
//! unreachable database defers the write instead of losing it.

use console::style;
use tracing::warn;
use worklog_core::WorklogError;
use worklog_handoff::WriteOutcome;
use worklog_store::{
    ConflictPolicy, KnowledgePatch, MemoryPatch, NewEntry, NewErrorPattern, NewKnowledge,
    NewMemory, NewResearch,
};

use super::context::{Context, truncate};
use super::{ErrorAction, KnowledgeAction, LogArgs, MemoryAction, ResearchAction};

fn some_tags(tags: Vec<String>) -> Option<Vec<String>> {
    (!tags.is_empty()).then_some(tags)
}

pub(super) async fn cmd_log(ctx: &Context, args: LogArgs) -> worklog_core::Result<()> {
    if !args.task_type.is_conventional() {
        warn!(task_type = %args.task_type, "unconventional task type");
    }
    let mut entry = NewEntry::new(ctx.agent(args.agent), args.task_type, args.title);
    entry.details = args.details;
    entry.decision_rationale = args.rationale;
    entry.outcome = args.outcome;
    entry.tags = args.tags;
    entry.related_files = args.files;

    let outcome = ctx.writer().log_entry(&entry).await?;
    ctx.report_write("logged entry", &outcome)
}

pub(super) async fn cmd_knowledge(ctx: &Context, action: KnowledgeAction) -> worklog_core::Result<()> {
    match action {
        KnowledgeAction::Add {
            category,
            title,
            content,
            tags,
            protocol,
            source_url,
            system,
            agent,
        } => {
            if !category.is_conventional() {
                warn!(%category, "unconventional knowledge category");
            }
            let mut item = NewKnowledge::new(category, title, content);
            item.tags = tags;
            item.is_protocol = protocol;
            item.source_url = source_url;
            item.system = system;
            item.source_agent = Some(ctx.agent(agent));
            let outcome = ctx.writer().store_knowledge(&item).await?;
            ctx.report_write("stored knowledge", &outcome)
        }
        KnowledgeAction::Show { id } => {
            let item = ctx.store()?.get_knowledge(id)?;
            ctx.emit(&item, |k| {
                let protocol = if k.is_protocol { " [protocol]" } else { "" };
                println!("{} {}{protocol}", style(format!("#{}", k.id)).cyan(), style(&k.title).bold());
                println!("  category: {}  version: {}  updated: {}", k.category, k.version, k.updated_at);
                if !k.tags.is_empty() {
                    println!("  tags: {}", k.tags.join(", "));
                }
                if let Some(url) = &k.source_url {
                    println!("  source: {url}");
                }
                println!();
                println!("{}", k.content);
            })
        }
        KnowledgeAction::Update {
            id,
            expected_version,
            title,
            content,
            tags,
            protocol,
            source_url,
        } => {
            let patch = KnowledgePatch {
                title,
                content,
                tags: some_tags(tags),
                is_protocol: protocol,
                source_url,
            };
            if patch.is_empty() {
                return Err(WorklogError::validation("patch", "nothing to update"));
            }
            let outcome = ctx
                .writer()
                .write(
                    &format!("knowledge update: #{id}"),
                    patch.statement(id, expected_version),
                )
                .await?;
            if let WriteOutcome::Applied { rowid: None } = outcome {
                // The guard matched nothing: either the row is gone or it moved on.
                let current = ctx.store()?.get_knowledge(id)?;
                return Err(WorklogError::Conflict(format!(
                    "knowledge #{id} is at version {}, expected {expected_version}",
                    current.version
                )));
            }
            ctx.report_write("updated knowledge", &outcome)
        }
    }
}

pub(super) async fn cmd_memory(ctx: &Context, action: MemoryAction) -> worklog_core::Result<()> {
    match action {
        MemoryAction::Store {
            key,
            content,
            summary,
            memory_type,
            importance,
            tags,
            entities,
            overwrite,
            system,
            agent,
        } => {
            let mut memory = NewMemory::new(key, content);
            memory.summary = summary;
            memory.memory_type = memory_type;
            memory.importance = importance;
            memory.tags = tags;
            memory.entities = entities;
            memory.system = system;
            memory.source_agent = Some(ctx.agent(agent));
            let policy = if overwrite {
                ConflictPolicy::Overwrite
            } else {
                ConflictPolicy::Reject
            };
            let outcome = ctx.writer().upsert_memory(&memory, policy).await?;
            ctx.report_write("stored memory", &outcome)
        }
        MemoryAction::Get { key } => {
            let memory = ctx.store()?.get_memory(&key)?;
            ctx.emit(&memory, |m| {
                println!(
                    "{} {} ({}, {}, importance {})",
                    style(format!("#{}", m.id)).cyan(),
                    style(&m.key).bold(),
                    m.memory_type,
                    m.status,
                    m.importance
                );
                if let Some(summary) = &m.summary {
                    println!("  {summary}");
                }
                if !m.tags.is_empty() {
                    println!("  tags: {}", m.tags.join(", "));
                }
                println!("  version: {}  accessed: {} times", m.version, m.access_count);
                println!();
                println!("{}", m.content);
            })
        }
        MemoryAction::Update {
            key,
            expected_version,
            content,
            summary,
            importance,
            tags,
            status,
            agent,
        } => {
            let patch = MemoryPatch {
                content,
                summary,
                importance,
                tags: some_tags(tags),
                status,
            };
            let agent = ctx.agent(agent);
            let updated = ctx
                .store()?
                .update_memory(&key, &patch, expected_version, Some(&agent))?;
            ctx.emit(&updated, |m| {
                println!(
                    "{} updated memory '{}' (now version {}, {})",
                    style("✓").green().bold(),
                    m.key,
                    m.version,
                    m.status
                )
            })
        }
    }
}

pub(super) async fn cmd_error(ctx: &Context, action: ErrorAction) -> worklog_core::Result<()> {
    match action {
        ErrorAction::Record {
            signature,
            message,
            platform,
            language,
            project,
            root_cause,
            resolution,
            prevention,
            tags,
        } => {
            let pattern = NewErrorPattern {
                error_signature: signature,
                error_message: message,
                platform,
                language,
                project,
                root_cause,
                resolution,
                prevention_tip: prevention,
                tags,
            };
            let outcome = ctx.writer().record_error_pattern(&pattern).await?;
            ctx.report_write("recorded error pattern", &outcome)
        }
        ErrorAction::Match { message, platform } => {
            let matches = ctx.store()?.match_error(&message, platform.as_deref())?;
            ctx.emit(&matches, |matches| {
                if matches.is_empty() {
                    println!("No known pattern matches.");
                    return;
                }
                for p in matches {
                    println!(
                        "{} {} (seen {} times, last {})",
                        style(format!("#{}", p.id)).cyan(),
                        style(&p.error_signature).bold(),
                        p.occurrence_count,
                        p.last_seen
                    );
                    if let Some(cause) = &p.root_cause {
                        println!("  cause:      {}", truncate(cause, 100));
                    }
                    if let Some(fix) = &p.resolution {
                        println!("  resolution: {}", truncate(fix, 100));
                    }
                    if let Some(tip) = &p.prevention_tip {
                        println!("  prevention: {}", truncate(tip, 100));
                    }
                }
            })
        }
    }
}

pub(super) async fn cmd_research(ctx: &Context, action: ResearchAction) -> worklog_core::Result<()> {
    match action {
        ResearchAction::Add {
            title,
            source_type,
            url,
            author,
            summary,
            key_points,
            actionable_items,
            relevance,
            tags,
            agent,
        } => {
            let item = NewResearch {
                source_type,
                source_url: url,
                title,
                author,
                summary,
                key_points,
                actionable_items,
                relevance_score: relevance,
                processed_by: Some(ctx.agent(agent)),
                tags,
                ..Default::default()
            };
            let outcome = ctx.writer().store_research(&item).await?;
            ctx.report_write("stored research", &outcome)
        }
        ResearchAction::Status {
            id,
            status,
            expected_version,
        } => {
            let updated = ctx
                .store()?
                .set_research_status(id, status, expected_version)?;
            ctx.emit(&updated, |r| {
                println!(
                    "{} research #{} is now {} (version {})",
                    style("✓").green().bold(),
                    r.id,
                    r.status,
                    r.version
                )
            })
        }
    }
}
