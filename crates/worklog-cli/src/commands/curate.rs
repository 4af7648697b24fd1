use console::style;
use serde_json::json;
use worklog_core::RowId;
use worklog_curation::{
    Curator, DuplicateCandidate, DuplicateDecision, OrphanDecision, OrphanReport,
    PromotionDecision, TagDecision, Topic,
};
use worklog_store::MemoryRecord;

use super::context::{Context, truncate};
use super::{CurateAction, CurateArgs, TopicAction};

/// A topic given on the command line: an id when it parses as one, else a name.
fn resolve_topic(curator: &Curator, topic: &str) -> worklog_core::Result<Topic> {
    match topic.trim().parse::<RowId>() {
        Ok(id) => curator.topic(id),
        Err(_) => curator.topic_by_name(topic),
    }
}

fn done(ctx: &Context, message: String) -> worklog_core::Result<()> {
    ctx.emit(&json!({ "ok": true, "message": message }), |_| {
        println!("{} {message}", style("✓").green().bold())
    })
}

pub(super) fn cmd_curate(ctx: &Context, args: CurateArgs) -> worklog_core::Result<()> {
    let curator = ctx.curator()?;
    let agent = args
        .agent
        .unwrap_or_else(|| ctx.config.curation.agent.clone());

    match args.action {
        CurateAction::Full => {
            let report = curator.run_full_curation(&agent)?;
            ctx.emit(&report, |r| {
                println!("{}", style("Curation complete").bold());
                println!(
                    "  tags:          {} rows rewritten, {} unknown tags",
                    r.tags.rows_rewritten, r.tags.unknown_tags
                );
                println!("  orphans:       {}", r.orphans.len());
                println!("  relationships: {} new links", r.relationships.related);
                println!(
                    "  duplicates:    {} new candidates ({} already known)",
                    r.duplicates.new_candidates, r.duplicates.already_known
                );
                println!("  promotion:     {} candidates pending review", r.promotion.pending);
            })
        }
        CurateAction::Tags => {
            let stats = curator.run_tag_normalization(&agent)?;
            ctx.emit(&stats, |s| {
                println!(
                    "Scanned {} rows, rewrote {}, {} unknown tag(s) queued ({} canonical tags)",
                    s.rows_scanned, s.rows_rewritten, s.unknown_tags, s.canonical_tags
                )
            })
        }
        CurateAction::AddTag {
            tag,
            aliases,
            category,
        } => {
            let id = curator.add_canonical(&tag, &aliases, category.as_deref(), &agent)?;
            done(ctx, format!("added canonical tag '{tag}' (#{id})"))
        }
        CurateAction::Alias { canonical, alias } => {
            curator.add_alias(&canonical, &alias, &agent)?;
            done(ctx, format!("'{alias}' now resolves to '{canonical}'"))
        }
        CurateAction::PendingTags => {
            let pending = curator.pending_tags()?;
            ctx.emit(&pending, |pending| {
                if pending.is_empty() {
                    println!("No unknown tags pending.");
                }
                for t in pending {
                    println!(
                        "  {} ({} occurrence(s), first seen {})",
                        style(&t.tag).cyan(),
                        t.occurrences,
                        t.first_seen
                    );
                }
            })
        }
        CurateAction::ResolveTag {
            tag,
            alias_of,
            add,
            category,
            ignore: _,
        } => {
            let decision = match alias_of {
                Some(canonical) => TagDecision::AliasTo(canonical),
                None if add => TagDecision::AddCanonical { category },
                None => TagDecision::Ignore,
            };
            curator.resolve_tag(&tag, &decision, &agent)?;
            done(ctx, format!("resolved tag '{tag}'"))
        }
        CurateAction::Duplicates { threshold, list } => {
            if !list {
                let threshold = threshold.unwrap_or(curator.settings().duplicate_threshold);
                let stats = curator.run_duplicate_detection(&agent, threshold)?;
                if !ctx.json {
                    println!(
                        "Compared {} pairs across {} rows: {} new candidate(s)",
                        stats.pairs_compared, stats.items, stats.new_candidates
                    );
                }
            }
            let pending = curator.pending_duplicates()?;
            ctx.emit(&pending, |p| print_duplicates(p))
        }
        CurateAction::ResolveDuplicate {
            id,
            expected_version,
            keep,
            dismiss: _,
        } => {
            let decision = match keep {
                Some(keep) => DuplicateDecision::Merge { keep },
                None => DuplicateDecision::Dismiss,
            };
            let resolved = curator.resolve_duplicate(id, &agent, expected_version, &decision)?;
            ctx.emit(&resolved, |c| {
                println!(
                    "{} duplicate #{} {} ({} / {})",
                    style("✓").green().bold(),
                    c.id,
                    c.status,
                    c.a,
                    c.b
                )
            })
        }
        CurateAction::Orphans { min_importance } => {
            let report = match min_importance {
                Some(min) => curator.find_orphans(min)?,
                None => curator.run_orphan_detection(&agent)?,
            };
            ctx.emit(&report, |r| print_orphans(r))
        }
        CurateAction::ResolveOrphan {
            item,
            topic,
            relevance,
            relate,
            kind,
            archive,
            skip: _,
        } => {
            let decision = if let Some(topic) = topic {
                OrphanDecision::LinkTopic {
                    topic_id: resolve_topic(&curator, &topic)?.id,
                    relevance,
                }
            } else if let Some(target) = relate {
                OrphanDecision::Relate { target, kind }
            } else if archive {
                OrphanDecision::Archive
            } else {
                OrphanDecision::Skip
            };
            curator.resolve_orphan(item, &agent, &decision)?;
            done(ctx, format!("resolved orphan {item}"))
        }
        CurateAction::Promote { auto, claim } => {
            if auto {
                let stats = curator.run_memory_promotion(&agent, true)?;
                return ctx.emit(&stats, |s| {
                    println!(
                        "{} candidate(s): {} promoted, {} pending review",
                        s.candidates, s.promoted, s.pending
                    )
                });
            }
            let candidates = if claim {
                curator.claim_promotion_candidates(&agent, curator.settings().lease_ttl)?
            } else {
                curator.promotion_candidates()?
            };
            ctx.emit(&candidates, |c| print_candidates(c, claim, &agent))
        }
        CurateAction::Decide {
            memory_id,
            expected_version,
            promote,
            boost,
            archive,
            skip: _,
            reason,
        } => {
            let decision = if promote {
                PromotionDecision::Promote {
                    boost: boost.unwrap_or(0),
                }
            } else if archive {
                PromotionDecision::Archive
            } else {
                PromotionDecision::Skip
            };
            let memory =
                curator.decide_promotion(memory_id, &agent, expected_version, &decision, &reason)?;
            ctx.emit(&memory, |m| {
                println!(
                    "{} memory '{}' is {} (importance {}, version {})",
                    style("✓").green().bold(),
                    m.key,
                    m.status,
                    m.importance,
                    m.version
                )
            })
        }
        CurateAction::Relate {
            source,
            target,
            kind,
            confidence,
        } => {
            let id = curator.relate(source, target, kind, confidence, &agent)?;
            done(ctx, format!("{source} {kind} {target} (#{id})"))
        }
        CurateAction::Related { item } => {
            let edges = curator.relationships_for(item)?;
            ctx.emit(&edges, |edges| {
                if edges.is_empty() {
                    println!("{item} has no relationships.");
                }
                for r in edges {
                    println!(
                        "  {} {} {} {}",
                        style(r.source).cyan(),
                        style(r.relationship_type).yellow(),
                        style(r.target).cyan(),
                        style(format!("({:.2})", r.confidence)).dim()
                    );
                }
            })
        }
        CurateAction::Topic { action } => cmd_topic(ctx, &curator, &agent, action),
        CurateAction::History { limit } => {
            let history = curator.history(limit)?;
            ctx.emit(&history, |history| {
                for h in history {
                    let mark = if h.success {
                        style("✓").green()
                    } else {
                        style("✗").red()
                    };
                    println!(
                        "{mark} {} {} by {} ({} ms)",
                        style(&h.created_at).dim(),
                        h.operation,
                        h.agent,
                        h.duration_ms
                    );
                    if let Some(err) = &h.error_message {
                        println!("    {}", truncate(err, 100));
                    }
                }
            })
        }
    }
}

fn cmd_topic(
    ctx: &Context,
    curator: &Curator,
    agent: &str,
    action: TopicAction,
) -> worklog_core::Result<()> {
    match action {
        TopicAction::Create { name, terms } => {
            let topic = curator.create_topic(&name, &terms)?;
            ctx.emit(&topic, |t| {
                println!("{} created topic '{}' (#{})", style("✓").green().bold(), t.name, t.id)
            })
        }
        TopicAction::List => {
            let topics = curator.topics()?;
            ctx.emit(&topics, |topics| {
                if topics.is_empty() {
                    println!("No topics yet.");
                }
                for t in topics {
                    println!(
                        "  {} {} ({} linked)",
                        style(format!("#{}", t.id)).dim(),
                        style(&t.name).cyan(),
                        t.entry_count
                    );
                }
            })
        }
        TopicAction::Candidates { topic, limit } => {
            let topic = resolve_topic(curator, &topic)?;
            let candidates = curator.topic_candidates(topic.id, limit)?;
            ctx.emit(&candidates, |candidates| {
                if candidates.is_empty() {
                    println!("No unlinked rows mention '{}'.", topic.name);
                }
                for c in candidates {
                    println!(
                        "  {:<6} {} {} ({:.2})",
                        c.tier,
                        style(c.item).cyan(),
                        truncate(&c.title, 80),
                        c.score
                    );
                }
            })
        }
        TopicAction::Link {
            topic,
            item,
            relevance,
        } => {
            let topic = resolve_topic(curator, &topic)?;
            curator.link_entry(topic.id, item, relevance, agent)?;
            done(ctx, format!("linked {item} to '{}'", topic.name))
        }
        TopicAction::Index { topic, min_tier } => {
            let topic = resolve_topic(curator, &topic)?;
            let stats = curator.run_topic_indexing(agent, topic.id, min_tier)?;
            ctx.emit(&stats, |s| {
                println!(
                    "Topic '{}': linked {} of {} candidate(s), {} rows in total",
                    s.topic, s.linked, s.candidates, s.entry_count
                )
            })
        }
        TopicAction::Summary { topic } => {
            let topic = resolve_topic(curator, &topic)?;
            let topic = curator.regenerate_summary(topic.id)?;
            ctx.emit(&topic, |t| {
                println!("{}", style(&t.name).bold());
                println!("{}", t.summary.as_deref().unwrap_or("(no linked rows)"));
            })
        }
    }
}

fn print_duplicates(pending: &[DuplicateCandidate]) {
    if pending.is_empty() {
        println!("No duplicate candidates pending.");
    }
    for c in pending {
        println!(
            "  {} {} ~ {} {} v{}",
            style(format!("#{}", c.id)).dim(),
            style(c.a).cyan(),
            style(c.b).cyan(),
            style(format!("({:.2})", c.similarity)).yellow(),
            c.version
        );
        if let Some(reason) = &c.reason {
            println!("    {reason}");
        }
    }
}

fn print_orphans(report: &OrphanReport) {
    if report.is_empty() {
        println!("No orphans.");
        return;
    }
    for o in report.memories.iter().chain(&report.knowledge) {
        let importance = o
            .importance
            .map(|i| format!(" [{i}]"))
            .unwrap_or_default();
        println!("  {}{importance} {}", style(o.item).cyan(), truncate(&o.title, 80));
    }
}

fn print_candidates(candidates: &[MemoryRecord], claimed: bool, agent: &str) {
    if candidates.is_empty() {
        println!("No memories ready for promotion.");
        return;
    }
    if claimed {
        println!("Claimed {} candidate(s) for {agent}:", candidates.len());
    }
    for m in candidates {
        println!(
            "  {} {} [{}] v{} {}",
            style(format!("#{}", m.id)).dim(),
            style(&m.key).cyan(),
            m.importance,
            m.version,
            truncate(m.summary.as_deref().unwrap_or(&m.content), 80)
        );
    }
}
