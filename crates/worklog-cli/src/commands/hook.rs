//! Session hooks print context for an agent that is starting work. A hook must
//! never fail the session, so store errors are logged and swallowed.

use serde_json::json;
use tracing::{debug, warn};
use worklog_core::{HookMode, MemoryType, Table};
use worklog_store::RecallRequest;

use super::HookAction;
use super::context::Context;
use super::reads::print_recall;

pub(super) fn cmd_hook(ctx: &Context, action: HookAction) -> worklog_core::Result<()> {
    match action {
        HookAction::SessionStart { topic, mode } => {
            let mode = mode.unwrap_or_else(|| ctx.config.hooks.hook_mode());
            if let Err(e) = session_start(ctx, &topic, mode) {
                warn!(error = %e, %mode, "session-start hook skipped");
            }
            Ok(())
        }
    }
}

fn session_start(ctx: &Context, topic: &str, mode: HookMode) -> worklog_core::Result<()> {
    debug!(%mode, topic, "session start");
    match mode {
        HookMode::Light => Ok(()),
        HookMode::Remind => {
            let counts = ctx.store()?.table_counts()?;
            let count = |t: Table| {
                counts
                    .iter()
                    .find(|(table, _)| *table == t)
                    .map_or(0, |(_, n)| *n)
            };
            let pending = ctx.queue().pending().map(|p| p.len()).unwrap_or(0);
            let summary = json!({
                "memories": count(Table::Memories),
                "knowledge": count(Table::KnowledgeBase),
                "entries": count(Table::Entries),
                "pending_handoffs": pending,
            });
            ctx.emit(&summary, |_| {
                println!(
                    "Worklog available: {} memories, {} knowledge items, {} log entries. \
                     Use 'worklog recall <topic>' before starting.",
                    count(Table::Memories),
                    count(Table::KnowledgeBase),
                    count(Table::Entries)
                );
                if pending > 0 {
                    println!("{pending} deferred write(s) waiting: run 'worklog handoff process'.");
                }
            })
        }
        HookMode::Full | HookMode::Aggressive => {
            let mut request = RecallRequest::new(topic);
            if mode == HookMode::Aggressive {
                request.limit = 30;
                request.memory_types = MemoryType::ALL.to_vec();
            }
            let recalled = ctx.store()?.recall(&request)?;
            ctx.emit(&recalled, |r| {
                if r.is_empty() {
                    return;
                }
                if topic.is_empty() {
                    println!("Worklog context:");
                } else {
                    println!("Worklog context for '{topic}':");
                }
                print_recall(r);
            })
        }
    }
}
