use std::path::PathBuf;
use std::time::Duration;

use console::style;
use serde::Serialize;
use tracing::{info, warn};
use worklog_handoff::{HandoffDocument, ProcessReport, WatchOptions};

use super::HandoffAction;
use super::context::{Context, truncate};

#[derive(Serialize)]
struct PendingHandoff {
    path: PathBuf,
    title: Option<String>,
    origin: Option<String>,
    created_at: Option<String>,
    attempts: Option<u32>,
    last_error: Option<String>,
}

impl PendingHandoff {
    fn read(path: PathBuf) -> Self {
        match HandoffDocument::read(&path) {
            Ok(doc) => Self {
                path,
                title: Some(doc.title),
                origin: Some(doc.origin),
                created_at: Some(doc.created_at),
                attempts: Some(doc.attempts),
                last_error: doc.last_error,
            },
            Err(e) => {
                warn!(?path, error = %e, "unreadable handoff");
                Self {
                    path,
                    title: None,
                    origin: None,
                    created_at: None,
                    attempts: None,
                    last_error: Some(e.to_string()),
                }
            }
        }
    }
}

#[derive(Serialize)]
struct HandoffListing {
    dir: PathBuf,
    pending: Vec<PendingHandoff>,
    claimed: Vec<PathBuf>,
}

pub(super) async fn cmd_handoff(ctx: &Context, action: HandoffAction) -> worklog_core::Result<()> {
    let queue = ctx.queue();
    match action {
        HandoffAction::List => {
            let listing = HandoffListing {
                dir: queue.dir().to_path_buf(),
                pending: queue.pending()?.into_iter().map(PendingHandoff::read).collect(),
                claimed: queue.claimed()?,
            };
            ctx.emit(&listing, |l| {
                if l.pending.is_empty() && l.claimed.is_empty() {
                    println!("No handoffs in {}.", l.dir.display());
                    return;
                }
                for h in &l.pending {
                    let name = h
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    println!(
                        "{} {}",
                        style(name).cyan(),
                        h.title.as_deref().unwrap_or("(unreadable)")
                    );
                    if let (Some(origin), Some(created)) = (&h.origin, &h.created_at) {
                        println!(
                            "    from {origin} at {created}, {} attempt(s)",
                            h.attempts.unwrap_or(0)
                        );
                    }
                    if let Some(err) = &h.last_error {
                        println!("    {}", style(truncate(err, 100)).dim());
                    }
                }
                for c in &l.claimed {
                    println!("{} {}", style("claimed").yellow(), c.display());
                }
            })
        }
        HandoffAction::Process => {
            let recovered = queue.recover_stale(Duration::from_secs(ctx.config.handoff.stale_claim_secs))?;
            if recovered > 0 {
                info!(recovered, "released stale claims before processing");
            }
            let report = queue.process(ctx.database().as_ref())?;
            report_process(ctx, &report)
        }
        HandoffAction::Watch { interval } => {
            let options = WatchOptions {
                poll_interval: Duration::from_secs(
                    interval.unwrap_or(ctx.config.handoff.poll_interval_secs).max(1),
                ),
                stale_after: Duration::from_secs(ctx.config.handoff.stale_claim_secs),
            };
            if !ctx.json {
                println!(
                    "Watching {} (rescan every {}s, Ctrl+C to stop)",
                    queue.dir().display(),
                    options.poll_interval.as_secs()
                );
            }
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "could not listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            };
            let report = queue
                .watch(ctx.database().as_ref(), &options, shutdown)
                .await?;
            report_process(ctx, &report)
        }
        HandoffAction::Recover { max_age } => {
            let max_age = Duration::from_secs(max_age.unwrap_or(ctx.config.handoff.stale_claim_secs));
            let released = queue.recover_stale(max_age)?;
            ctx.emit(&serde_json::json!({ "released": released }), |_| {
                println!("Released {released} stale claim(s).")
            })
        }
    }
}

fn report_process(ctx: &Context, report: &ProcessReport) -> worklog_core::Result<()> {
    ctx.emit(report, |r| {
        let mark = if r.failed == 0 {
            style("✓").green().bold()
        } else {
            style("!").red().bold()
        };
        println!(
            "{mark} applied {}, failed {}, skipped {}",
            r.applied, r.failed, r.skipped
        );
        for (path, err) in &r.errors {
            println!("    {}: {}", path.display(), truncate(err, 100));
        }
    })
}
