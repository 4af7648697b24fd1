use console::style;
use serde_json::{Map, Value as JsonValue, json};
use worklog_core::Table;
use worklog_store::{Filter, Query, RecallRequest, SortOrder, SqlValue};

use super::context::{Context, truncate};
use super::{QueryArgs, RecallArgs};

pub(super) fn cmd_query(ctx: &Context, args: QueryArgs) -> worklog_core::Result<()> {
    let mut query = Query::new(args.table)
        .columns(args.columns)
        .limit(args.limit)
        .offset(args.offset);
    for (column, value) in args.eq {
        query = query.filter(Filter::Eq(column, SqlValue::from(value)));
    }
    for (column, text) in args.like {
        query = query.filter(Filter::Like(column, text));
    }
    for (column, age) in args.since {
        query = query.filter(Filter::Since(column, age));
    }
    for (column, min) in args.min {
        query = query.filter(Filter::AtLeast(column, min));
    }
    if let Some(column) = args.order_by {
        let order = if args.asc { SortOrder::Asc } else { SortOrder::Desc };
        query = query.order_by(column, order);
    }

    let store = ctx.store()?;
    if args.count {
        let count = store.count(&query)?;
        return ctx.emit(&json!({ "table": args.table, "count": count }), |_| {
            println!("{count}")
        });
    }

    let rows = store.query(&query)?;
    ctx.emit(&rows, |rows| {
        if rows.is_empty() {
            println!("No rows.");
            return;
        }
        for row in rows {
            let line = row
                .iter()
                .map(|(k, v)| format!("{}={}", style(k).dim(), truncate(&display_value(v), 60)))
                .collect::<Vec<_>>()
                .join("  ");
            println!("{line}");
        }
    })
}

fn display_value(v: &JsonValue) -> String {
    match v {
        JsonValue::Null => "-".to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(super) fn cmd_search(
    ctx: &Context,
    term: &str,
    tables: &[Table],
    limit: usize,
) -> worklog_core::Result<()> {
    let hits = ctx.store()?.search(term, tables, limit)?;
    ctx.emit(&hits, |hits| {
        if hits.is_empty() {
            println!("Nothing matches '{term}'.");
            return;
        }
        for hit in hits {
            println!(
                "{} {} {}",
                style(format!("{}#{}", hit.table, hit.id)).cyan(),
                style(&hit.title).bold(),
                style(format!("({:.1})", hit.score)).dim()
            );
            if !hit.snippet.is_empty() {
                println!("    {}", truncate(&hit.snippet, 120));
            }
        }
    })
}

pub(super) fn cmd_recall(ctx: &Context, args: RecallArgs) -> worklog_core::Result<()> {
    let mut request = RecallRequest::new(args.topic);
    if !args.types.is_empty() {
        request.memory_types = args.types;
    }
    request.min_importance = args.min_importance;
    request.limit = args.limit;
    request.include_recent = !args.no_recent;

    let recalled = ctx.store()?.recall(&request)?;
    ctx.emit(&recalled, |r| {
        if r.is_empty() {
            println!("Nothing recalled.");
            return;
        }
        print_recall(r);
    })
}

/// Human rendering shared with the session hook.
pub(super) fn print_recall(r: &worklog_store::RecallContext) {
    if !r.memories.is_empty() {
        println!("{}", style("Memories").bold().underlined());
        for m in &r.memories {
            println!(
                "  [{}] {}: {}",
                m.importance,
                style(&m.key).cyan(),
                truncate(m.summary.as_deref().unwrap_or(&m.content), 100)
            );
        }
    }
    if !r.knowledge.is_empty() {
        println!("{}", style("Knowledge").bold().underlined());
        for k in &r.knowledge {
            let protocol = if k.is_protocol { " [protocol]" } else { "" };
            println!(
                "  #{} {}{protocol}: {}",
                k.id,
                style(&k.title).cyan(),
                truncate(&k.content, 100)
            );
        }
    }
    if !r.recent_work.is_empty() {
        println!("{}", style("Recent work").bold().underlined());
        for e in &r.recent_work {
            println!("  {} {} ({}, {})", e.timestamp, e.title, e.agent, e.task_type);
        }
    }
}

pub(super) fn cmd_recent(
    ctx: &Context,
    agent: Option<&str>,
    days: u32,
    limit: usize,
) -> worklog_core::Result<()> {
    let entries = ctx.store()?.recent_entries(agent, days, limit)?;
    ctx.emit(&entries, |entries| {
        if entries.is_empty() {
            println!("No entries in the last {days} days.");
            return;
        }
        for e in entries {
            println!(
                "{} {} {} {}",
                style(&e.timestamp).dim(),
                style(format!("[{}]", e.task_type)).yellow(),
                style(&e.agent).cyan(),
                e.title
            );
            if let Some(outcome) = &e.outcome {
                println!("    → {}", truncate(outcome, 100));
            }
        }
    })
}

pub(super) fn cmd_tables(ctx: &Context) -> worklog_core::Result<()> {
    let counts = ctx.store()?.table_counts()?;
    let map: Map<String, JsonValue> = counts
        .iter()
        .map(|(table, n)| (table.to_string(), json!(n)))
        .collect();
    ctx.emit(&map, |map| {
        let width = map.keys().map(String::len).max().unwrap_or(0);
        for (table, n) in map {
            println!("  {table:<width$}  {n}");
        }
    })
}
