//! tasknote watch command implementation.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::cli::Context;
use crate::config::{checked_before, parse_duration};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::watcher::{CycleReport, Watcher};

pub struct WatchArgs {
    pub period: Option<String>,
    pub no_wait: bool,
    pub once: bool,
    pub since: Option<String>,
}

pub async fn run(ctx: &Context, args: WatchArgs) -> Result<()> {
    let mut watcher = Watcher::new(ctx.manager().clone(), ctx.trigger.events().clone())
        .configured(&ctx.config)?;
    if let Some(period) = args.period.as_deref() {
        watcher = watcher.with_period(parse_duration(period)?)?;
    }
    let since = args.since.as_deref().map(parse_duration).transpose()?;

    if args.once {
        // Without --since a single pass covers every task ever updated.
        let end = Utc::now();
        let start = match since {
            Some(since) => checked_before(end, since, "--since")?,
            None => DateTime::<Utc>::MIN_UTC,
        };
        let report = watcher
            .ensure_each_poll(true)
            .poll_window(start, end)
            .await?;
        return emit_report(ctx, &report);
    }

    if args.no_wait {
        watcher = watcher.ensure_each_poll(false);
    }
    if let Some(since) = since {
        watcher = watcher.starting_at(checked_before(Utc::now(), since, "--since")?);
    }

    if !ctx.output.quiet && !ctx.output.json {
        eprintln!(
            "watching {} every {}s (Ctrl-C to stop)",
            ctx.config.store_dir(&ctx.root).display(),
            watcher.period().num_seconds()
        );
    }

    let (handle, cancel) = watcher.spawn();
    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    cancel.cancel();
    handle
        .await
        .map_err(|err| Error::OperationFailed(format!("watcher task failed: {err}")))?
}

fn emit_report(ctx: &Context, report: &CycleReport) -> Result<()> {
    let mut human = HumanOutput::new("Watch pass finished");
    human.field("Observed", report.observed.to_string());
    human.field("Created", report.created.to_string());
    human.field("Updated", report.updated.to_string());
    human.field("Deleted", report.deleted.to_string());
    human.field("Unchanged", report.unchanged.to_string());
    if report.failed > 0 {
        human.warning(format!(
            "{} reconciliation(s) failed; set RUST_LOG=tasknote=warn for details",
            report.failed
        ));
    }

    emit_success(ctx.output, "watch", report, Some(&human))
}
