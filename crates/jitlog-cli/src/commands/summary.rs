//! `jitlog summary`: Statistics and anomalies of a log.

use std::path::PathBuf;

use jitlog_engine::{FrozenIndex, LogStats, SessionReport};

use super::GlobalArgs;
use crate::output::Terminal;

pub fn execute(globals: &GlobalArgs, log: PathBuf, json: bool) -> anyhow::Result<()> {
    let mut out = globals.output();
    let (index, report) = globals.parse(&log, &mut out)?;
    let stats = LogStats::collect(&index);

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    out.heading(&log.display().to_string());
    print_index(&mut out, &index, &stats);
    print_report(&mut out, &report);
    out.flush();
    Ok(())
}

pub fn print_index(out: &mut Terminal, index: &FrozenIndex, stats: &LogStats) {
    for header in index.headers() {
        if let Some(ref name) = header.vm_name {
            let release = header.vm_release.as_deref().unwrap_or("?");
            out.field("VM", format!("{} {}", name, release));
        }
        if !header.compiler_threads.is_empty() {
            out.field("Compiler threads", header.compiler_threads.join(", "));
        }
    }

    out.field("Methods", stats.methods);
    out.field("Tasks", stats.tasks);
    for (level, count) in &stats.by_level {
        out.field(&format!("  tier {}", level), count);
    }
    for (compiler, count) in &stats.by_compiler {
        out.field(&format!("  {}", compiler), count);
    }
    out.field("OSR", stats.osr);
    out.field("Native wrappers", stats.native_wrappers);
    out.field("Native bytes", stats.native_bytes);
    out.field("Inlined bytes", stats.inlined_bytes);
    out.field("Eliminated allocations", stats.eliminated_allocations);
    out.field("Elided locks", stats.elided_locks);
    out.field("Hot throws", stats.hot_throws);
    if let Some(delay) = stats.queue_delay {
        out.field(
            "Queue delay",
            format!(
                "min {} us, mean {} us, max {} us ({} tasks)",
                delay.min_us, delay.mean_us, delay.max_us, delay.samples
            ),
        );
    }
    if let Some(sample) = index.code_cache().last() {
        if let Some(free) = sample.free_code_cache {
            out.field("Free code cache", format!("{} bytes", free));
        }
    }

    out.end_line();
    out.heading("Anomalies");
    out.anomaly("Failed tasks", stats.failed as u64);
    out.anomaly("Abandoned tasks", stats.abandoned as u64);
    out.anomaly("Invalidated tasks", stats.invalidated as u64);
    out.anomaly("Flagged tasks", stats.flagged_tasks as u64);
    out.anomaly("Flagged histories", stats.flagged_histories as u64);
    out.anomaly("Orphan deopts", stats.orphan_deopts as u64);
    out.anomaly("Dropped deopts", stats.dropped_deopts);
    out.anomaly("Orphan assembly", stats.orphan_assemblies as u64);
}

fn print_report(out: &mut Terminal, report: &SessionReport) {
    let totals = report.builder_totals();
    out.anomaly("Implicit tasks", totals.implicit_tasks);
    out.anomaly("Duplicate starts", totals.duplicate_starts);
    out.anomaly("Stray events", totals.stray_events);
    out.anomaly("Unknown elements", totals.opaque_events);
    out.anomaly("Unparsed values", totals.unparsed_attributes);
    if report.truncated() {
        out.detail("  ");
        out.suspect("log ended before all elements closed");
        out.end_line();
    }
}
