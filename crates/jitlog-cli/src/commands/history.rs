//! `jitlog history`: Compilation history of one method.

use std::path::PathBuf;

use jitlog_engine::{CompileKind, CompileTask};

use super::{resolve_method, GlobalArgs};
use crate::output::Terminal;

pub fn execute(globals: &GlobalArgs, log: PathBuf, method: String) -> anyhow::Result<()> {
    let mut out = globals.output();
    let facade = globals.facade(&log, &mut out)?;
    let method = resolve_method(&facade, &method)?;
    let Some(history) = facade.history_of(&method) else {
        anyhow::bail!("No history for {}", method);
    };

    out.heading(&method.to_string());
    let current = history.current().map(|t| t.compile_id);
    for task in history.tasks() {
        let marker = if Some(task.compile_id) == current { "*" } else { " " };
        out.good(marker);
        print_task(&mut out, task);
    }
    for flag in history.flags() {
        out.suspect(&format!("  {:?}", flag));
        out.end_line();
    }
    out.flush();
    Ok(())
}

fn print_task(out: &mut Terminal, task: &CompileTask) {
    out.strong(&format!(" #{:<6}", task.compile_id));
    out.text(&format!(
        " {:<5} tier {:<2}",
        task.compiler_name().unwrap_or("?"),
        task.level.map_or_else(|| "?".to_string(), |l| l.to_string())
    ));
    match task.kind {
        CompileKind::Standard => out.text("      "),
        CompileKind::Osr { bci } => out.position(&format!(
            " osr@{}",
            bci.map_or_else(|| "?".to_string(), |b| b.to_string())
        )),
        CompileKind::NativeWrapper => out.position(" native"),
    }
    match task.timeline_stamp() {
        Some(stamp) => out.detail(&format!(" {:>9}", stamp.to_string())),
        None => out.detail(&format!(" {:>9}", "-")),
    }

    out.text(" ");
    out.task_state(task);
    if let Some(size) = task.native_size {
        out.text(&format!("  {} bytes", size));
    }
    if !task.inline_tree.is_empty() {
        out.text(&format!("  {} inline decisions", task.inline_tree.len()));
    }
    out.end_line();

    for deopt in &task.deopts {
        out.text("           ");
        out.deopt(deopt);
        out.end_line();
    }
    for flag in &task.flags {
        out.suspect(&format!("           {:?}", flag));
        out.end_line();
    }
}
