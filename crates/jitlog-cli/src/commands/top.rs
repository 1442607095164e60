//! `jitlog top`: Ranked lists over a whole log.

use std::path::PathBuf;

use jitlog_engine::{QueryFacade, TopListKind};

use super::GlobalArgs;
use crate::output::Terminal;

pub fn execute(globals: &GlobalArgs, log: PathBuf, list: Option<String>, limit: usize) -> anyhow::Result<()> {
    let mut out = globals.output();
    let kinds = match list {
        Some(name) => vec![name.parse::<TopListKind>()?],
        None => TopListKind::ALL.to_vec(),
    };
    let facade = globals.facade(&log, &mut out)?;
    for (at, kind) in kinds.into_iter().enumerate() {
        if at > 0 {
            out.end_line();
        }
        print_list(&mut out, &facade, kind, limit);
    }
    out.flush();
    Ok(())
}

fn print_list(out: &mut Terminal, facade: &QueryFacade, kind: TopListKind, limit: usize) {
    out.heading(kind.title());
    let entries = facade.top_list(kind, limit);
    if entries.is_empty() {
        out.detail("  none");
        out.end_line();
        return;
    }
    let width = entries.iter().map(|e| e.value.to_string().len()).max().unwrap_or(1);
    for entry in entries {
        out.strong(&format!("  {:>width$}", entry.value, width = width));
        match entry.compile_id {
            Some(id) => out.position(&format!("  #{:<6}", id)),
            None => out.text("  "),
        }
        out.text(&format!(" {}", entry.label));
        out.end_line();
    }
}
