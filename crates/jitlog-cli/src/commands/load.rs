//! `jitlog load`: Summarize a saved snapshot.

use std::path::PathBuf;

use anyhow::Context;
use jitlog_engine::{persist, LogStats};

use super::{summary, GlobalArgs};

pub fn execute(globals: &GlobalArgs, snapshot: PathBuf) -> anyhow::Result<()> {
    let mut out = globals.output();
    let index = persist::load(&snapshot)
        .with_context(|| format!("Failed to load snapshot {}", snapshot.display()))?;
    let stats = LogStats::collect(&index);

    out.heading(&snapshot.display().to_string());
    summary::print_index(&mut out, &index, &stats);
    out.flush();
    Ok(())
}
