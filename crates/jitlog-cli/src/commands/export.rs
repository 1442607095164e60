//! `jitlog export`: Parse a log and save the result as a snapshot.

use std::path::PathBuf;

use anyhow::Context;
use jitlog_engine::persist;

use super::GlobalArgs;

pub fn execute(globals: &GlobalArgs, log: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let mut out = globals.output();
    let (index, _) = globals.parse(&log, &mut out)?;
    persist::save(&index, &output)
        .with_context(|| format!("Failed to write snapshot {}", output.display()))?;

    out.good("Saved");
    out.text(&format!(
        " {} methods, {} tasks to {}",
        index.method_count(),
        index.task_count(),
        output.display()
    ));
    out.end_line();
    out.flush();
    Ok(())
}
