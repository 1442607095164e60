//! `jitlog methods`: Compiled methods with their task counts.

use std::path::PathBuf;

use super::GlobalArgs;

pub fn execute(globals: &GlobalArgs, log: PathBuf, filter: Option<String>) -> anyhow::Result<()> {
    let mut out = globals.output();
    let facade = globals.facade(&log, &mut out)?;

    let mut shown = 0usize;
    for history in facade.index().histories() {
        let method = history.method();
        if let Some(ref needle) = filter {
            if !method.to_string().contains(needle.as_str()) {
                continue;
            }
        }
        shown += 1;
        out.text(&format!("{:>4} ", history.len()));
        match history.current() {
            Some(task) => out.position(&format!("#{:<6}", task.compile_id)),
            None => out.detail(&format!("{:<7}", "-")),
        }
        out.text(&format!(" {}", method));
        if history.is_flagged() {
            out.suspect(" (flagged)");
        }
        out.end_line();
    }

    if shown == 0 {
        out.suspect("No compiled methods");
        out.end_line();
    }
    out.flush();
    Ok(())
}
