//! `jitlog correlate`: Map emitted instructions back to bytecode.

use std::path::PathBuf;

use anyhow::Context;

use super::GlobalArgs;

pub fn execute(globals: &GlobalArgs, log: PathBuf, compile_id: u64) -> anyhow::Result<()> {
    let mut out = globals.output();
    let facade = globals.facade(&log, &mut out)?;
    let map = facade
        .correlation(compile_id)
        .with_context(|| format!("Cannot correlate task {}", compile_id))?;

    let task = facade.task(compile_id)?;
    out.heading(&format!(
        "#{} {} ({} instructions)",
        compile_id,
        task.method,
        map.instruction_count()
    ));
    for entry in map.entries() {
        out.text(&format!("[{:#06x}, {:#06x}) ", entry.start, entry.end));
        out.mapping(entry.mapping);
        if let Some(line) = entry.source_line {
            out.detail(&format!(" line {}", line));
        }
        out.end_line();
        for instr in &entry.instructions {
            out.detail(&format!("    {:#06x}  ", instr.offset));
            out.text(&format!("{} {}", instr.mnemonic, instr.operands));
            out.end_line();
        }
    }

    let anomalies = map.anomalies();
    if anomalies.total() > 0 {
        out.suspect(&format!(
            "{} misaligned anchors, {} anchors past end, {} overlapping instructions",
            anomalies.misaligned_anchors, anomalies.anchors_past_end, anomalies.overlapping_instructions
        ));
        out.end_line();
    }
    out.flush();
    Ok(())
}
