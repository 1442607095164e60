//! `jitlog report`: Allocations and locks the compiler optimised away.

use std::path::PathBuf;

use jitlog_engine::{JvmsFrame, LockOp};

use super::GlobalArgs;
use crate::output::Terminal;

pub fn execute(globals: &GlobalArgs, log: PathBuf, kind: String) -> anyhow::Result<()> {
    let mut out = globals.output();
    let facade = globals.facade(&log, &mut out)?;

    match kind.as_str() {
        "locks" => {
            out.heading("Elided locks");
            let rows = facade.elided_locks();
            if rows.is_empty() {
                out.detail("  none");
                out.end_line();
            }
            for row in rows {
                out.position(&format!("  #{:<6}", row.compile_id));
                let op = match row.op {
                    Some(LockOp::Lock) => "lock",
                    Some(LockOp::Unlock) => "unlock",
                    None => "?",
                };
                out.strong(&format!(" {:<6}", op));
                out.text(&format!(" {:<14}", row.kind.as_deref().unwrap_or("?")));
                site(&mut out, row.site.as_ref(), &row.compiled.to_string());
                out.end_line();
            }
        }
        _ => {
            out.heading("Eliminated allocations");
            let rows = facade.eliminated_allocations();
            if rows.is_empty() {
                out.detail("  none");
                out.end_line();
            }
            for row in rows {
                out.position(&format!("  #{:<6}", row.compile_id));
                out.strong(&format!(" {}", row.class.as_deref().unwrap_or("?")));
                out.text(" in ");
                site(&mut out, row.site.as_ref(), &row.compiled.to_string());
                out.end_line();
            }
        }
    }
    out.flush();
    Ok(())
}

fn site(out: &mut Terminal, frame: Option<&JvmsFrame>, compiled: &str) {
    match frame {
        Some(frame) => {
            out.text(&frame.method.to_string());
            let bci = frame.bci.map_or_else(|| "?".to_string(), |b| b.to_string());
            out.detail(&format!(" @{}", bci));
            if frame.method.to_string() != compiled {
                out.detail(&format!(" inlined into {}", compiled));
            }
        }
        None => out.text(compiled),
    }
}
