//! `jitlog tree`: Inline tree of one compile task.

use std::path::PathBuf;

use anyhow::Context;

use super::GlobalArgs;

pub fn execute(globals: &GlobalArgs, log: PathBuf, compile_id: u64) -> anyhow::Result<()> {
    let mut out = globals.output();
    let facade = globals.facade(&log, &mut out)?;
    let task = facade
        .task(compile_id)
        .with_context(|| format!("Cannot show the inline tree of task {}", compile_id))?;
    let tree = &task.inline_tree;

    out.heading(&format!("#{} {}", task.compile_id, tree.root_method()));
    if tree.is_empty() {
        out.detail("  no call sites");
        out.end_line();
    }
    // Preorder is iterative, so arbitrarily deep trees print fine.
    for node in tree.preorder() {
        out.text(&"  ".repeat(node.depth as usize));
        out.detail(&match node.bci {
            Some(bci) => format!("@{:<4} ", bci),
            None => "@?    ".to_string(),
        });
        out.text(&node.callee.to_string());
        if let Some(size) = node.callee_size {
            out.detail(&format!(" ({} bytes)", size));
        }
        out.text("  ");
        out.decision(node.decision);
        if let Some(ref reason) = node.reason {
            out.text(&format!(": {}", reason));
        }
        out.end_line();
    }
    out.flush();
    Ok(())
}
