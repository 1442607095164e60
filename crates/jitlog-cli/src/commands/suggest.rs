//! `jitlog suggest`: Inlining suggestions for one task, or grouped by callee.

use std::path::PathBuf;

use anyhow::Context;
use jitlog_engine::{QueryFacade, RemedyCategory};

use super::GlobalArgs;
use crate::output::Terminal;

pub fn execute(globals: &GlobalArgs, log: PathBuf, compile_id: Option<u64>) -> anyhow::Result<()> {
    let mut out = globals.output();
    let facade = globals.facade(&log, &mut out)?;
    match compile_id {
        Some(id) => for_task(&mut out, &facade, id)?,
        None => grouped(&mut out, &facade),
    }
    out.flush();
    Ok(())
}

fn for_task(out: &mut Terminal, facade: &QueryFacade, compile_id: u64) -> anyhow::Result<()> {
    let suggestions = facade
        .suggestions(compile_id)
        .with_context(|| format!("Cannot suggest for task {}", compile_id))?;
    if suggestions.is_empty() {
        out.good("No actionable inlining failures");
        out.end_line();
        return Ok(());
    }
    for s in suggestions {
        out.strong(&s.callee.to_string());
        out.detail(&format!(
            " called from {} @{}",
            s.caller,
            s.bci.map_or_else(|| "?".to_string(), |b| b.to_string())
        ));
        out.end_line();
        out.text(&format!("  {}: ", s.reason));
        out.position(remedy(s.remedy));
        out.end_line();
    }
    Ok(())
}

fn grouped(out: &mut Terminal, facade: &QueryFacade) {
    let groups = facade.inline_failure_groups();
    if groups.is_empty() {
        out.good("No actionable inlining failures");
        out.end_line();
        return;
    }
    for group in groups {
        out.strong(&group.callee.to_string());
        out.detail(&format!(
            "  {} call sites, size {}, invoked {}",
            group.call_sites.len(),
            group.callee_size.map_or_else(|| "?".to_string(), |s| s.to_string()),
            group.invocation_count.map_or_else(|| "?".to_string(), |c| c.to_string()),
        ));
        out.end_line();
        let reasons: Vec<&str> = group.reasons.iter().map(String::as_str).collect();
        out.suspect(&format!("  {}", reasons.join("; ")));
        out.end_line();
        for site in &group.call_sites {
            out.text(&format!(
                "    {} @{}",
                site.caller,
                site.bci.map_or_else(|| "?".to_string(), |b| b.to_string())
            ));
            out.end_line();
        }
    }
}

fn remedy(category: RemedyCategory) -> &'static str {
    match category {
        RemedyCategory::ReduceCalleeSize => "split the callee or make it smaller",
        RemedyCategory::RemoveInlineRestriction => "lift the compiler directive that blocks inlining",
        RemedyCategory::ReduceRecursionDepth => "reduce the recursion or call depth",
    }
}
