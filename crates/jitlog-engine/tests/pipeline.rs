//! Integration tests for the log-to-index pipeline.
//!
//! Parses the fixture logs end to end and checks the resulting histories,
//! inline trees, deopt links and correlation maps through the query facade.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use jitlog_engine::{
    parse_source, BciMapping, CompileKind, DeoptKind, EngineConfig, FileSource, FollowSource,
    HistoryFlag, InlineDecision, LockOp, MethodIdentity, Outcome, QueryError, QueryFacade,
    RemedyCategory, Session, Stamp, TaskFlag, TaskState, TopListKind,
};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn foo_bar() -> MethodIdentity {
    MethodIdentity::new("Foo", "bar", "(I)V")
}

fn tiered() -> QueryFacade {
    let source = FileSource::new(fixtures_dir().join("tiered.log"));
    let (index, report) = parse_source(&source, EngineConfig::default()).expect("parse failed");
    assert!(!report.truncated());
    QueryFacade::new(Arc::new(index))
}

// ────────────────────────────────────────────────────────────────────────────
// Histories and current-task selection
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_tier_upgrade_becomes_current() {
    let q = tiered();
    let current = q.current_task_of(&foo_bar()).expect("no current task");
    assert_eq!(current.compile_id, 9);
    assert_eq!(current.level, Some(4));

    let history = q.history_of(&foo_bar()).unwrap();
    let ids: Vec<u64> = history.tasks().iter().map(|t| t.compile_id).collect();
    assert_eq!(ids, vec![5, 9]);
    assert!(!history.is_flagged());

    let superseded = q.task(5).unwrap();
    assert_eq!(superseded.state, TaskState::Closed);
    assert!(superseded.is_invalidated());
    assert_eq!(superseded.deopts[0].kind, DeoptKind::MadeNotEntrant);
}

#[test]
fn test_forward_references_merge_into_tasks() {
    let q = tiered();
    let task = q.task(9).unwrap();
    assert!(!task.has_flag(|f| *f == TaskFlag::ImplicitlyOpened));
    assert_eq!(task.queued_at, Some(Stamp::from_millis(250)));
    assert_eq!(task.started_at, Some(Stamp::from_millis(255)));
    assert_eq!(task.compiler_thread.as_deref(), Some("C2 CompilerThread0"));
    assert_eq!(task.native_size, Some(512));
    assert_eq!(task.outcome, Outcome::Succeeded);

    let native = task.nmethod.as_ref().expect("nmethod missing");
    assert_eq!(native.address, Some(0x7f00_0000_2000));
    assert_eq!(native.base_address, 0x7f00_0000_2040);
    assert!(native.assembly.is_some());
}

#[test]
fn test_runtime_trap_without_invalidation() {
    let q = tiered();
    let task = q.task(9).unwrap();
    assert_eq!(task.deopts.len(), 1);
    let trap = &task.deopts[0];
    assert_eq!(trap.kind, DeoptKind::UncommonTrap);
    assert_eq!(trap.action.as_deref(), Some("maybe_recompile"));
    assert_eq!(trap.bci, Some(20));
    assert_eq!(trap.method, Some(foo_bar()));
    assert!(!task.is_invalidated());

    assert_eq!(task.emitted_traps.len(), 1);
    assert_eq!(task.emitted_traps[0].bci, Some(20));
    assert_eq!(task.emitted_traps[0].action.as_deref(), Some("reinterpret"));
}

#[test]
fn test_native_wrapper_and_orphans() {
    let q = tiered();
    let wrapper = q.task(2).unwrap();
    assert_eq!(wrapper.kind, CompileKind::NativeWrapper);
    assert_eq!(wrapper.method.class_name, "java/lang/System");
    assert_eq!(q.find_methods("arraycopy").len(), 1);

    let orphans = q.index().orphan_deopts();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].compile_id, 77);
}

#[test]
fn test_time_range_and_stats() {
    let q = tiered();
    let early: Vec<u64> = q
        .tasks_in_range(Stamp::from_millis(100), Stamp::from_millis(200))
        .iter()
        .map(|t| t.compile_id)
        .collect();
    assert_eq!(early, vec![5]);

    let stats = q.stats();
    assert_eq!(stats.methods, 2);
    assert_eq!(stats.tasks, 3);
    assert_eq!(stats.native_wrappers, 1);
    assert_eq!(stats.invalidated, 1);
    assert_eq!(stats.orphan_deopts, 1);
    assert_eq!(stats.by_compiler.get("c2"), Some(&2));
    assert_eq!(stats.queue_delay.map(|d| d.samples), Some(2));
}

// ────────────────────────────────────────────────────────────────────────────
// Inline trees and suggestions
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_inline_tree_shape() {
    let q = tiered();
    let tree = q.inline_tree(9).unwrap();
    let callees: Vec<&str> = tree.preorder().map(|n| n.callee.method_name.as_str()).collect();
    assert_eq!(callees, vec!["baz", "huge", "max", "virt"]);
    assert_eq!(tree.top_level().len(), 3);

    let nodes: Vec<_> = tree.preorder().collect();
    assert_eq!(nodes[0].decision, InlineDecision::Inlined);
    assert_eq!(nodes[0].callee, MethodIdentity::new("Foo", "baz", "(I)I"));
    assert_eq!(nodes[1].decision, InlineDecision::NotInlined);
    assert_eq!(nodes[1].parent, Some(nodes[0].id));
    assert_eq!(nodes[1].callee_size, Some(900));
    assert_eq!(nodes[1].bci, Some(2));
    assert_eq!(nodes[2].decision, InlineDecision::Intrinsic);
    assert_eq!(nodes[2].callee, MethodIdentity::new("java/lang/Math", "max", "(II)I"));
    assert_eq!(nodes[3].callee.descriptor, "()V");
}

#[test]
fn test_unknown_tags_do_not_break_tasks() {
    let source = FileSource::new(fixtures_dir().join("tiered.log"));
    let (index, report) = parse_source(&source, EngineConfig::default()).unwrap();
    assert!(report.builder_totals().opaque_events >= 2);
    assert_eq!(report.builder_totals().tasks_abandoned, 0);
    assert!(index.tasks().all(|t| t.state == TaskState::Closed));
}

#[test]
fn test_suggestions_skip_unactionable_failures() {
    let q = tiered();
    let suggestions = q.suggestions(9).unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].callee.method_name, "huge");
    assert_eq!(suggestions[0].caller.method_name, "baz");
    assert_eq!(suggestions[0].remedy, RemedyCategory::ReduceCalleeSize);

    let groups = q.inline_failure_groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].callee_size, Some(900));
    assert_eq!(groups[0].call_sites.len(), 1);
}

// ────────────────────────────────────────────────────────────────────────────
// Optimisation records and top lists
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_optimisation_records_on_task() {
    let q = tiered();
    let task = q.task(9).unwrap();
    assert_eq!(task.hot_throws.len(), 1);
    assert_eq!(task.hot_throws[0].bci, Some(36));
    assert_eq!(task.hot_throws[0].reason.as_deref(), Some("null_check"));

    let allocations = q.eliminated_allocations();
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].class.as_deref(), Some("java/lang/Integer"));
    let site = allocations[0].site.as_ref().unwrap();
    assert_eq!(site.method, MethodIdentity::new("Foo", "baz", "(I)I"));
    assert_eq!(site.bci, Some(2));

    let locks = q.elided_locks();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].op, Some(LockOp::Lock));
    assert_eq!(locks[0].kind.as_deref(), Some("coarsened"));

    let stats = q.stats();
    assert_eq!((stats.eliminated_allocations, stats.elided_locks, stats.hot_throws), (1, 1, 1));
}

#[test]
fn test_top_lists_over_fixture() {
    let q = tiered();
    let native: Vec<Option<u64>> = q
        .top_list(TopListKind::LargestNative, 10)
        .iter()
        .map(|e| e.compile_id)
        .collect();
    assert_eq!(native, vec![Some(9), Some(2), Some(5)]);

    let slowest = q.top_list(TopListKind::SlowestCompiles, 1);
    assert_eq!(slowest[0].compile_id, Some(9));
    assert_eq!(slowest[0].value, 45_000);

    let decompiled = q.top_list(TopListKind::MostDecompiled, 10);
    assert_eq!(decompiled.len(), 1);
    assert_eq!(decompiled[0].method, Some(foo_bar()));

    let intrinsics = q.top_list(TopListKind::Intrinsics, 10);
    assert_eq!(intrinsics[0].label, "java/lang/Math max (II)I -> _max");

    let reasons: Vec<String> = q
        .top_list(TopListKind::InlineFailureReasons, 10)
        .into_iter()
        .map(|e| e.label)
        .collect();
    assert_eq!(reasons, vec!["hot method too big", "no static binding"]);
}

// ────────────────────────────────────────────────────────────────────────────
// Correlation from the printed listing
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_correlation_from_listing() {
    let q = tiered();
    let map = q.correlation(9).unwrap();
    assert_eq!(map.instruction_count(), 14);
    assert_eq!(map.mapping_at(0), Some(BciMapping::Prologue));
    assert_eq!(map.mapping_at(0x10), Some(BciMapping::Prologue));
    assert_eq!(map.mapping_at(0x14), Some(BciMapping::NoMapping));
    assert_eq!(map.mapping_at(0x1c), Some(BciMapping::Bytecode { first: 4, last: 4 }));
    assert_eq!(map.mapping_at(0x24), Some(BciMapping::Bytecode { first: 20, last: 20 }));
    assert_eq!(map.mapping_at(0x4a), Some(BciMapping::Bytecode { first: 20, last: 20 }));
    assert_eq!(map.entry_at(0x1c).unwrap().source_line, Some(11));
    assert_eq!(map.entry_at(0x24).unwrap().source_line, Some(13));
    assert_eq!(map.anomalies().total(), 0);

    let covered: usize = map.entries().iter().map(|e| e.instructions.len()).sum();
    assert_eq!(covered, map.instruction_count());
}

#[test]
fn test_batch_correlation_keeps_order() {
    let q = tiered();
    let results = q.correlations(&[9, 5, 404]);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap(), &q.correlation(9).unwrap());
    assert_eq!(results[1].as_ref().unwrap_err(), &QueryError::NoInstructions(5));
    assert_eq!(results[2].as_ref().unwrap_err(), &QueryError::UnknownTask(404));
}

// ────────────────────────────────────────────────────────────────────────────
// Damaged and skewed logs
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_truncated_log_abandons_open_task() {
    let source = FileSource::new(fixtures_dir().join("truncated.log"));
    let (index, report) = parse_source(&source, EngineConfig::default()).unwrap();
    assert!(report.truncated());

    let task = index.task(3).expect("abandoned task missing");
    assert_eq!(task.state, TaskState::Abandoned);
    assert!(task.has_flag(|f| *f == TaskFlag::Incomplete));
    assert!(index.current_task_of(&foo_bar()).is_none());
}

#[test]
fn test_skewed_ids_are_flagged() {
    let source = FileSource::new(fixtures_dir().join("skewed.log"));
    let (index, _) = parse_source(&source, EngineConfig::default()).unwrap();
    let history = index.history_of(&foo_bar()).unwrap();
    let ids: Vec<u64> = history.tasks().iter().map(|t| t.compile_id).collect();
    assert_eq!(ids, vec![12, 11]);
    assert_eq!(
        history.flags(),
        &[HistoryFlag::OutOfOrderCompileId { earlier: 11, later: 12 }]
    );
    assert_eq!(history.current().map(|t| t.compile_id), Some(11));
}

#[test]
fn test_parsing_is_deterministic() {
    let source = FileSource::new(fixtures_dir().join("tiered.log"));
    let (a, _) = parse_source(&source, EngineConfig::default()).unwrap();
    let (b, _) = parse_source(&source, EngineConfig::default()).unwrap();
    assert_eq!(a, b);
}

// ────────────────────────────────────────────────────────────────────────────
// Sessions: persistence, resume and follow mode
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_snapshot_round_trip() {
    let source = FileSource::new(fixtures_dir().join("tiered.log"));
    let (index, _) = parse_source(&source, EngineConfig::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiered.json");
    jitlog_engine::persist::save(&index, &path).expect("save failed");
    let loaded = jitlog_engine::persist::load(&path).expect("load failed");

    assert_eq!(loaded, index);
    assert_eq!(loaded.current_task_of(&foo_bar()).map(|t| t.compile_id), Some(9));
}

#[test]
fn test_resume_merges_another_run() {
    let source = FileSource::new(fixtures_dir().join("tiered.log"));
    let (index, _) = parse_source(&source, EngineConfig::default()).unwrap();

    let mut session = Session::resume(EngineConfig::default(), index).unwrap();
    session
        .parse(&FileSource::new(fixtures_dir().join("skewed.log")))
        .unwrap();
    let (merged, report) = session.finish();

    assert_eq!(report.passes.len(), 1);
    assert_eq!(merged.history_of(&foo_bar()).unwrap().len(), 4);
    assert_eq!(merged.headers().len(), 2);
    assert_eq!(merged.orphan_deopts().len(), 1);
}

#[test]
fn test_follow_source_sees_appended_tasks() {
    let text = std::fs::read_to_string(fixtures_dir().join("tiered.log")).unwrap();
    let split = text.find("<compilation_log thread='8'>").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.log");
    std::fs::write(&path, &text[..split]).unwrap();

    let source = FollowSource::new(&path, Duration::from_millis(5))
        .with_idle_timeout(Some(Duration::from_secs(10)));
    let finished = source.finished_flag();
    let rest = text[split..].to_string();
    let writer_path = path.clone();
    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&writer_path)
            .unwrap();
        file.write_all(rest.as_bytes()).unwrap();
        file.flush().unwrap();
        finished.store(true, Ordering::Release);
    });

    let (index, report) = parse_source(&source, EngineConfig::default()).unwrap();
    writer.join().unwrap();

    assert!(!report.truncated());
    assert_eq!(index.current_task_of(&foo_bar()).map(|t| t.compile_id), Some(9));
}
