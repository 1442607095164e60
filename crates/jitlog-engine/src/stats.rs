//! Aggregate counts over a frozen index.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::history::FrozenIndex;
use crate::model::{CompileKind, Outcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DelayStats {
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: u64,
    pub samples: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogStats {
    pub methods: usize,
    pub tasks: usize,
    /// Keyed by tier level; tasks without a level are not counted here.
    pub by_level: BTreeMap<u8, usize>,
    pub by_compiler: BTreeMap<String, usize>,
    pub osr: usize,
    pub native_wrappers: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub invalidated: usize,
    pub flagged_tasks: usize,
    pub flagged_histories: usize,
    pub native_bytes: u64,
    pub inlined_bytes: u64,
    pub queue_delay: Option<DelayStats>,
    pub orphan_deopts: usize,
    pub dropped_deopts: u64,
    pub orphan_assemblies: usize,
    pub eliminated_allocations: usize,
    pub elided_locks: usize,
    pub hot_throws: usize,
}

impl LogStats {
    pub fn collect(index: &FrozenIndex) -> LogStats {
        let mut stats = LogStats {
            methods: index.method_count(),
            orphan_deopts: index.orphan_deopts().len(),
            dropped_deopts: index.dropped_deopts(),
            orphan_assemblies: index.orphan_assemblies().len(),
            ..LogStats::default()
        };
        stats.flagged_histories = index.histories().filter(|h| h.is_flagged()).count();

        let mut delays = Vec::new();
        for task in index.tasks() {
            stats.tasks += 1;
            if let Some(level) = task.level {
                *stats.by_level.entry(level).or_insert(0) += 1;
            }
            if let Some(compiler) = task.compiler_name() {
                *stats.by_compiler.entry(compiler.to_string()).or_insert(0) += 1;
            }
            match task.kind {
                CompileKind::Osr { .. } => stats.osr += 1,
                CompileKind::NativeWrapper => stats.native_wrappers += 1,
                CompileKind::Standard => {}
            }
            if matches!(task.outcome, Outcome::Failed { .. }) {
                stats.failed += 1;
            }
            if task.is_abandoned() {
                stats.abandoned += 1;
            }
            if task.is_invalidated() {
                stats.invalidated += 1;
            }
            if !task.flags.is_empty() {
                stats.flagged_tasks += 1;
            }
            stats.eliminated_allocations += task.eliminated_allocations.len();
            stats.elided_locks += task.elided_locks.len();
            stats.hot_throws += task.hot_throws.len();
            stats.native_bytes += task.native_size.unwrap_or(0);
            stats.inlined_bytes += task.inlined_bytes.unwrap_or(0);
            if let Some(delay) = task.queue_delay_us() {
                delays.push(delay);
            }
        }

        if let (Some(&min_us), Some(&max_us)) = (delays.iter().min(), delays.iter().max()) {
            let total: u64 = delays.iter().sum();
            stats.queue_delay = Some(DelayStats {
                min_us,
                max_us,
                mean_us: total / delays.len() as u64,
                samples: delays.len() as u64,
            });
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryIndex;
    use crate::model::{CompileTask, HotThrow, MethodIdentity, Stamp, TaskState};

    fn task(id: u64, level: u8, queued_ms: u64, started_ms: u64) -> CompileTask {
        let mut task = CompileTask::new(id, MethodIdentity::new("Foo", "bar", "(I)V"));
        task.level = Some(level);
        task.queued_at = Some(Stamp::from_millis(queued_ms));
        task.started_at = Some(Stamp::from_millis(started_ms));
        task.state = TaskState::Closed;
        task.outcome = Outcome::Succeeded;
        task.native_size = Some(100);
        task
    }

    #[test]
    fn test_collect() {
        let mut index = HistoryIndex::default();
        index.record_task(task(1, 3, 0, 10));
        index.record_task(task(2, 4, 20, 50));
        let mut failed = task(3, 4, 60, 60);
        failed.outcome = Outcome::Failed { reason: None };
        failed.kind = CompileKind::Osr { bci: Some(4) };
        failed.hot_throws.push(HotThrow {
            method: failed.method.clone(),
            bci: Some(3),
            reason: Some("range_check".to_string()),
            preallocated: false,
        });
        index.record_task(failed);

        let stats = LogStats::collect(&index.freeze());
        assert_eq!(stats.methods, 1);
        assert_eq!(stats.tasks, 3);
        assert_eq!(stats.by_level.get(&4), Some(&2));
        assert_eq!(stats.by_compiler.get("c1"), Some(&1));
        assert_eq!(stats.by_compiler.get("c2"), Some(&2));
        assert_eq!(stats.osr, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.native_bytes, 300);
        assert_eq!(stats.hot_throws, 1);
        assert_eq!(stats.elided_locks, 0);
        assert_eq!(
            stats.queue_delay,
            Some(DelayStats { min_us: 0, max_us: 30_000, mean_us: 13_333, samples: 3 })
        );
    }

    #[test]
    fn test_empty_index() {
        let stats = LogStats::collect(&HistoryIndex::default().freeze());
        assert_eq!(stats, LogStats::default());
    }
}
