//! Query facade: the read-only surface handed to hosts.
//!
//! Wraps a [`FrozenIndex`] behind an `Arc`, so clones are cheap and can be
//! moved to reader threads freely.

use std::sync::Arc;

use thiserror::Error;

use crate::correlate::{
    correlate, correlate_many, AnchorLineTable, CorrelationMap, Disassembler, DisassemblyError,
    Instruction, SourceLineTable,
};
use crate::history::{FrozenIndex, MethodHistory};
use crate::inline_tree::InlineTree;
use crate::model::{CompileId, CompileTask, MethodIdentity, NativeMethod, Stamp};
use crate::stats::LogStats;
use crate::suggest::{self, InlineFailureGroup, Suggestion};
use crate::toplist::{self, AllocationRow, LockRow, TopEntry, TopListKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("No task with compile id {0}")]
    UnknownTask(CompileId),

    #[error("Task {0} has no emitted code in the log")]
    NoNativeCode(CompileId),

    #[error("Task {0} has neither a disassembled listing nor code bytes")]
    NoInstructions(CompileId),

    #[error(transparent)]
    Disassembly(#[from] DisassemblyError),
}

#[derive(Clone)]
pub struct QueryFacade {
    index: Arc<FrozenIndex>,
    disassembler: Option<Arc<dyn Disassembler>>,
    source_lines: Option<Arc<dyn SourceLineTable + Send + Sync>>,
}

impl std::fmt::Debug for QueryFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFacade")
            .field("methods", &self.index.method_count())
            .field("tasks", &self.index.task_count())
            .field("disassembler", &self.disassembler.is_some())
            .field("source_lines", &self.source_lines.is_some())
            .finish()
    }
}

impl QueryFacade {
    pub fn new(index: Arc<FrozenIndex>) -> Self {
        QueryFacade {
            index,
            disassembler: None,
            source_lines: None,
        }
    }

    /// Used for nmethods whose log carried raw code bytes but no listing.
    pub fn with_disassembler(mut self, disassembler: Arc<dyn Disassembler>) -> Self {
        self.disassembler = Some(disassembler);
        self
    }

    /// Source lines for correlation entries. Without one, line numbers come
    /// from the log's scope comments when present.
    pub fn with_source_lines(mut self, table: Arc<dyn SourceLineTable + Send + Sync>) -> Self {
        self.source_lines = Some(table);
        self
    }

    pub fn index(&self) -> &FrozenIndex {
        &self.index
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn methods(&self) -> impl Iterator<Item = &MethodIdentity> {
        self.index.histories().map(MethodHistory::method)
    }

    /// Identities whose `class method descriptor` text contains `needle`.
    pub fn find_methods(&self, needle: &str) -> Vec<&MethodIdentity> {
        self.methods()
            .filter(|m| m.to_string().contains(needle))
            .collect()
    }

    pub fn history_of(&self, method: &MethodIdentity) -> Option<&MethodHistory> {
        self.index.history_of(method)
    }

    pub fn current_task_of(&self, method: &MethodIdentity) -> Option<&CompileTask> {
        self.index.current_task_of(method)
    }

    pub fn task(&self, compile_id: CompileId) -> Result<&CompileTask, QueryError> {
        self.index
            .task(compile_id)
            .ok_or(QueryError::UnknownTask(compile_id))
    }

    pub fn tasks_in_range(&self, from: Stamp, to: Stamp) -> Vec<&CompileTask> {
        self.index.tasks_in_range(from, to)
    }

    pub fn inline_tree(&self, compile_id: CompileId) -> Result<&InlineTree, QueryError> {
        Ok(&self.task(compile_id)?.inline_tree)
    }

    pub fn suggestions(&self, compile_id: CompileId) -> Result<Vec<Suggestion>, QueryError> {
        Ok(suggest::suggestions_for(self.task(compile_id)?))
    }

    pub fn inline_failure_groups(&self) -> Vec<InlineFailureGroup> {
        suggest::inline_failure_groups(&self.index)
    }

    pub fn stats(&self) -> LogStats {
        LogStats::collect(&self.index)
    }

    pub fn top_list(&self, kind: TopListKind, limit: usize) -> Vec<TopEntry> {
        toplist::top_list(&self.index, kind, limit)
    }

    pub fn eliminated_allocations(&self) -> Vec<AllocationRow> {
        toplist::eliminated_allocations(&self.index)
    }

    pub fn elided_locks(&self) -> Vec<LockRow> {
        toplist::elided_locks(&self.index)
    }

    // -----------------------------------------------------------------------
    // Correlation
    // -----------------------------------------------------------------------

    fn native(&self, compile_id: CompileId) -> Result<(&CompileTask, &NativeMethod), QueryError> {
        let task = self.task(compile_id)?;
        let native = task
            .nmethod
            .as_ref()
            .ok_or(QueryError::NoNativeCode(compile_id))?;
        Ok((task, native))
    }

    /// Instruction boundaries, from the printed listing when there is one.
    pub fn instructions(&self, compile_id: CompileId) -> Result<Vec<Instruction>, QueryError> {
        let (_, native) = self.native(compile_id)?;
        let code_end = (!native.code.is_empty()).then_some(native.code.len() as u64);
        if let Some(assembly) = native.assembly.as_ref().filter(|a| a.disassembled) {
            let listing = assembly.listing(code_end);
            if !listing.is_empty() {
                return Ok(listing);
            }
        }
        if native.code.is_empty() {
            return Err(QueryError::NoInstructions(compile_id));
        }
        let disassembler = self
            .disassembler
            .as_ref()
            .ok_or(DisassemblyError::Unavailable)?;
        Ok(disassembler.disassemble(&native.code, native.base_address)?)
    }

    pub fn correlation(&self, compile_id: CompileId) -> Result<CorrelationMap, QueryError> {
        let instructions = self.instructions(compile_id)?;
        let (task, native) = self.native(compile_id)?;
        let mut map = correlate(&instructions, &native.anchors);
        self.attach_lines(&mut map, task, native);
        Ok(map)
    }

    /// Correlate several tasks in parallel. Results follow the order of `ids`.
    pub fn correlations(&self, ids: &[CompileId]) -> Vec<Result<CorrelationMap, QueryError>> {
        let prepared: Vec<Result<(Vec<Instruction>, &CompileTask, &NativeMethod), QueryError>> = ids
            .iter()
            .map(|&id| {
                let instructions = self.instructions(id)?;
                let (task, native) = self.native(id)?;
                Ok((instructions, task, native))
            })
            .collect();
        let jobs: Vec<(&[Instruction], &[crate::model::DebugAnchor])> = prepared
            .iter()
            .filter_map(|p| p.as_ref().ok())
            .map(|(instructions, _, native)| (instructions.as_slice(), native.anchors.as_slice()))
            .collect();
        let mut maps = correlate_many(&jobs).into_iter();

        prepared
            .into_iter()
            .map(|p| {
                let (_, task, native) = p?;
                let mut map = maps.next().ok_or(QueryError::NoInstructions(task.compile_id))?;
                self.attach_lines(&mut map, task, native);
                Ok(map)
            })
            .collect()
    }

    fn attach_lines(&self, map: &mut CorrelationMap, task: &CompileTask, native: &NativeMethod) {
        match self.source_lines {
            Some(ref table) => map.attach_source_lines(&task.method, table.as_ref()),
            None => {
                let table = AnchorLineTable::new(task.method.clone(), &native.anchors);
                map.attach_source_lines(&task.method, &table);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlate::BciMapping;
    use crate::history::HistoryIndex;
    use crate::model::{DebugAnchor, Outcome, TaskState};

    struct FixedWidth(u64);

    impl Disassembler for FixedWidth {
        fn disassemble(&self, code: &[u8], _base: u64) -> Result<Vec<Instruction>, DisassemblyError> {
            Ok((0..code.len() as u64)
                .step_by(self.0 as usize)
                .map(|o| Instruction::boundary(o, self.0))
                .collect())
        }
    }

    fn facade() -> QueryFacade {
        let mut task = CompileTask::new(9, MethodIdentity::new("Foo", "bar", "(I)V"));
        task.state = TaskState::Closed;
        task.outcome = Outcome::Succeeded;
        task.nmethod = Some(NativeMethod {
            code: vec![0x90; 16],
            base_address: 0x1000,
            anchors: vec![
                DebugAnchor { bci: 0, native_offset: 4, line: Some(10) },
                DebugAnchor { bci: 7, native_offset: 12, line: Some(11) },
            ],
            ..NativeMethod::default()
        });
        let mut bare = CompileTask::new(5, MethodIdentity::new("Foo", "bar", "(I)V"));
        bare.state = TaskState::Closed;
        bare.outcome = Outcome::Succeeded;

        let mut index = HistoryIndex::default();
        index.record_task(task);
        index.record_task(bare);
        QueryFacade::new(Arc::new(index.freeze()))
    }

    #[test]
    fn test_lookup_errors() {
        let q = facade();
        assert_eq!(q.task(77).unwrap_err(), QueryError::UnknownTask(77));
        assert_eq!(q.correlation(5).unwrap_err(), QueryError::NoNativeCode(5));
        assert_eq!(
            q.correlation(9).unwrap_err(),
            QueryError::Disassembly(DisassemblyError::Unavailable)
        );
        assert_eq!(q.find_methods("bar (I)V").len(), 1);
    }

    #[test]
    fn test_top_list_through_facade() {
        let q = facade();
        // Neither task logged sizes, timings or runtime events.
        for kind in TopListKind::ALL {
            assert!(q.top_list(kind, 5).is_empty(), "{}", kind);
        }
        assert!(q.eliminated_allocations().is_empty());
        assert!(q.elided_locks().is_empty());
    }

    #[test]
    fn test_correlation_with_disassembler() {
        let q = facade().with_disassembler(Arc::new(FixedWidth(4)));
        let map = q.correlation(9).unwrap();
        assert_eq!(map.mapping_at(0), Some(BciMapping::Prologue));
        assert_eq!(map.mapping_at(4), Some(BciMapping::Bytecode { first: 0, last: 0 }));
        assert_eq!(map.mapping_at(12), Some(BciMapping::Bytecode { first: 7, last: 7 }));
        assert_eq!(map.entry_at(12).unwrap().source_line, Some(11));
        assert_eq!(map.anomalies().total(), 0);

        let all = q.correlations(&[9, 5, 9]);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].as_ref().unwrap(), &map);
        assert_eq!(all[1].as_ref().unwrap_err(), &QueryError::NoNativeCode(5));
        assert_eq!(all[2].as_ref().unwrap(), &map);
    }

    #[test]
    fn test_facade_is_shareable_across_threads() {
        let q = facade();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = q.clone();
                std::thread::spawn(move || q.current_task_of(&MethodIdentity::new("Foo", "bar", "(I)V")).map(|t| t.compile_id))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), Some(9));
        }
    }
}
