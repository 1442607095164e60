//! Method history index.
//!
//! Groups compile tasks by [`MethodIdentity`] into timeline-ordered
//! [`MethodHistory`] records and resolves runtime events against them.
//! Events that arrive before their task are held in a bounded pending table
//! keyed by compile id and drained when the task is recorded.
//!
//! Compile ids restart with every VM run, so each parse pass gets its own id
//! namespace: runtime events bind only to tasks recorded in the same pass.
//!
//! The index has two phases. [`HistoryIndex`] is the single writer fed by a
//! parse pass; [`HistoryIndex::freeze`] turns it into a [`FrozenIndex`] that
//! only hands out shared references and can be read from many threads.

use std::collections::{BTreeMap, VecDeque};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::asm::AssemblyMethod;
use crate::builder::{Attachment, Emitted};
use crate::model::{
    CodeCacheSample, CompileId, CompileKind, CompileTask, DeoptEvent, LogHeader, MethodIdentity,
    Stamp, TaskState,
};

pub const DEFAULT_PENDING_CAPACITY: usize = 65_536;

/// Anomalies recorded on a history. The task order is never changed to hide them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryFlag {
    /// `later` has a higher compile id than `earlier` but an earlier timestamp.
    OutOfOrderCompileId { earlier: CompileId, later: CompileId },
    /// Two tasks in the index share a compile id.
    DuplicateCompileId(CompileId),
}

/// All compilations of one method, ordered by (timestamp, compile id).
///
/// Tasks without any timestamp sort before timestamped ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodHistory {
    method: MethodIdentity,
    tasks: Vec<CompileTask>,
    current: Option<usize>,
    flags: Vec<HistoryFlag>,
}

fn order_key(task: &CompileTask) -> (Option<Stamp>, CompileId) {
    (task.timeline_stamp(), task.compile_id)
}

impl MethodHistory {
    pub fn new(method: MethodIdentity) -> Self {
        MethodHistory {
            method,
            tasks: Vec::new(),
            current: None,
            flags: Vec::new(),
        }
    }

    pub fn method(&self) -> &MethodIdentity {
        &self.method
    }

    pub fn tasks(&self) -> &[CompileTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn flags(&self) -> &[HistoryFlag] {
        &self.flags
    }

    pub fn is_flagged(&self) -> bool {
        !self.flags.is_empty()
    }

    pub fn task(&self, compile_id: CompileId) -> Option<&CompileTask> {
        self.tasks.iter().find(|t| t.compile_id == compile_id)
    }

    /// The task `compile_id` names within parse pass `pass`.
    pub fn task_in_pass(&self, compile_id: CompileId, pass: u32) -> Option<&CompileTask> {
        self.tasks
            .iter()
            .find(|t| t.compile_id == compile_id && t.pass == pass)
    }

    fn task_in_pass_mut(&mut self, compile_id: CompileId, pass: u32) -> Option<&mut CompileTask> {
        self.tasks
            .iter_mut()
            .find(|t| t.compile_id == compile_id && t.pass == pass)
    }

    /// The task whose code is believed to be in service.
    pub fn current(&self) -> Option<&CompileTask> {
        self.current.map(|i| &self.tasks[i])
    }

    /// Newest task that reached `Closed`, successful or not.
    pub fn latest_closed(&self) -> Option<&CompileTask> {
        self.tasks.iter().rev().find(|t| t.state == TaskState::Closed)
    }

    fn flag(&mut self, flag: HistoryFlag) {
        if !self.flags.contains(&flag) {
            tracing::warn!(method = %self.method, ?flag, "history anomaly");
            self.flags.push(flag);
        }
    }

    /// Insert `task` at its timeline position and update the current task.
    pub(crate) fn insert(&mut self, task: CompileTask, duplicate: bool) {
        let key = order_key(&task);
        let at = self.tasks.partition_point(|t| order_key(t) <= key);
        let compile_id = task.compile_id;
        let stamp = key.0;
        self.tasks.insert(at, task);
        if let Some(current) = self.current.as_mut() {
            if at <= *current {
                *current += 1;
            }
        }

        if duplicate {
            self.flag(HistoryFlag::DuplicateCompileId(compile_id));
        }
        // Histories are kept sorted by stamp, so an inversion always shows up
        // next to the newly inserted task.
        if stamp.is_some() {
            if let Some(prev) = at.checked_sub(1).map(|i| &self.tasks[i]) {
                if prev.timeline_stamp().is_some() && prev.compile_id > compile_id {
                    let flag = HistoryFlag::OutOfOrderCompileId {
                        earlier: compile_id,
                        later: prev.compile_id,
                    };
                    self.flag(flag);
                }
            }
            if let Some(next) = self.tasks.get(at + 1) {
                if next.compile_id < compile_id {
                    let flag = HistoryFlag::OutOfOrderCompileId {
                        earlier: next.compile_id,
                        later: compile_id,
                    };
                    self.flag(flag);
                }
            }
        }
        self.promote(at);
    }

    /// Make the task at `at` current if it outranks the present choice.
    fn promote(&mut self, at: usize) {
        let task = &self.tasks[at];
        if !is_live(task) {
            return;
        }
        let rank = (task.kind == CompileKind::Standard, at);
        let outranks = match self.current {
            None => true,
            Some(current) => {
                let held = &self.tasks[current];
                rank > (held.kind == CompileKind::Standard, current)
            }
        };
        if outranks {
            self.current = Some(at);
        }
    }

    /// Attach `event` to the task `compile_id` names in `pass`.
    ///
    /// Only invalidating the current task forces a rescan.
    pub(crate) fn bind_deopt(&mut self, compile_id: CompileId, pass: u32, event: DeoptEvent) -> bool {
        let Some(at) = self
            .tasks
            .iter()
            .position(|t| t.compile_id == compile_id && t.pass == pass)
        else {
            return false;
        };
        self.tasks[at].deopts.push(event);
        if self.current == Some(at) && self.tasks[at].is_invalidated() {
            self.refresh_current();
        }
        true
    }

    /// Newest successful, still-valid standard compilation; an OSR or native
    /// wrapper compilation only when no standard one qualifies.
    pub(crate) fn refresh_current(&mut self) {
        self.current = self
            .tasks
            .iter()
            .rposition(|t| is_live(t) && t.kind == CompileKind::Standard)
            .or_else(|| self.tasks.iter().rposition(is_live));
    }
}

fn is_live(task: &CompileTask) -> bool {
    task.succeeded() && !task.is_invalidated()
}

/// Something that arrived before the task it belongs to.
#[derive(Debug, Clone, PartialEq)]
enum Pending {
    Deopt(DeoptEvent),
    Attachment(Attachment),
}

/// Writer side of the index.
#[derive(Debug, Clone)]
pub struct HistoryIndex {
    histories: BTreeMap<MethodIdentity, MethodHistory>,
    /// Owner of each compile id, rebound by every pass that reuses the id.
    by_compile_id: FxHashMap<CompileId, (u32, MethodIdentity)>,
    pass: u32,
    pending: VecDeque<(CompileId, Pending)>,
    pending_counts: FxHashMap<CompileId, usize>,
    pending_capacity: usize,
    dropped_deopts: u64,
    orphan_deopts: Vec<DeoptEvent>,
    orphan_assemblies: Vec<AssemblyMethod>,
    code_cache: Vec<CodeCacheSample>,
    headers: Vec<LogHeader>,
}

impl Default for HistoryIndex {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CAPACITY)
    }
}

impl HistoryIndex {
    pub fn new(pending_capacity: usize) -> Self {
        HistoryIndex {
            histories: BTreeMap::new(),
            by_compile_id: FxHashMap::default(),
            pass: 0,
            pending: VecDeque::new(),
            pending_counts: FxHashMap::default(),
            pending_capacity,
            dropped_deopts: 0,
            orphan_deopts: Vec::new(),
            orphan_assemblies: Vec::new(),
            code_cache: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Route one builder output.
    pub fn record(&mut self, item: Emitted) {
        match item {
            Emitted::Task(task) => self.record_task(task),
            Emitted::Deopt(event) => self.record_deopt(event),
            Emitted::Late {
                compile_id,
                attachment,
            } => self.record_attachment(compile_id, attachment),
            Emitted::OrphanAssembly(assembly) => self.orphan_assemblies.push(assembly),
            Emitted::CodeCache(sample) => self.code_cache.push(sample),
        }
    }

    /// Open a fresh compile-id namespace for the next source.
    pub fn begin_pass(&mut self) -> u32 {
        self.pass += 1;
        self.pass
    }

    pub fn current_pass(&self) -> u32 {
        self.pass
    }

    pub fn record_header(&mut self, header: LogHeader) {
        if header != LogHeader::default() {
            self.headers.push(header);
        }
    }

    pub fn record_task(&mut self, mut task: CompileTask) {
        let compile_id = task.compile_id;
        task.pass = self.pass;
        for pending in self.take_pending(compile_id) {
            match pending {
                Pending::Deopt(event) => task.deopts.push(event),
                Pending::Attachment(attachment) => apply_attachment(&mut task, attachment),
            }
        }
        let owner = self.by_compile_id.get(&compile_id).map(|(pass, _)| *pass);
        let duplicate = owner.is_some();
        // Within one pass the first task keeps the id.
        if owner != Some(self.pass) {
            self.by_compile_id
                .insert(compile_id, (self.pass, task.method.clone()));
        }
        let method = task.method.clone();
        self.histories
            .entry(method.clone())
            .or_insert_with(|| MethodHistory::new(method))
            .insert(task, duplicate);
    }

    /// Attach to the task with the event's compile id, or hold the event
    /// until that task is recorded.
    pub fn record_deopt(&mut self, event: DeoptEvent) {
        let compile_id = event.compile_id;
        let pass = self.pass;
        match self.history_in_pass_mut(compile_id) {
            Some(history) => {
                history.bind_deopt(compile_id, pass, event);
            }
            None => self.push_pending(compile_id, Pending::Deopt(event)),
        }
    }

    pub fn record_attachment(&mut self, compile_id: CompileId, attachment: Attachment) {
        let pass = self.pass;
        let task = self
            .history_in_pass_mut(compile_id)
            .and_then(|h| h.task_in_pass_mut(compile_id, pass));
        match task {
            Some(task) => apply_attachment(task, attachment),
            None => self.push_pending(compile_id, Pending::Attachment(attachment)),
        }
    }

    /// History owning `compile_id` in the running pass. Ids last seen in an
    /// earlier pass belong to another VM run and do not match.
    fn history_in_pass_mut(&mut self, compile_id: CompileId) -> Option<&mut MethodHistory> {
        let (pass, method) = self.by_compile_id.get(&compile_id)?;
        if *pass != self.pass {
            return None;
        }
        self.histories.get_mut(method)
    }

    fn push_pending(&mut self, compile_id: CompileId, pending: Pending) {
        if self.pending_capacity == 0 {
            self.count_dropped(&pending);
            return;
        }
        while self.pending.len() >= self.pending_capacity {
            let Some((old_id, old)) = self.pending.pop_front() else {
                break;
            };
            self.decrement_pending(old_id);
            self.count_dropped(&old);
        }
        *self.pending_counts.entry(compile_id).or_insert(0) += 1;
        self.pending.push_back((compile_id, pending));
    }

    fn count_dropped(&mut self, pending: &Pending) {
        if let Pending::Deopt(_) = pending {
            self.dropped_deopts += 1;
        }
    }

    fn decrement_pending(&mut self, compile_id: CompileId) {
        if let Some(count) = self.pending_counts.get_mut(&compile_id) {
            *count -= 1;
            if *count == 0 {
                self.pending_counts.remove(&compile_id);
            }
        }
    }

    fn take_pending(&mut self, compile_id: CompileId) -> Vec<Pending> {
        if self.pending_counts.remove(&compile_id).is_none() {
            return Vec::new();
        }
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        for (id, pending) in self.pending.drain(..) {
            if id == compile_id {
                taken.push(pending);
            } else {
                kept.push_back((id, pending));
            }
        }
        self.pending = kept;
        taken
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn dropped_deopts(&self) -> u64 {
        self.dropped_deopts
    }

    pub fn history_of(&self, method: &MethodIdentity) -> Option<&MethodHistory> {
        self.histories.get(method)
    }

    pub fn current_task_of(&self, method: &MethodIdentity) -> Option<&CompileTask> {
        self.history_of(method)?.current()
    }

    /// The task `compile_id` names in the newest pass that used the id.
    pub fn task(&self, compile_id: CompileId) -> Option<&CompileTask> {
        let (pass, method) = self.by_compile_id.get(&compile_id)?;
        self.histories.get(method)?.task_in_pass(compile_id, *pass)
    }

    /// End the writing phase. Whatever is still pending becomes an orphan.
    pub fn freeze(mut self) -> FrozenIndex {
        for (_, pending) in std::mem::take(&mut self.pending) {
            match pending {
                Pending::Deopt(event) => self.orphan_deopts.push(event),
                Pending::Attachment(Attachment::Assembly(assembly)) => {
                    self.orphan_assemblies.push(assembly)
                }
                Pending::Attachment(Attachment::NMethod(_)) => {}
            }
        }
        self.pending_counts.clear();
        if self.dropped_deopts > 0 {
            tracing::warn!(
                dropped = self.dropped_deopts,
                capacity = self.pending_capacity,
                "pending deopt buffer overflowed; oldest events were dropped"
            );
        }
        tracing::info!(
            methods = self.histories.len(),
            tasks = self.histories.values().map(MethodHistory::len).sum::<usize>(),
            orphan_deopts = self.orphan_deopts.len(),
            "index frozen"
        );
        FrozenIndex { inner: self }
    }
}

fn apply_attachment(task: &mut CompileTask, attachment: Attachment) {
    match attachment {
        Attachment::NMethod(native) => task.attach_native(native),
        Attachment::Assembly(assembly) => task.attach_assembly(assembly),
    }
}

/// Read-only phase of the index.
#[derive(Debug, Clone)]
pub struct FrozenIndex {
    inner: HistoryIndex,
}

impl FrozenIndex {
    /// Rebuild a frozen index from already-ordered histories.
    pub(crate) fn from_parts(
        histories: Vec<MethodHistory>,
        orphan_deopts: Vec<DeoptEvent>,
        code_cache: Vec<CodeCacheSample>,
        headers: Vec<LogHeader>,
        dropped_deopts: u64,
        orphan_assemblies: Vec<AssemblyMethod>,
    ) -> FrozenIndex {
        let mut inner = HistoryIndex::default();
        for mut history in histories {
            for task in &history.tasks {
                let newer = inner
                    .by_compile_id
                    .get(&task.compile_id)
                    .map_or(true, |(pass, _)| task.pass > *pass);
                if newer {
                    inner
                        .by_compile_id
                        .insert(task.compile_id, (task.pass, history.method.clone()));
                }
                inner.pass = inner.pass.max(task.pass);
            }
            history.refresh_current();
            inner.histories.insert(history.method.clone(), history);
        }
        inner.orphan_deopts = orphan_deopts;
        inner.code_cache = code_cache;
        inner.headers = headers;
        inner.dropped_deopts = dropped_deopts;
        inner.orphan_assemblies = orphan_assemblies;
        FrozenIndex { inner }
    }

    /// Back to the writing phase, e.g. to merge another log source.
    ///
    /// Orphaned deopts re-enter the pending table so the next pass can
    /// resolve them.
    pub fn thaw(self, pending_capacity: usize) -> HistoryIndex {
        let mut index = self.inner;
        index.pending_capacity = pending_capacity;
        for event in std::mem::take(&mut index.orphan_deopts) {
            index.push_pending(event.compile_id, Pending::Deopt(event));
        }
        index
    }

    pub fn history_of(&self, method: &MethodIdentity) -> Option<&MethodHistory> {
        self.inner.history_of(method)
    }

    pub fn current_task_of(&self, method: &MethodIdentity) -> Option<&CompileTask> {
        self.inner.current_task_of(method)
    }

    pub fn task(&self, compile_id: CompileId) -> Option<&CompileTask> {
        self.inner.task(compile_id)
    }

    /// Histories in identity order.
    pub fn histories(&self) -> impl Iterator<Item = &MethodHistory> {
        self.inner.histories.values()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &CompileTask> {
        self.histories().flat_map(|h| h.tasks.iter())
    }

    /// Tasks whose timeline stamp lies in `[from, to]`, ordered by (stamp, compile id).
    pub fn tasks_in_range(&self, from: Stamp, to: Stamp) -> Vec<&CompileTask> {
        let mut tasks: Vec<&CompileTask> = self
            .tasks()
            .filter(|t| t.timeline_stamp().is_some_and(|s| s >= from && s <= to))
            .collect();
        tasks.sort_by_key(|t| order_key(t));
        tasks
    }

    pub fn method_count(&self) -> usize {
        self.inner.histories.len()
    }

    pub fn task_count(&self) -> usize {
        self.inner.histories.values().map(MethodHistory::len).sum()
    }

    pub fn orphan_deopts(&self) -> &[DeoptEvent] {
        &self.inner.orphan_deopts
    }

    pub fn orphan_assemblies(&self) -> &[AssemblyMethod] {
        &self.inner.orphan_assemblies
    }

    pub fn code_cache(&self) -> &[CodeCacheSample] {
        &self.inner.code_cache
    }

    pub fn headers(&self) -> &[LogHeader] {
        &self.inner.headers
    }

    pub fn dropped_deopts(&self) -> u64 {
        self.inner.dropped_deopts
    }
}

impl PartialEq for FrozenIndex {
    fn eq(&self, other: &Self) -> bool {
        let a = &self.inner;
        let b = &other.inner;
        a.histories == b.histories
            && a.orphan_deopts == b.orphan_deopts
            && a.code_cache == b.code_cache
            && a.headers == b.headers
            && a.dropped_deopts == b.dropped_deopts
            && a.orphan_assemblies == b.orphan_assemblies
    }
}
