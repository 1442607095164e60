//! Compile task builder.
//!
//! Folds the decoded event stream into [`CompileTask`] aggregates. A task
//! moves `Opened -> Accumulating -> Closed`, or ends `Abandoned` when its
//! element closes early or the source ends. Events naming a compile id that
//! has not been seen yet open an implicit task; a later start event for that
//! id merges into it.
//!
//! The builder never holds on to finished work: closed and abandoned tasks,
//! runtime deopts and late attachments are pushed to the caller's output
//! buffer as soon as they are complete.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::asm::{self, AssemblyMethod};
use crate::decoder::{DecodedEvent, LogEvent, NMethodAttrs, TaskAttrs};
use crate::inline_tree::{CallSite, InlineDecision, NodeId};
use crate::model::{
    CodeCacheSample, CompileId, CompileKind, CompileTask, DeoptEvent, DeoptKind, ElidedLock,
    EliminatedAllocation, EmittedTrap, HotThrow, JvmsFrame, LockOp, LogHeader, MethodIdentity,
    NativeMethod, Outcome, PhaseRecord, Stamp, TaskFlag, TaskState,
};
use crate::reader::FragmentKind;
use crate::schema::EventKind;

/// Data for a task that was already handed off when it arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    NMethod(NativeMethod),
    Assembly(AssemblyMethod),
}

/// Output of the builder, in the order it became available.
#[derive(Debug, Clone, PartialEq)]
pub enum Emitted {
    Task(CompileTask),
    Deopt(DeoptEvent),
    Late {
        compile_id: CompileId,
        attachment: Attachment,
    },
    /// Printed assembly with no way to find its task.
    OrphanAssembly(AssemblyMethod),
    CodeCache(CodeCacheSample),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuilderStats {
    pub tasks_closed: u64,
    pub tasks_abandoned: u64,
    pub implicit_tasks: u64,
    pub duplicate_starts: u64,
    /// Task-scoped events seen outside of any task.
    pub stray_events: u64,
    pub opaque_events: u64,
    pub unparsed_attributes: u64,
    pub orphan_assemblies: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct BuilderOptions {
    /// Keep parsed assembly listings on nmethods (code bytes and anchors are always kept).
    pub retain_assembly: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        BuilderOptions {
            retain_assembly: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-task parse state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct DictMethod {
    identity: MethodIdentity,
    bytes: Option<u32>,
}

/// One `<parse>` element: the bytecode of the root method or of an inlinee.
#[derive(Debug, Clone)]
struct ParseScope {
    /// Tree node of the inlined call; `None` for the compiled method itself.
    node: Option<NodeId>,
    method: Option<u64>,
    bci: Option<u32>,
    /// Decision nodes created in this scope, newest last.
    decisions: Vec<(NodeId, Option<u64>)>,
}

/// Optimisation record whose `jvms` children are still arriving.
#[derive(Debug, Clone)]
enum OpenRecord {
    Allocation(EliminatedAllocation),
    Lock(ElidedLock),
}

#[derive(Debug, Clone, Default)]
struct PendingCall {
    method: Option<u64>,
    count: Option<u64>,
}

/// The task whose `<task>` element is currently open.
struct ActiveTask {
    task: CompileTask,
    types: FxHashMap<u64, String>,
    klasses: FxHashMap<u64, String>,
    methods: FxHashMap<u64, DictMethod>,
    scopes: Vec<ParseScope>,
    call: Option<PendingCall>,
    record: Option<OpenRecord>,
    open_phases: Vec<usize>,
    free_code_cache: Option<u64>,
}

impl ActiveTask {
    fn new(task: CompileTask) -> Self {
        ActiveTask {
            task,
            types: FxHashMap::default(),
            klasses: FxHashMap::default(),
            methods: FxHashMap::default(),
            scopes: Vec::new(),
            call: None,
            record: None,
            open_phases: Vec::new(),
            free_code_cache: None,
        }
    }

    fn touch(&mut self) {
        if self.task.state == TaskState::Opened {
            self.task.state = TaskState::Accumulating;
        }
    }

    fn type_descriptor(&self, id: u64) -> String {
        if let Some(name) = self.types.get(&id) {
            let letter = match name.as_str() {
                "void" => "V",
                "boolean" => "Z",
                "byte" => "B",
                "char" => "C",
                "short" => "S",
                "int" => "I",
                "long" => "J",
                "float" => "F",
                "double" => "D",
                other => return format!("L{};", other),
            };
            return letter.to_string();
        }
        match self.klasses.get(&id) {
            Some(name) if name.starts_with('[') => name.clone(),
            Some(name) => format!("L{};", name),
            None => "?".to_string(),
        }
    }

    fn method_identity(&self, id: Option<u64>) -> MethodIdentity {
        id.and_then(|id| self.methods.get(&id))
            .map(|m| m.identity.clone())
            .unwrap_or_else(MethodIdentity::unresolved)
    }

    fn scope_method(&self) -> MethodIdentity {
        match self.scopes.last().and_then(|s| s.node) {
            Some(node) => self
                .task
                .inline_tree
                .node(node)
                .map(|n| n.callee.clone())
                .unwrap_or_else(|| self.task.method.clone()),
            None => self.task.method.clone(),
        }
    }

    fn add_decision(&mut self, decision: InlineDecision, reason: Option<String>) {
        self.touch();
        let call = self.call.clone().unwrap_or_default();
        let callee_size = call
            .method
            .and_then(|id| self.methods.get(&id))
            .and_then(|m| m.bytes);
        let site = CallSite {
            callee: self.method_identity(call.method),
            bci: self.scopes.last().and_then(|s| s.bci),
            decision,
            reason,
            detail: None,
            callee_size,
            invocation_count: call.count,
        };
        let parent = self.scopes.last().and_then(|s| s.node);
        let id = self.task.inline_tree.add(parent, site);
        if let Some(scope) = self.scopes.last_mut() {
            scope.decisions.push((id, call.method));
        }
    }

    fn open_record(&mut self, record: OpenRecord, shape: FragmentKind) {
        self.touch();
        self.close_record();
        self.record = Some(record);
        if shape != FragmentKind::Open {
            self.close_record();
        }
    }

    fn close_record(&mut self) {
        match self.record.take() {
            Some(OpenRecord::Allocation(alloc)) => self.task.eliminated_allocations.push(alloc),
            Some(OpenRecord::Lock(lock)) => self.task.elided_locks.push(lock),
            None => {}
        }
    }

    fn add_frame(&mut self, bci: Option<u32>, method: Option<MethodIdentity>, method_ref: Option<u64>) {
        if self.record.is_none() {
            return;
        }
        let frame = JvmsFrame {
            method: method.unwrap_or_else(|| self.method_identity(method_ref)),
            bci,
        };
        match self.record {
            Some(OpenRecord::Allocation(ref mut alloc)) => alloc.frames.push(frame),
            Some(OpenRecord::Lock(ref mut lock)) => lock.frames.push(frame),
            None => {}
        }
    }

    fn open_parse(&mut self, method: Option<u64>) {
        self.touch();
        let Some(parent) = self.scopes.last_mut() else {
            // The compiled method itself.
            if let Some(m) = method.and_then(|id| self.methods.get(&id)) {
                let size = m.bytes.or(self.task.bytecode_size);
                self.task.inline_tree.set_root(self.task.method.clone(), size);
            }
            self.scopes.push(ParseScope {
                node: None,
                method,
                bci: None,
                decisions: Vec::new(),
            });
            return;
        };
        // Newest decision in the caller for this callee that has no scope yet.
        let node = match parent.decisions.iter().rposition(|(_, m)| *m == method) {
            Some(at) => Some(parent.decisions.remove(at).0),
            None => parent.node,
        };
        self.scopes.push(ParseScope {
            node,
            method,
            bci: None,
            decisions: Vec::new(),
        });
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct TaskBuilder {
    options: BuilderOptions,
    active: Option<ActiveTask>,
    /// Implicitly opened tasks waiting for their start event.
    open: FxHashMap<CompileId, CompileTask>,
    closed: FxHashSet<CompileId>,
    nmethod_addresses: FxHashMap<u64, CompileId>,
    /// Runtime uncommon trap whose `jvms` children are still arriving.
    trap: Option<DeoptEvent>,
    assembly_text: String,
    thread_name: Option<String>,
    header: LogHeader,
    stats: BuilderStats,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new(BuilderOptions::default())
    }
}

impl TaskBuilder {
    pub fn new(options: BuilderOptions) -> Self {
        TaskBuilder {
            options,
            active: None,
            open: FxHashMap::default(),
            closed: FxHashSet::default(),
            nmethod_addresses: FxHashMap::default(),
            trap: None,
            assembly_text: String::new(),
            thread_name: None,
            header: LogHeader::default(),
            stats: BuilderStats::default(),
        }
    }

    pub fn stats(&self) -> BuilderStats {
        self.stats
    }

    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    /// Tasks started or referenced but not yet handed off.
    pub fn open_tasks(&self) -> usize {
        self.open.len() + usize::from(self.active.is_some())
    }

    /// Consume one decoded event.
    pub fn accept(&mut self, ev: DecodedEvent, out: &mut Vec<Emitted>) {
        if !matches!(ev.event, LogEvent::AssemblyText(_)) && !self.assembly_text.is_empty() {
            self.flush_assembly(out);
        }
        self.stats.unparsed_attributes += ev.unparsed.len() as u64;
        let unparsed: Vec<TaskFlag> = ev
            .unparsed
            .iter()
            .map(|u| TaskFlag::UnparsedAttribute {
                tag: ev.tag.clone(),
                attribute: u.attribute.clone(),
                raw: u.raw.clone(),
            })
            .collect();

        match ev.event {
            LogEvent::LogStart {
                version,
                process,
                time_ms,
            } => {
                self.header.log_version = version;
                self.header.process = process;
                self.header.start_time_ms = time_ms;
            }
            LogEvent::HeaderText { field, text } => match field.as_str() {
                "release" => self.header.vm_release = Some(text.trim().to_string()),
                "name" => self.header.vm_name = Some(text.trim().to_string()),
                _ => {}
            },
            LogEvent::CompilerThread { name, .. } => {
                if let Some(ref name) = name {
                    if !self.header.compiler_threads.contains(name) {
                        self.header.compiler_threads.push(name.clone());
                    }
                }
                self.thread_name = name;
            }
            LogEvent::ThreadLog { .. } => self.thread_name = None,
            LogEvent::Close(EventKind::ThreadLog) => {
                self.abandon_active(out);
                self.thread_name = None;
            }
            LogEvent::TaskQueued(attrs) => self.task_queued(attrs, unparsed),
            LogEvent::TaskStart(attrs) => self.task_start(attrs, unparsed, out),
            LogEvent::TaskDone {
                success,
                native_size,
                inlined_bytes,
                stamp,
            } => self.task_done(success, native_size, inlined_bytes, stamp, unparsed, out),
            LogEvent::Close(EventKind::TaskStart) => {
                // Close without a done event: the compilation never finished.
                self.abandon_active(out);
            }
            LogEvent::NMethod(attrs) => self.nmethod(attrs, unparsed, out),
            LogEvent::UncommonTrap {
                compile_id: Some(compile_id),
                bci,
                reason,
                action,
                stamp,
            } => {
                let event = DeoptEvent {
                    compile_id,
                    kind: DeoptKind::UncommonTrap,
                    bci,
                    method: None,
                    reason,
                    action,
                    stamp,
                };
                if ev.shape == FragmentKind::Open {
                    self.trap = Some(event);
                } else {
                    out.push(Emitted::Deopt(event));
                }
            }
            LogEvent::Jvms {
                bci,
                method,
                method_ref,
            } => {
                if let Some(trap) = self.trap.as_mut() {
                    // The first frame is the innermost.
                    if trap.method.is_none() {
                        trap.bci = trap.bci.or(bci);
                        trap.method = method;
                    }
                } else if let Some(active) = self.active.as_mut() {
                    active.add_frame(bci, method, method_ref);
                }
            }
            LogEvent::Close(EventKind::UncommonTrap) => {
                if let Some(trap) = self.trap.take() {
                    out.push(Emitted::Deopt(trap));
                }
            }
            LogEvent::Deoptimized {
                compile_id: Some(compile_id),
                reason,
                stamp,
                ..
            } => out.push(Emitted::Deopt(DeoptEvent {
                compile_id,
                kind: DeoptKind::Deoptimized,
                bci: None,
                method: None,
                reason,
                action: None,
                stamp,
            })),
            LogEvent::MadeNotEntrant {
                compile_id: Some(compile_id),
                stamp,
                ..
            } => out.push(Emitted::Deopt(DeoptEvent {
                compile_id,
                kind: DeoptKind::MadeNotEntrant,
                bci: None,
                method: None,
                reason: None,
                action: None,
                stamp,
            })),
            LogEvent::AssemblyText(text) => {
                self.assembly_text.push_str(&text);
                self.assembly_text.push('\n');
            }
            LogEvent::Close(EventKind::PrintNMethod) => self.flush_assembly(out),
            LogEvent::Opaque { closing, .. } => {
                if !closing {
                    self.stats.opaque_events += 1;
                }
            }
            event => self.task_event(event, ev.shape, unparsed),
        }
    }

    /// Events that only make sense inside an open `<task>`.
    fn task_event(&mut self, event: LogEvent, shape: FragmentKind, unparsed: Vec<TaskFlag>) {
        let Some(active) = self.active.as_mut() else {
            if is_task_scoped(&event) {
                self.stats.stray_events += 1;
            }
            return;
        };
        for flag in unparsed {
            active.task.flag(flag);
        }

        match event {
            LogEvent::TypeDef {
                id: Some(id),
                name: Some(name),
            } => {
                active.types.insert(id, name);
            }
            LogEvent::KlassDef {
                id: Some(id),
                name: Some(name),
            } => {
                active.klasses.insert(id, name);
            }
            LogEvent::MethodDef {
                id: Some(id),
                holder,
                name,
                return_type,
                arguments,
                bytes,
                ..
            } => {
                let class_name = holder
                    .and_then(|h| active.klasses.get(&h).cloned())
                    .unwrap_or_else(|| "<unknown>".to_string());
                let mut descriptor = String::from("(");
                for arg in arguments.unwrap_or_default() {
                    descriptor.push_str(&active.type_descriptor(arg));
                }
                descriptor.push(')');
                descriptor.push_str(&return_type.map_or_else(|| "V".to_string(), |r| active.type_descriptor(r)));
                let identity = MethodIdentity::new(
                    class_name,
                    name.unwrap_or_else(|| "<unknown>".to_string()),
                    descriptor,
                );
                active.methods.insert(id, DictMethod { identity, bytes });
            }
            LogEvent::ParseOpen { method, .. } => active.open_parse(method),
            LogEvent::ParseDone { .. } => {}
            LogEvent::Close(EventKind::ParseOpen) => {
                if active.scopes.pop().is_none() {
                    active.task.flag(TaskFlag::UnbalancedScopes);
                }
                active.call = None;
            }
            LogEvent::Bytecode { bci, .. } => {
                if let Some(scope) = active.scopes.last_mut() {
                    scope.bci = bci;
                }
                active.call = None;
            }
            LogEvent::Call { method, count, .. } => {
                active.call = Some(PendingCall { method, count });
            }
            LogEvent::InlineSuccess { reason } => {
                active.add_decision(InlineDecision::Inlined, reason)
            }
            LogEvent::InlineFail { reason } => {
                active.add_decision(InlineDecision::NotInlined, reason)
            }
            LogEvent::Intrinsic { name } => active.add_decision(InlineDecision::Intrinsic, name),
            LogEvent::UncommonTrap {
                compile_id: None,
                bci,
                reason,
                action,
                ..
            } => {
                active.touch();
                let trap = EmittedTrap {
                    method: active.scope_method(),
                    bci: bci.or_else(|| active.scopes.last().and_then(|s| s.bci)),
                    reason,
                    action,
                };
                active.task.emitted_traps.push(trap);
            }
            LogEvent::EliminateAllocation { klass } => {
                let class = klass.and_then(|id| active.klasses.get(&id).cloned());
                let alloc = EliminatedAllocation {
                    class,
                    frames: Vec::new(),
                };
                active.open_record(OpenRecord::Allocation(alloc), shape);
            }
            LogEvent::EliminateLock { lock, kind } => {
                let op = lock.map(|lock| if lock { LockOp::Lock } else { LockOp::Unlock });
                let elided = ElidedLock {
                    op,
                    kind,
                    frames: Vec::new(),
                };
                active.open_record(OpenRecord::Lock(elided), shape);
            }
            LogEvent::Close(EventKind::EliminateAllocation | EventKind::EliminateLock) => {
                active.close_record()
            }
            LogEvent::HotThrow {
                preallocated,
                reason,
            } => {
                active.touch();
                let throw = HotThrow {
                    method: active.scope_method(),
                    bci: active.scopes.last().and_then(|s| s.bci),
                    reason,
                    preallocated: preallocated.unwrap_or(false),
                };
                active.task.hot_throws.push(throw);
            }
            LogEvent::Phase(attrs) => {
                active.touch();
                active.task.phases.push(PhaseRecord {
                    name: attrs.name.unwrap_or_default(),
                    started_at: attrs.stamp,
                    finished_at: None,
                    nodes_before: attrs.nodes,
                    nodes_after: None,
                });
                active.open_phases.push(active.task.phases.len() - 1);
            }
            LogEvent::PhaseDone(attrs) => {
                if let Some(at) = active.open_phases.pop() {
                    let phase = &mut active.task.phases[at];
                    phase.finished_at = attrs.stamp;
                    phase.nodes_after = attrs.nodes;
                }
            }
            LogEvent::Failure { reason, .. } => {
                active.touch();
                active.task.outcome = Outcome::Failed { reason };
            }
            LogEvent::CodeCache {
                free_code_cache, ..
            } => active.free_code_cache = free_code_cache,
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// The open task for `compile_id`, whether active or implicit.
    fn open_task_mut(&mut self, compile_id: CompileId) -> Option<&mut CompileTask> {
        match self.active {
            Some(ref mut active) if active.task.compile_id == compile_id => Some(&mut active.task),
            _ => self.open.get_mut(&compile_id),
        }
    }

    /// The open task for `compile_id`, opening it implicitly when unseen.
    fn task_entry(&mut self, compile_id: CompileId, method: Option<&MethodIdentity>) -> &mut CompileTask {
        match self.active {
            Some(ref mut active) if active.task.compile_id == compile_id => &mut active.task,
            _ => implicit_task(&mut self.open, &mut self.stats, compile_id, method),
        }
    }

    fn task_queued(&mut self, attrs: TaskAttrs, unparsed: Vec<TaskFlag>) {
        let Some(compile_id) = attrs.compile_id else {
            self.stats.stray_events += 1;
            return;
        };
        if self.closed.contains(&compile_id) {
            return;
        }
        let task = self.task_entry(compile_id, attrs.method.as_ref());
        apply_task_attrs(task, &attrs);
        task.queued_at = task.queued_at.or(attrs.stamp);
        for flag in unparsed {
            task.flag(flag);
        }
    }

    fn task_start(&mut self, attrs: TaskAttrs, unparsed: Vec<TaskFlag>, out: &mut Vec<Emitted>) {
        self.abandon_active(out);

        let compile_id = match attrs.compile_id {
            Some(id) => id,
            None => {
                // Without an id the task cannot be linked to anything else.
                self.stats.stray_events += 1;
                u64::MAX
            }
        };
        let mut task = match self.open.remove(&compile_id) {
            Some(mut task) => {
                task.flags.retain(|f| *f != TaskFlag::ImplicitlyOpened);
                task
            }
            None => {
                let mut task = CompileTask::new(compile_id, MethodIdentity::unresolved());
                if self.closed.contains(&compile_id) {
                    self.stats.duplicate_starts += 1;
                    task.flag(TaskFlag::DuplicateCompileId);
                }
                task
            }
        };
        if let Some(ref method) = attrs.method {
            task.method = method.clone();
        }
        apply_task_attrs(&mut task, &attrs);
        task.started_at = attrs.stamp.or(task.started_at);
        task.compiler_thread = self.thread_name.clone();
        if task.method.is_unresolved() {
            task.flag(TaskFlag::UnresolvedMethod);
        }
        task.inline_tree.set_root(task.method.clone(), task.bytecode_size);
        for flag in unparsed {
            task.flag(flag);
        }
        tracing::debug!(compile_id, method = %task.method, "task opened");
        self.active = Some(ActiveTask::new(task));
    }

    fn task_done(
        &mut self,
        success: Option<bool>,
        native_size: Option<u64>,
        inlined_bytes: Option<u64>,
        stamp: Option<Stamp>,
        unparsed: Vec<TaskFlag>,
        out: &mut Vec<Emitted>,
    ) {
        let Some(mut active) = self.active.take() else {
            self.stats.stray_events += 1;
            return;
        };
        let task = &mut active.task;
        for flag in unparsed {
            task.flag(flag);
        }
        task.finished_at = stamp;
        task.native_size = native_size.or(task.native_size);
        task.inlined_bytes = inlined_bytes;
        task.outcome = match (success, std::mem::replace(&mut task.outcome, Outcome::Pending)) {
            (Some(false), Outcome::Failed { reason }) => Outcome::Failed { reason },
            (Some(false), _) => Outcome::Failed { reason: None },
            (_, Outcome::Failed { reason }) => Outcome::Failed { reason },
            _ => Outcome::Succeeded,
        };
        if !active.scopes.is_empty() {
            task.flag(TaskFlag::UnbalancedScopes);
        }
        if active.free_code_cache.is_some() {
            out.push(Emitted::CodeCache(CodeCacheSample {
                compile_id: task.compile_id,
                stamp,
                native_size,
                free_code_cache: active.free_code_cache,
            }));
        }
        task.state = TaskState::Closed;
        self.hand_off(active.task, out);
    }

    fn abandon_active(&mut self, out: &mut Vec<Emitted>) {
        if let Some(active) = self.active.take() {
            let mut task = active.task;
            task.state = TaskState::Abandoned;
            task.flag(TaskFlag::Incomplete);
            self.hand_off(task, out);
        }
    }

    fn hand_off(&mut self, mut task: CompileTask, out: &mut Vec<Emitted>) {
        for violation in task.inline_tree.validate() {
            task.flag(TaskFlag::StructurallyInconsistent {
                node: violation.node,
                bci: violation.bci,
                parent_size: violation.parent_size,
            });
        }
        match task.state {
            TaskState::Abandoned => {
                self.stats.tasks_abandoned += 1;
                tracing::debug!(compile_id = task.compile_id, "task abandoned");
            }
            _ => {
                self.stats.tasks_closed += 1;
                tracing::debug!(compile_id = task.compile_id, "task closed");
            }
        }
        self.closed.insert(task.compile_id);
        out.push(Emitted::Task(task));
    }

    fn nmethod(&mut self, attrs: NMethodAttrs, unparsed: Vec<TaskFlag>, out: &mut Vec<Emitted>) {
        let Some(compile_id) = attrs.compile_id else {
            self.stats.stray_events += 1;
            return;
        };
        let native = NativeMethod {
            compiler: attrs.compiler.clone(),
            emitted_at: attrs.stamp,
            address: attrs.address,
            entry: attrs.entry,
            size: attrs.size,
            insts_offset: attrs.insts_offset,
            base_address: attrs
                .address
                .map_or(0, |a| a + attrs.insts_offset.unwrap_or(0)),
            ..NativeMethod::default()
        };
        if let Some(address) = attrs.address {
            self.nmethod_addresses.insert(address, compile_id);
        }
        let kind = CompileKind::from_attr(attrs.compile_kind.as_deref(), None);

        if self.closed.contains(&compile_id) {
            out.push(Emitted::Late {
                compile_id,
                attachment: Attachment::NMethod(native),
            });
            return;
        }
        if kind == CompileKind::NativeWrapper && self.open_task_mut(compile_id).is_none() {
            // Native wrappers are never logged as tasks.
            let mut task = CompileTask::new(compile_id, attrs.method.clone().unwrap_or_else(MethodIdentity::unresolved));
            task.kind = kind;
            task.level = attrs.level;
            task.compiler = attrs.compiler.clone();
            task.native_size = attrs.size;
            task.nmethod = Some(native);
            task.state = TaskState::Closed;
            task.outcome = Outcome::Succeeded;
            if task.method.is_unresolved() {
                task.flag(TaskFlag::UnresolvedMethod);
            }
            for flag in unparsed {
                task.flag(flag);
            }
            self.hand_off(task, out);
            return;
        }

        let task = self.task_entry(compile_id, attrs.method.as_ref());
        if task.method.is_unresolved() {
            if let Some(ref method) = attrs.method {
                task.method = method.clone();
                task.inline_tree.set_root(method.clone(), task.bytecode_size);
            }
        }
        task.level = task.level.or(attrs.level);
        task.compiler = task.compiler.take().or(attrs.compiler);
        if kind != CompileKind::Standard {
            task.kind = kind;
        }
        task.attach_native(native);
        for flag in unparsed {
            task.flag(flag);
        }
    }

    fn flush_assembly(&mut self, out: &mut Vec<Emitted>) {
        let text = std::mem::take(&mut self.assembly_text);
        for chunk in asm::split_methods(&text) {
            let listing = asm::parse(&chunk);
            if listing.instruction_count() == 0 {
                continue;
            }
            let compile_id = listing.compile_id.or_else(|| {
                listing
                    .nmethod_address
                    .and_then(|a| self.nmethod_addresses.get(&a).copied())
            });
            let Some(compile_id) = compile_id else {
                self.stats.orphan_assemblies += 1;
                tracing::debug!("printed assembly without a compile id");
                out.push(Emitted::OrphanAssembly(listing));
                continue;
            };
            let retain = self.options.retain_assembly;
            match self.open_task_mut(compile_id) {
                Some(task) => {
                    task.attach_assembly(listing);
                    if !retain {
                        if let Some(native) = task.nmethod.as_mut() {
                            native.assembly = None;
                        }
                    }
                }
                None => out.push(Emitted::Late {
                    compile_id,
                    attachment: Attachment::Assembly(listing),
                }),
            }
        }
    }

    /// End of source: hand off everything still open as abandoned.
    pub fn finish(&mut self, out: &mut Vec<Emitted>) {
        self.flush_assembly(out);
        if let Some(trap) = self.trap.take() {
            out.push(Emitted::Deopt(trap));
        }
        self.abandon_active(out);
        let mut pending: Vec<CompileTask> = self.open.drain().map(|(_, t)| t).collect();
        pending.sort_by_key(|t| t.compile_id);
        for mut task in pending {
            task.state = TaskState::Abandoned;
            task.flag(TaskFlag::Incomplete);
            self.hand_off(task, out);
        }
    }
}

fn implicit_task<'a>(
    open: &'a mut FxHashMap<CompileId, CompileTask>,
    stats: &mut BuilderStats,
    compile_id: CompileId,
    method: Option<&MethodIdentity>,
) -> &'a mut CompileTask {
    open.entry(compile_id).or_insert_with(|| {
        stats.implicit_tasks += 1;
        tracing::debug!(compile_id, "implicitly opened task");
        let method = method.cloned().unwrap_or_else(MethodIdentity::unresolved);
        let mut task = CompileTask::new(compile_id, method);
        task.state = TaskState::Accumulating;
        task.flag(TaskFlag::ImplicitlyOpened);
        task
    })
}

fn apply_task_attrs(task: &mut CompileTask, attrs: &TaskAttrs) {
    if task.method.is_unresolved() {
        if let Some(ref method) = attrs.method {
            task.method = method.clone();
        }
    }
    task.bytecode_size = attrs.bytes.or(task.bytecode_size);
    task.level = attrs.level.or(task.level);
    if attrs.compile_kind.is_some() || attrs.osr_bci.is_some() {
        task.kind = CompileKind::from_attr(attrs.compile_kind.as_deref(), attrs.osr_bci);
    }
    task.hotness.invocation_count = attrs.count.or(task.hotness.invocation_count);
    task.hotness.backedge_count = attrs.backedge_count.or(task.hotness.backedge_count);
    task.hotness.interpreter_invocation_count =
        attrs.iicount.or(task.hotness.interpreter_invocation_count);
}

fn is_task_scoped(event: &LogEvent) -> bool {
    matches!(
        event,
        LogEvent::TypeDef { .. }
            | LogEvent::KlassDef { .. }
            | LogEvent::MethodDef { .. }
            | LogEvent::ParseOpen { .. }
            | LogEvent::Bytecode { .. }
            | LogEvent::Call { .. }
            | LogEvent::InlineSuccess { .. }
            | LogEvent::InlineFail { .. }
            | LogEvent::Intrinsic { .. }
            | LogEvent::EliminateAllocation { .. }
            | LogEvent::EliminateLock { .. }
            | LogEvent::HotThrow { .. }
            | LogEvent::Phase(_)
            | LogEvent::Failure { .. }
    )
}
