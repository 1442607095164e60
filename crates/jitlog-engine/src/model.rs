//! Core data model shared by the builder, the history index and the query facade.
//!
//! Everything here is created during a parse pass and is append-only afterwards,
//! except for deopt attachment and the per-history "current" selection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::asm::{AssemblyMethod, CodeSpanError, MAX_CODE_SPAN};
use crate::inline_tree::{InlineTree, NodeId};

/// Compile id assigned by the compiler; unique and never reused within one log.
pub type CompileId = u64;

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Log timestamp in microseconds since VM start.
///
/// Parsed from the decimal-seconds text of `stamp` attributes without going
/// through floating point, so equal text always yields equal stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Stamp(pub u64);

impl Stamp {
    /// Parse `"12.345"` (seconds) into a stamp. Digits past microseconds are dropped.
    pub fn parse(text: &str) -> Option<Stamp> {
        let text = text.trim();
        let (whole, frac) = match text.split_once('.') {
            Some((w, f)) => (w, f),
            None => (text, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let secs: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut micros: u64 = 0;
        for (i, b) in frac.bytes().take(6).enumerate() {
            micros += u64::from(b - b'0') * 10u64.pow(5 - i as u32);
        }
        secs.checked_mul(1_000_000)?.checked_add(micros).map(Stamp)
    }

    /// Build a stamp from whole milliseconds.
    pub fn from_millis(ms: u64) -> Stamp {
        Stamp(ms * 1_000)
    }

    pub fn as_micros(self) -> u64 {
        self.0
    }

    /// Microseconds elapsed since `earlier`, saturating at zero.
    pub fn since(self, earlier: Stamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.0 / 1_000_000, (self.0 % 1_000_000) / 1_000)
    }
}

// ---------------------------------------------------------------------------
// Method identity
// ---------------------------------------------------------------------------

/// (class, method, descriptor) exactly as spelled in the log.
///
/// Equality is plain string equality; no normalization of class separators or
/// descriptor forms is attempted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodIdentity {
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
}

impl MethodIdentity {
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        MethodIdentity {
            class_name: class_name.into(),
            method_name: method_name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Parse a `method='java/lang/String hashCode ()I'` attribute value.
    pub fn parse_log_signature(signature: &str) -> Option<MethodIdentity> {
        let mut parts = signature.split_whitespace();
        let class_name = parts.next()?;
        let method_name = parts.next()?;
        let descriptor = parts.next()?;
        if parts.next().is_some() || !descriptor.starts_with('(') {
            return None;
        }
        Some(MethodIdentity::new(class_name, method_name, descriptor))
    }

    /// Placeholder used when a task's method cannot be resolved from the log.
    pub fn unresolved() -> MethodIdentity {
        MethodIdentity::new("<unresolved>", "<unresolved>", "()V")
    }

    pub fn is_unresolved(&self) -> bool {
        self.class_name == "<unresolved>"
    }
}

impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.class_name, self.method_name, self.descriptor)
    }
}

// ---------------------------------------------------------------------------
// Compile tasks
// ---------------------------------------------------------------------------

/// Builder lifecycle of a compilation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Start event seen, nothing attached yet.
    Opened,
    /// Interior events attached (or opened implicitly by a forward reference).
    Accumulating,
    /// Done event seen and the inline tree finalized.
    Closed,
    /// The source ended before the task closed.
    Abandoned,
}

/// How the compilation finished.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Pending,
    Succeeded,
    Failed { reason: Option<String> },
}

/// Standard, on-stack-replacement, or native wrapper compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompileKind {
    Standard,
    Osr { bci: Option<u32> },
    NativeWrapper,
}

impl CompileKind {
    pub fn from_attr(kind: Option<&str>, osr_bci: Option<u32>) -> CompileKind {
        match kind.map(|k| k.to_ascii_lowercase()) {
            Some(ref k) if k == "osr" => CompileKind::Osr { bci: osr_bci },
            Some(ref k) if k == "c2n" => CompileKind::NativeWrapper,
            _ if osr_bci.is_some() => CompileKind::Osr { bci: osr_bci },
            _ => CompileKind::Standard,
        }
    }

    pub fn is_osr(self) -> bool {
        matches!(self, CompileKind::Osr { .. })
    }
}

/// Profile counters reported with the task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hotness {
    pub invocation_count: Option<u64>,
    pub backedge_count: Option<u64>,
    pub interpreter_invocation_count: Option<u64>,
}

/// A compiler phase bracketed by `phase` / `phase_done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub name: String,
    pub started_at: Option<Stamp>,
    pub finished_at: Option<Stamp>,
    pub nodes_before: Option<u64>,
    pub nodes_after: Option<u64>,
}

/// An uncommon trap planted by the compiler while parsing (not a runtime event).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedTrap {
    pub method: MethodIdentity,
    pub bci: Option<u32>,
    pub reason: Option<String>,
    pub action: Option<String>,
}

/// A frame of the inlining chain an optimisation record was made in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JvmsFrame {
    pub method: MethodIdentity,
    pub bci: Option<u32>,
}

/// An allocation removed by escape analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EliminatedAllocation {
    /// Allocated class, when its klass id resolved.
    pub class: Option<String>,
    /// Innermost frame first.
    pub frames: Vec<JvmsFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOp {
    Lock,
    Unlock,
}

/// A monitor enter or exit the compiler removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElidedLock {
    pub op: Option<LockOp>,
    /// `coarsened`, `nested`, `non_escaping`, ...
    pub kind: Option<String>,
    pub frames: Vec<JvmsFrame>,
}

/// A throw site compiled to raise a preallocated exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotThrow {
    pub method: MethodIdentity,
    pub bci: Option<u32>,
    pub reason: Option<String>,
    pub preallocated: bool,
}

/// Anomalies retained on a task. None of them remove the task from the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskFlag {
    /// Created by a forward reference before its start event was seen.
    ImplicitlyOpened,
    /// The source ended (or the task element closed) without a done event.
    Incomplete,
    /// A call site's bci is outside its parent's declared code size.
    StructurallyInconsistent { node: NodeId, bci: u32, parent_size: u32 },
    /// An attribute value could not be parsed into its expected type.
    UnparsedAttribute { tag: String, attribute: String, raw: String },
    /// No method identity could be resolved for the task.
    UnresolvedMethod,
    /// A second start event arrived for an already closed compile id.
    DuplicateCompileId,
    /// Parse scopes were not balanced inside the task.
    UnbalancedScopes,
    /// A printed hex dump spanned more bytes than the method can hold; it was dropped.
    OversizedAssembly { span: u64 },
}

/// One compilation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileTask {
    pub compile_id: CompileId,
    pub method: MethodIdentity,
    /// Tier level (1-4 under tiered compilation).
    pub level: Option<u8>,
    /// Compiler name as logged (`c1`, `c2`, `jvmci`, ...).
    pub compiler: Option<String>,
    pub kind: CompileKind,
    pub bytecode_size: Option<u32>,
    pub hotness: Hotness,
    pub queued_at: Option<Stamp>,
    pub started_at: Option<Stamp>,
    pub finished_at: Option<Stamp>,
    pub state: TaskState,
    pub outcome: Outcome,
    pub native_size: Option<u64>,
    pub inlined_bytes: Option<u64>,
    pub compiler_thread: Option<String>,
    pub inline_tree: InlineTree,
    pub phases: Vec<PhaseRecord>,
    pub emitted_traps: Vec<EmittedTrap>,
    #[serde(default)]
    pub eliminated_allocations: Vec<EliminatedAllocation>,
    #[serde(default)]
    pub elided_locks: Vec<ElidedLock>,
    #[serde(default)]
    pub hot_throws: Vec<HotThrow>,
    pub nmethod: Option<NativeMethod>,
    pub deopts: Vec<DeoptEvent>,
    pub flags: Vec<TaskFlag>,
    /// Ordinal of the parse pass that recorded the task. Compile ids are
    /// only unique within one pass.
    #[serde(default)]
    pub pass: u32,
}

impl CompileTask {
    pub fn new(compile_id: CompileId, method: MethodIdentity) -> Self {
        CompileTask {
            compile_id,
            inline_tree: InlineTree::new(method.clone(), None),
            method,
            level: None,
            compiler: None,
            kind: CompileKind::Standard,
            bytecode_size: None,
            hotness: Hotness::default(),
            queued_at: None,
            started_at: None,
            finished_at: None,
            state: TaskState::Opened,
            outcome: Outcome::Pending,
            native_size: None,
            inlined_bytes: None,
            compiler_thread: None,
            phases: Vec::new(),
            emitted_traps: Vec::new(),
            eliminated_allocations: Vec::new(),
            elided_locks: Vec::new(),
            hot_throws: Vec::new(),
            nmethod: None,
            deopts: Vec::new(),
            flags: Vec::new(),
            pass: 0,
        }
    }

    /// Stamp used to order the task on its method's timeline.
    pub fn timeline_stamp(&self) -> Option<Stamp> {
        self.started_at
            .or_else(|| self.nmethod.as_ref().and_then(|n| n.emitted_at))
            .or(self.queued_at)
    }

    /// Compiler name, inferred from the tier level when the log omits it.
    pub fn compiler_name(&self) -> Option<&str> {
        if let Some(ref c) = self.compiler {
            return Some(c.as_str());
        }
        if let Some(ref n) = self.nmethod {
            if let Some(ref c) = n.compiler {
                return Some(c.as_str());
            }
        }
        match self.level {
            Some(1..=3) => Some("c1"),
            Some(4) => Some("c2"),
            _ => None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Closed && self.outcome == Outcome::Succeeded
    }

    /// True once any attached runtime event invalidated the emitted code.
    pub fn is_invalidated(&self) -> bool {
        self.deopts.iter().any(DeoptEvent::invalidates)
    }

    pub fn is_abandoned(&self) -> bool {
        self.state == TaskState::Abandoned
    }

    pub fn has_flag(&self, pred: impl Fn(&TaskFlag) -> bool) -> bool {
        self.flags.iter().any(pred)
    }

    pub fn is_structurally_consistent(&self) -> bool {
        !self.has_flag(|f| matches!(f, TaskFlag::StructurallyInconsistent { .. }))
    }

    /// Queue-to-start latency in microseconds.
    pub fn queue_delay_us(&self) -> Option<u64> {
        Some(self.started_at?.since(self.queued_at?))
    }

    pub fn duration_us(&self) -> Option<u64> {
        Some(self.finished_at?.since(self.started_at?))
    }

    pub(crate) fn flag(&mut self, flag: TaskFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    /// Install emitted-code metadata, keeping code or a listing that arrived first.
    pub(crate) fn attach_native(&mut self, mut native: NativeMethod) {
        if let Some(prev) = self.nmethod.take() {
            if native.code.is_empty() && !prev.code.is_empty() {
                native.code = prev.code;
                native.base_address = prev.base_address;
            }
            if native.anchors.is_empty() {
                native.anchors = prev.anchors;
            }
            native.assembly = native.assembly.or(prev.assembly);
        }
        self.native_size = self.native_size.or(native.size);
        self.nmethod = Some(native);
    }

    /// Fold a printed listing into the nmethod. A listing whose hex dump
    /// cannot be this method's code is dropped and flagged.
    pub(crate) fn attach_assembly(&mut self, assembly: AssemblyMethod) {
        let attached = match self.nmethod.as_mut() {
            Some(native) => native.attach_assembly(assembly),
            None => {
                let mut native = NativeMethod::default();
                let attached = native.attach_assembly(assembly);
                if attached.is_ok() {
                    self.nmethod = Some(native);
                }
                attached
            }
        };
        if let Err(err) = attached {
            tracing::warn!(compile_id = self.compile_id, %err, "printed assembly dropped");
            self.flag(TaskFlag::OversizedAssembly { span: err.span });
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime deoptimization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeoptKind {
    UncommonTrap,
    Deoptimized,
    MadeNotEntrant,
}

/// A runtime event that invalidates (or may invalidate) compiled code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeoptEvent {
    pub compile_id: CompileId,
    pub kind: DeoptKind,
    pub bci: Option<u32>,
    /// Innermost frame reported with the event, if any.
    pub method: Option<MethodIdentity>,
    pub reason: Option<String>,
    pub action: Option<String>,
    pub stamp: Option<Stamp>,
}

impl DeoptEvent {
    /// Whether the event takes the compiled code out of service.
    ///
    /// Traps with action `none` or `maybe_recompile` leave the code installed.
    pub fn invalidates(&self) -> bool {
        match self.kind {
            DeoptKind::MadeNotEntrant | DeoptKind::Deoptimized => true,
            DeoptKind::UncommonTrap => !matches!(
                self.action.as_deref(),
                Some("none") | Some("maybe_recompile")
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Native code
// ---------------------------------------------------------------------------

/// A (bytecode index, native offset) pair emitted by the compiler.
///
/// Negative bcis mark compiler-internal positions with no bytecode origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebugAnchor {
    pub bci: i32,
    pub native_offset: u64,
    pub line: Option<u32>,
}

/// Emitted machine code for one compile task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeMethod {
    pub compiler: Option<String>,
    pub emitted_at: Option<Stamp>,
    /// Runtime address reported by the log. Informational only.
    pub address: Option<u64>,
    pub entry: Option<u64>,
    pub size: Option<u64>,
    pub insts_offset: Option<u64>,
    /// Address that native offsets are relative to.
    pub base_address: u64,
    /// Raw instruction bytes, when the log carried a hex dump.
    pub code: Vec<u8>,
    pub anchors: Vec<DebugAnchor>,
    /// Disassembler output printed into the log, when present.
    pub assembly: Option<AssemblyMethod>,
}

impl NativeMethod {
    /// Fold a printed assembly listing into this nmethod.
    ///
    /// The hex dump may span at most the nmethod's size, or
    /// [`MAX_CODE_SPAN`] when the size is unknown. Nothing changes on failure.
    pub fn attach_assembly(&mut self, assembly: AssemblyMethod) -> Result<(), CodeSpanError> {
        let limit = self
            .size
            .filter(|size| *size > 0)
            .map_or(MAX_CODE_SPAN, |size| size.min(MAX_CODE_SPAN));
        let code = assembly.code_bytes(limit)?;
        self.base_address = assembly.base_address().unwrap_or(self.base_address);
        if self.code.is_empty() {
            self.code = code;
        }
        if self.anchors.is_empty() {
            self.anchors = assembly.anchors();
        }
        self.assembly = Some(assembly);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log-level records
// ---------------------------------------------------------------------------

/// Free code cache observed when a task finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCacheSample {
    pub compile_id: CompileId,
    pub stamp: Option<Stamp>,
    pub native_size: Option<u64>,
    pub free_code_cache: Option<u64>,
}

/// Facts about the VM that produced the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHeader {
    pub log_version: Option<String>,
    pub process: Option<u64>,
    pub start_time_ms: Option<u64>,
    pub vm_name: Option<String>,
    pub vm_release: Option<String>,
    pub compiler_threads: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_parse() {
        assert_eq!(Stamp::parse("0.123"), Some(Stamp(123_000)));
        assert_eq!(Stamp::parse("12"), Some(Stamp(12_000_000)));
        assert_eq!(Stamp::parse("1.2345678"), Some(Stamp(1_234_567)));
        assert_eq!(Stamp::parse(".5"), Some(Stamp(500_000)));
        assert_eq!(Stamp::parse("abc"), None);
        assert_eq!(Stamp::parse(""), None);
        assert_eq!(Stamp::parse("1.2e3"), None);
    }

    #[test]
    fn test_stamp_display() {
        assert_eq!(Stamp(1_234_567).to_string(), "1.234s");
    }

    #[test]
    fn test_parse_log_signature() {
        let m = MethodIdentity::parse_log_signature("java/lang/String hashCode ()I").unwrap();
        assert_eq!(m.class_name, "java/lang/String");
        assert_eq!(m.method_name, "hashCode");
        assert_eq!(m.descriptor, "()I");
        assert!(MethodIdentity::parse_log_signature("Foo bar").is_none());
        assert!(MethodIdentity::parse_log_signature("Foo bar baz").is_none());
    }

    #[test]
    fn test_identity_is_exact_string() {
        let a = MethodIdentity::new("java/lang/String", "hashCode", "()I");
        let b = MethodIdentity::new("java.lang.String", "hashCode", "()I");
        assert_ne!(a, b);
    }

    #[test]
    fn test_compile_kind_from_attr() {
        assert_eq!(CompileKind::from_attr(Some("osr"), Some(7)), CompileKind::Osr { bci: Some(7) });
        assert_eq!(CompileKind::from_attr(Some("c2n"), None), CompileKind::NativeWrapper);
        assert_eq!(CompileKind::from_attr(None, None), CompileKind::Standard);
        assert_eq!(CompileKind::from_attr(None, Some(3)), CompileKind::Osr { bci: Some(3) });
    }

    #[test]
    fn test_deopt_invalidation() {
        let mut ev = DeoptEvent {
            compile_id: 1,
            kind: DeoptKind::UncommonTrap,
            bci: Some(4),
            method: None,
            reason: Some("unstable_if".to_string()),
            action: Some("reinterpret".to_string()),
            stamp: None,
        };
        assert!(ev.invalidates());
        ev.action = Some("none".to_string());
        assert!(!ev.invalidates());
        ev.kind = DeoptKind::MadeNotEntrant;
        assert!(ev.invalidates());
    }

    #[test]
    fn test_compiler_name_inferred_from_level() {
        let mut task = CompileTask::new(1, MethodIdentity::new("Foo", "bar", "()V"));
        assert_eq!(task.compiler_name(), None);
        task.level = Some(3);
        assert_eq!(task.compiler_name(), Some("c1"));
        task.compiler = Some("jvmci".to_string());
        assert_eq!(task.compiler_name(), Some("jvmci"));
    }
}
