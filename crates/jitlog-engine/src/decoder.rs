//! Event decoder: typed view of one raw fragment.
//!
//! Decoding is a pure function of the fragment and the [`SchemaTable`]. Tags
//! the table does not know become [`LogEvent::Opaque`]; attribute values that
//! fail to parse are reported in [`DecodedEvent::unparsed`] and the event is
//! decoded anyway with that field absent.

use serde::{Deserialize, Serialize};

use crate::model::{MethodIdentity, Stamp};
use crate::reader::{FragmentKind, RawEvent};
use crate::schema::{EventKind, Role, SchemaTable, ValueType};

/// A parsed attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Hex(u64),
    Bool(bool),
    Stamp(Stamp),
    Signature(MethodIdentity),
    IdList(Vec<u64>),
    Text(String),
}

/// An attribute whose text did not match the type its role requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnparsedAttr {
    pub attribute: String,
    pub role: Role,
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskAttrs {
    pub compile_id: Option<u64>,
    pub method: Option<MethodIdentity>,
    pub bytes: Option<u32>,
    pub count: Option<u64>,
    pub backedge_count: Option<u64>,
    pub iicount: Option<u64>,
    pub level: Option<u8>,
    pub compile_kind: Option<String>,
    pub osr_bci: Option<u32>,
    pub stamp: Option<Stamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseAttrs {
    pub name: Option<String>,
    pub nodes: Option<u64>,
    pub live: Option<u64>,
    pub stamp: Option<Stamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NMethodAttrs {
    pub compile_id: Option<u64>,
    pub compiler: Option<String>,
    pub level: Option<u8>,
    pub compile_kind: Option<String>,
    pub address: Option<u64>,
    pub entry: Option<u64>,
    pub size: Option<u64>,
    pub insts_offset: Option<u64>,
    pub method: Option<MethodIdentity>,
    pub stamp: Option<Stamp>,
}

/// Typed event variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    LogStart {
        version: Option<String>,
        process: Option<u64>,
        time_ms: Option<u64>,
    },
    /// Text of a header element such as `release` or `name`.
    HeaderText { field: String, text: String },
    CompilerThread {
        name: Option<String>,
        thread: Option<String>,
        stamp: Option<Stamp>,
    },
    ThreadLog { thread: Option<String> },
    TaskQueued(TaskAttrs),
    TaskStart(TaskAttrs),
    TaskDone {
        success: Option<bool>,
        native_size: Option<u64>,
        inlined_bytes: Option<u64>,
        stamp: Option<Stamp>,
    },
    Failure {
        reason: Option<String>,
        stamp: Option<Stamp>,
    },
    Phase(PhaseAttrs),
    PhaseDone(PhaseAttrs),
    TypeDef { id: Option<u64>, name: Option<String> },
    KlassDef { id: Option<u64>, name: Option<String> },
    MethodDef {
        id: Option<u64>,
        holder: Option<u64>,
        name: Option<String>,
        return_type: Option<u64>,
        arguments: Option<Vec<u64>>,
        bytes: Option<u32>,
        iicount: Option<u64>,
    },
    ParseOpen {
        method: Option<u64>,
        stamp: Option<Stamp>,
    },
    ParseDone { stamp: Option<Stamp> },
    Bytecode {
        opcode: Option<u32>,
        bci: Option<u32>,
    },
    Call {
        method: Option<u64>,
        count: Option<u64>,
        inline: Option<bool>,
    },
    InlineSuccess { reason: Option<String> },
    InlineFail { reason: Option<String> },
    Intrinsic { name: Option<String> },
    UncommonTrap {
        compile_id: Option<u64>,
        bci: Option<u32>,
        reason: Option<String>,
        action: Option<String>,
        stamp: Option<Stamp>,
    },
    /// One frame of an inlining chain, innermost first.
    Jvms {
        bci: Option<u32>,
        method: Option<MethodIdentity>,
        /// Dictionary id, when the frame names a method of the enclosing task.
        method_ref: Option<u64>,
    },
    EliminateAllocation { klass: Option<u64> },
    EliminateLock {
        lock: Option<bool>,
        kind: Option<String>,
    },
    HotThrow {
        preallocated: Option<bool>,
        reason: Option<String>,
    },
    Deoptimized {
        compile_id: Option<u64>,
        reason: Option<String>,
        pc: Option<u64>,
        stamp: Option<Stamp>,
    },
    MadeNotEntrant {
        compile_id: Option<u64>,
        compiler: Option<String>,
        level: Option<u8>,
        stamp: Option<Stamp>,
    },
    NMethod(NMethodAttrs),
    CodeCache {
        free_code_cache: Option<u64>,
        stamp: Option<Stamp>,
    },
    PrintNMethod {
        compile_id: Option<u64>,
        stamp: Option<Stamp>,
    },
    Structural,
    /// End of an element the table knows.
    Close(EventKind),
    /// Disassembler output printed into the log.
    AssemblyText(String),
    /// Any other character data.
    Text(String),
    /// A tag the table does not know, kept verbatim.
    Opaque {
        tag: String,
        attributes: Vec<(String, String)>,
        closing: bool,
    },
}

/// One decoded fragment plus its position in the nesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub shape: FragmentKind,
    pub tag: String,
    pub event: LogEvent,
    pub unparsed: Vec<UnparsedAttr>,
    pub depth: usize,
    pub parent: Option<String>,
    pub position: u64,
}

impl DecodedEvent {
    pub fn is_opaque(&self) -> bool {
        matches!(self.event, LogEvent::Opaque { .. })
    }
}

// ---------------------------------------------------------------------------
// Attribute values
// ---------------------------------------------------------------------------

fn parse_value(value_type: ValueType, raw: &str) -> Option<Value> {
    let text = raw.trim();
    match value_type {
        ValueType::Int => text.parse::<i64>().ok().map(Value::Int),
        ValueType::Hex => {
            let digits = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .unwrap_or(text);
            u64::from_str_radix(digits, 16).ok().map(Value::Hex)
        }
        ValueType::Bool => match text {
            "1" | "true" => Some(Value::Bool(true)),
            "0" | "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ValueType::Stamp => Stamp::parse(text).map(Value::Stamp),
        ValueType::Signature => MethodIdentity::parse_log_signature(text).map(Value::Signature),
        ValueType::MethodOrRef => match text.parse::<i64>() {
            Ok(id) => Some(Value::Int(id)),
            Err(_) => MethodIdentity::parse_log_signature(text).map(Value::Signature),
        },
        ValueType::IdList => text
            .split_whitespace()
            .map(|id| id.parse().ok())
            .collect::<Option<Vec<u64>>>()
            .map(Value::IdList),
        ValueType::Text => Some(Value::Text(raw.to_string())),
    }
}

/// Attribute values of one fragment, keyed by role.
#[derive(Debug, Default)]
struct Values {
    entries: Vec<(Role, Value)>,
}

impl Values {
    fn get(&self, role: Role) -> Option<&Value> {
        self.entries.iter().find(|(r, _)| *r == role).map(|(_, v)| v)
    }

    fn int(&self, role: Role) -> Option<i64> {
        match self.get(role)? {
            Value::Int(v) => Some(*v),
            Value::Hex(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Non-negative integers only; negative sentinels read as absent.
    fn uint(&self, role: Role) -> Option<u64> {
        self.int(role).and_then(|v| u64::try_from(v).ok())
    }

    fn u32(&self, role: Role) -> Option<u32> {
        self.int(role).and_then(|v| u32::try_from(v).ok())
    }

    fn u8(&self, role: Role) -> Option<u8> {
        self.int(role).and_then(|v| u8::try_from(v).ok())
    }

    fn hex(&self, role: Role) -> Option<u64> {
        match self.get(role)? {
            Value::Hex(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    fn flag(&self, role: Role) -> Option<bool> {
        match self.get(role)? {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn stamp(&self, role: Role) -> Option<Stamp> {
        match self.get(role)? {
            Value::Stamp(v) => Some(*v),
            _ => None,
        }
    }

    fn text(&self, role: Role) -> Option<String> {
        match self.get(role)? {
            Value::Text(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn ids(&self, role: Role) -> Option<Vec<u64>> {
        match self.get(role)? {
            Value::IdList(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn signature(&self, role: Role) -> Option<MethodIdentity> {
        match self.get(role)? {
            Value::Signature(v) => Some(v.clone()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

const ASSEMBLY_MARKERS: &[&str] = &[
    "Compiled method (",
    "Decoding compiled method",
    "[Disassembling for mach",
    "[Entry Point]",
    "[Verified Entry Point]",
];

fn looks_like_assembly(text: &str) -> bool {
    ASSEMBLY_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Decode one raw fragment against `table`.
pub fn decode(raw: &RawEvent, table: &SchemaTable) -> DecodedEvent {
    let mut unparsed = Vec::new();
    let event = match raw.kind {
        FragmentKind::Text => decode_text(raw, table),
        FragmentKind::Close => match table.kind_of(&raw.name) {
            Some(kind) => LogEvent::Close(kind),
            None => LogEvent::Opaque {
                tag: raw.name.clone(),
                attributes: Vec::new(),
                closing: true,
            },
        },
        FragmentKind::Open | FragmentKind::Empty => match table.tag(&raw.name) {
            None => LogEvent::Opaque {
                tag: raw.name.clone(),
                attributes: raw.attributes.clone(),
                closing: false,
            },
            Some(spec) => {
                let mut values = Values::default();
                for (attribute, text) in &raw.attributes {
                    let Some(role) = spec.attributes.get(attribute).copied() else {
                        continue;
                    };
                    match parse_value(role.value_type(), text) {
                        Some(value) => values.entries.push((role, value)),
                        None => unparsed.push(UnparsedAttr {
                            attribute: attribute.clone(),
                            role,
                            raw: text.clone(),
                        }),
                    }
                }
                build_event(spec.kind, &values)
            }
        },
    };
    DecodedEvent {
        shape: raw.kind,
        tag: raw.name.clone(),
        event,
        unparsed,
        depth: raw.depth,
        parent: raw.parent.clone(),
        position: raw.position,
    }
}

fn decode_text(raw: &RawEvent, table: &SchemaTable) -> LogEvent {
    let text = raw.text.clone().unwrap_or_default();
    match raw.parent.as_deref().and_then(|p| table.kind_of(p)) {
        Some(EventKind::PrintNMethod) => LogEvent::AssemblyText(text),
        Some(EventKind::HeaderText) => LogEvent::HeaderText {
            field: raw.name.clone(),
            text,
        },
        _ if looks_like_assembly(&text) => LogEvent::AssemblyText(text),
        _ => LogEvent::Text(text),
    }
}

fn task_attrs(v: &Values) -> TaskAttrs {
    TaskAttrs {
        compile_id: v.uint(Role::CompileId),
        method: v.signature(Role::Signature),
        bytes: v.u32(Role::Bytes),
        count: v.uint(Role::Count),
        backedge_count: v.uint(Role::Backedges),
        iicount: v.uint(Role::InterpreterCount),
        level: v.u8(Role::Level),
        compile_kind: v.text(Role::CompileKind),
        osr_bci: v.u32(Role::OsrBci),
        stamp: v.stamp(Role::Stamp),
    }
}

fn phase_attrs(v: &Values) -> PhaseAttrs {
    PhaseAttrs {
        name: v.text(Role::Name),
        nodes: v.uint(Role::Nodes),
        live: v.uint(Role::Live),
        stamp: v.stamp(Role::Stamp),
    }
}

fn build_event(kind: EventKind, v: &Values) -> LogEvent {
    match kind {
        EventKind::LogStart => LogEvent::LogStart {
            version: v.text(Role::Version),
            process: v.uint(Role::Process),
            time_ms: v.uint(Role::TimeMs),
        },
        // Header values arrive as text children.
        EventKind::HeaderText | EventKind::Structural => LogEvent::Structural,
        EventKind::CompilerThread => LogEvent::CompilerThread {
            name: v.text(Role::Name),
            thread: v.text(Role::Thread),
            stamp: v.stamp(Role::Stamp),
        },
        EventKind::ThreadLog => LogEvent::ThreadLog {
            thread: v.text(Role::Thread),
        },
        EventKind::TaskQueued => LogEvent::TaskQueued(task_attrs(v)),
        EventKind::TaskStart => LogEvent::TaskStart(task_attrs(v)),
        EventKind::TaskDone => LogEvent::TaskDone {
            success: v.flag(Role::Success),
            native_size: v.uint(Role::NativeSize),
            inlined_bytes: v.uint(Role::InlinedBytes),
            stamp: v.stamp(Role::Stamp),
        },
        EventKind::Failure => LogEvent::Failure {
            reason: v.text(Role::Reason),
            stamp: v.stamp(Role::Stamp),
        },
        EventKind::Phase => LogEvent::Phase(phase_attrs(v)),
        EventKind::PhaseDone => LogEvent::PhaseDone(phase_attrs(v)),
        EventKind::TypeDef => LogEvent::TypeDef {
            id: v.uint(Role::Id),
            name: v.text(Role::Name),
        },
        EventKind::KlassDef => LogEvent::KlassDef {
            id: v.uint(Role::Id),
            name: v.text(Role::Name),
        },
        EventKind::MethodDef => LogEvent::MethodDef {
            id: v.uint(Role::Id),
            holder: v.uint(Role::Holder),
            name: v.text(Role::Name),
            return_type: v.uint(Role::ReturnType),
            arguments: v.ids(Role::Arguments),
            bytes: v.u32(Role::Bytes),
            iicount: v.uint(Role::InterpreterCount),
        },
        EventKind::ParseOpen => LogEvent::ParseOpen {
            method: v.uint(Role::MethodRef),
            stamp: v.stamp(Role::Stamp),
        },
        EventKind::ParseDone => LogEvent::ParseDone {
            stamp: v.stamp(Role::Stamp),
        },
        EventKind::Bytecode => LogEvent::Bytecode {
            opcode: v.u32(Role::Opcode),
            bci: v.u32(Role::Bci),
        },
        EventKind::Call => LogEvent::Call {
            method: v.uint(Role::MethodRef),
            count: v.uint(Role::Count),
            inline: v.flag(Role::InlineFlag),
        },
        EventKind::InlineSuccess => LogEvent::InlineSuccess {
            reason: v.text(Role::Reason),
        },
        EventKind::InlineFail => LogEvent::InlineFail {
            reason: v.text(Role::Reason),
        },
        EventKind::Intrinsic => LogEvent::Intrinsic {
            name: v.text(Role::Name),
        },
        EventKind::UncommonTrap => LogEvent::UncommonTrap {
            compile_id: v.uint(Role::CompileId),
            bci: v.u32(Role::Bci),
            reason: v.text(Role::Reason),
            action: v.text(Role::Action),
            stamp: v.stamp(Role::Stamp),
        },
        EventKind::Jvms => LogEvent::Jvms {
            bci: v.u32(Role::Bci),
            method: v.signature(Role::FrameMethod),
            method_ref: v.uint(Role::FrameMethod),
        },
        EventKind::EliminateAllocation => LogEvent::EliminateAllocation {
            klass: v.uint(Role::KlassRef),
        },
        EventKind::EliminateLock => LogEvent::EliminateLock {
            lock: v.flag(Role::LockFlag),
            kind: v.text(Role::LockKind),
        },
        EventKind::HotThrow => LogEvent::HotThrow {
            preallocated: v.flag(Role::Preallocated),
            reason: v.text(Role::Reason),
        },
        EventKind::Deoptimized => LogEvent::Deoptimized {
            compile_id: v.uint(Role::CompileId),
            reason: v.text(Role::Reason),
            pc: v.hex(Role::Pc),
            stamp: v.stamp(Role::Stamp),
        },
        EventKind::MadeNotEntrant => LogEvent::MadeNotEntrant {
            compile_id: v.uint(Role::CompileId),
            compiler: v.text(Role::Compiler),
            level: v.u8(Role::Level),
            stamp: v.stamp(Role::Stamp),
        },
        EventKind::NMethod => LogEvent::NMethod(NMethodAttrs {
            compile_id: v.uint(Role::CompileId),
            compiler: v.text(Role::Compiler),
            level: v.u8(Role::Level),
            compile_kind: v.text(Role::CompileKind),
            address: v.hex(Role::Address),
            entry: v.hex(Role::Entry),
            size: v.uint(Role::Size),
            insts_offset: v.uint(Role::InstsOffset),
            method: v.signature(Role::Signature),
            stamp: v.stamp(Role::Stamp),
        }),
        EventKind::CodeCache => LogEvent::CodeCache {
            free_code_cache: v.uint(Role::FreeCodeCache),
            stamp: v.stamp(Role::Stamp),
        },
        EventKind::PrintNMethod => LogEvent::PrintNMethod {
            compile_id: v.uint(Role::CompileId),
            stamp: v.stamp(Role::Stamp),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: FragmentKind, name: &str, attributes: &[(&str, &str)]) -> RawEvent {
        RawEvent {
            kind,
            name: name.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            text: None,
            depth: 1,
            parent: Some("compilation_log".to_string()),
            position: 0,
        }
    }

    #[test]
    fn test_decode_task_start() {
        let ev = raw(
            FragmentKind::Open,
            "task",
            &[
                ("compile_id", "9"),
                ("method", "Foo bar (I)V"),
                ("bytes", "17"),
                ("count", "5000"),
                ("level", "4"),
                ("stamp", "0.250"),
            ],
        );
        let decoded = decode(&ev, SchemaTable::builtin());
        assert!(decoded.unparsed.is_empty());
        match decoded.event {
            LogEvent::TaskStart(attrs) => {
                assert_eq!(attrs.compile_id, Some(9));
                assert_eq!(attrs.method, Some(MethodIdentity::new("Foo", "bar", "(I)V")));
                assert_eq!(attrs.bytes, Some(17));
                assert_eq!(attrs.level, Some(4));
                assert_eq!(attrs.stamp, Some(Stamp(250_000)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_value_keeps_event() {
        let ev = raw(FragmentKind::Open, "task", &[("compile_id", "12"), ("bytes", "lots")]);
        let decoded = decode(&ev, SchemaTable::builtin());
        assert_eq!(decoded.unparsed.len(), 1);
        assert_eq!(decoded.unparsed[0].attribute, "bytes");
        assert_eq!(decoded.unparsed[0].raw, "lots");
        match decoded.event {
            LogEvent::TaskStart(attrs) => {
                assert_eq!(attrs.compile_id, Some(12));
                assert_eq!(attrs.bytes, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_opaque() {
        let ev = raw(FragmentKind::Empty, "future_event", &[("foo", "bar")]);
        let decoded = decode(&ev, SchemaTable::builtin());
        assert!(decoded.is_opaque());
        assert_eq!(
            decoded.event,
            LogEvent::Opaque {
                tag: "future_event".to_string(),
                attributes: vec![("foo".to_string(), "bar".to_string())],
                closing: false,
            }
        );
    }

    #[test]
    fn test_unknown_attribute_is_ignored() {
        let ev = raw(FragmentKind::Empty, "bc", &[("code", "182"), ("bci", "4"), ("shiny", "yes")]);
        let decoded = decode(&ev, SchemaTable::builtin());
        assert!(decoded.unparsed.is_empty());
        assert_eq!(decoded.event, LogEvent::Bytecode { opcode: Some(182), bci: Some(4) });
    }

    #[test]
    fn test_hex_and_bool_values() {
        let ev = raw(
            FragmentKind::Empty,
            "nmethod",
            &[("compile_id", "3"), ("address", "0x00007f10a1b2c010"), ("size", "880")],
        );
        match decode(&ev, SchemaTable::builtin()).event {
            LogEvent::NMethod(attrs) => {
                assert_eq!(attrs.address, Some(0x7f10a1b2c010));
                assert_eq!(attrs.size, Some(880));
            }
            other => panic!("unexpected {:?}", other),
        }

        let done = raw(FragmentKind::Empty, "task_done", &[("success", "0")]);
        assert!(matches!(
            decode(&done, SchemaTable::builtin()).event,
            LogEvent::TaskDone { success: Some(false), .. }
        ));
    }

    #[test]
    fn test_negative_count_reads_absent() {
        let ev = raw(FragmentKind::Empty, "call", &[("method", "1040"), ("count", "-1")]);
        let decoded = decode(&ev, SchemaTable::builtin());
        assert!(decoded.unparsed.is_empty());
        assert_eq!(
            decoded.event,
            LogEvent::Call { method: Some(1040), count: None, inline: None }
        );
    }

    #[test]
    fn test_method_def_arguments() {
        let ev = raw(
            FragmentKind::Empty,
            "method",
            &[("id", "1040"), ("holder", "1030"), ("name", "bar"), ("return", "1000"), ("arguments", "1001 1002")],
        );
        match decode(&ev, SchemaTable::builtin()).event {
            LogEvent::MethodDef { arguments, .. } => assert_eq!(arguments, Some(vec![1001, 1002])),
            other => panic!("unexpected {:?}", other),
        }

        let bad = raw(FragmentKind::Empty, "method", &[("id", "1"), ("arguments", "1001 x")]);
        let decoded = decode(&bad, SchemaTable::builtin());
        assert_eq!(decoded.unparsed.len(), 1);
        assert_eq!(decoded.unparsed[0].attribute, "arguments");
    }

    #[test]
    fn test_text_inside_print_nmethod_is_assembly() {
        let mut ev = raw(FragmentKind::Text, "print_nmethod", &[]);
        ev.parent = Some("print_nmethod".to_string());
        ev.text = Some("0x0000: mov rax, rbx".to_string());
        assert!(matches!(
            decode(&ev, SchemaTable::builtin()).event,
            LogEvent::AssemblyText(_)
        ));

        let mut tty = raw(FragmentKind::Text, "tty", &[]);
        tty.parent = Some("tty".to_string());
        tty.text = Some("plain output".to_string());
        assert_eq!(
            decode(&tty, SchemaTable::builtin()).event,
            LogEvent::Text("plain output".to_string())
        );
    }

    #[test]
    fn test_jvms_method_by_signature_or_id() {
        let runtime = raw(FragmentKind::Empty, "jvms", &[("bci", "12"), ("method", "Foo baz ()I")]);
        assert_eq!(
            decode(&runtime, SchemaTable::builtin()).event,
            LogEvent::Jvms {
                bci: Some(12),
                method: Some(MethodIdentity::new("Foo", "baz", "()I")),
                method_ref: None,
            }
        );

        let in_task = raw(FragmentKind::Empty, "jvms", &[("bci", "4"), ("method", "1034")]);
        let decoded = decode(&in_task, SchemaTable::builtin());
        assert!(decoded.unparsed.is_empty());
        assert_eq!(
            decoded.event,
            LogEvent::Jvms { bci: Some(4), method: None, method_ref: Some(1034) }
        );
    }

    #[test]
    fn test_decode_optimisation_records() {
        let alloc = raw(FragmentKind::Open, "eliminate_allocation", &[("type", "1051")]);
        assert_eq!(
            decode(&alloc, SchemaTable::builtin()).event,
            LogEvent::EliminateAllocation { klass: Some(1051) }
        );

        let lock = raw(FragmentKind::Open, "eliminate_lock", &[("lock", "0"), ("kind", "coarsened")]);
        assert_eq!(
            decode(&lock, SchemaTable::builtin()).event,
            LogEvent::EliminateLock { lock: Some(false), kind: Some("coarsened".to_string()) }
        );

        let throw = raw(FragmentKind::Empty, "hot_throw", &[("preallocated", "yes"), ("reason", "null_check")]);
        let decoded = decode(&throw, SchemaTable::builtin());
        assert_eq!(decoded.unparsed.len(), 1);
        assert_eq!(
            decoded.event,
            LogEvent::HotThrow { preallocated: None, reason: Some("null_check".to_string()) }
        );
    }

    #[test]
    fn test_close_of_known_tag() {
        let ev = raw(FragmentKind::Close, "task", &[]);
        assert_eq!(
            decode(&ev, SchemaTable::builtin()).event,
            LogEvent::Close(EventKind::TaskStart)
        );
    }
}
