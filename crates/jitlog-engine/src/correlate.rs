//! Native code correlator.
//!
//! Aligns an nmethod's instruction stream with the compiler's
//! (bci, native offset) debug anchors by a single merge-walk over both
//! offset-ordered sequences. Each instruction takes the bci of the nearest
//! anchor at or before its offset. Code before the first anchor is prologue;
//! uncovered byte ranges become explicit no-mapping entries.

use std::collections::BTreeMap;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::model::{DebugAnchor, MethodIdentity};

/// One decoded machine instruction, relative to the nmethod base address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub offset: u64,
    pub length: u64,
    /// Passed through for display only.
    pub mnemonic: String,
    pub operands: String,
}

impl Instruction {
    pub fn boundary(offset: u64, length: u64) -> Self {
        Instruction {
            offset,
            length,
            mnemonic: String::new(),
            operands: String::new(),
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DisassemblyError {
    #[error("No disassembler is available")]
    Unavailable,
    #[error("Disassembly failed at offset {offset:#x}: {message}")]
    Failed { offset: u64, message: String },
}

/// External capability turning raw bytes into instruction boundaries.
pub trait Disassembler: Send + Sync {
    fn disassemble(&self, code: &[u8], base_address: u64) -> Result<Vec<Instruction>, DisassemblyError>;
}

/// External bytecode-to-source lookup.
pub trait SourceLineTable {
    fn line_for(&self, method: &MethodIdentity, bci: u32) -> Option<u32>;
}

/// Line table recovered from the log's own scope comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorLineTable {
    method: Option<MethodIdentity>,
    lines: BTreeMap<i32, u32>,
}

impl AnchorLineTable {
    pub fn new(method: MethodIdentity, anchors: &[DebugAnchor]) -> Self {
        AnchorLineTable {
            method: Some(method),
            lines: anchors
                .iter()
                .filter_map(|a| Some((a.bci, a.line?)))
                .collect(),
        }
    }
}

impl SourceLineTable for AnchorLineTable {
    fn line_for(&self, method: &MethodIdentity, bci: u32) -> Option<u32> {
        if self.method.as_ref() != Some(method) {
            return None;
        }
        // Nearest annotated bci at or below the requested one.
        let bci = i32::try_from(bci).ok()?;
        self.lines.range(..=bci).next_back().map(|(_, line)| *line)
    }
}

/// Bytecode origin of a run of instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BciMapping {
    /// Before the first anchor.
    Prologue,
    /// Governed by one anchor offset; `first != last` when several anchors share it.
    Bytecode { first: u32, last: u32 },
    /// Compiler code with no bytecode origin, or bytes no instruction covers.
    NoMapping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub start: u64,
    pub end: u64,
    pub mapping: BciMapping,
    /// Empty for uncovered gaps.
    pub instructions: Vec<Instruction>,
    pub source_line: Option<u32>,
}

impl CorrelationEntry {
    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Non-fatal problems met while correlating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationAnomalies {
    /// Anchors superseded by a later anchor before reaching any instruction start.
    pub misaligned_anchors: u32,
    /// Anchors at or beyond the end of the instruction stream.
    pub anchors_past_end: u32,
    /// Instructions starting inside the previous instruction.
    pub overlapping_instructions: u32,
}

impl CorrelationAnomalies {
    pub fn total(&self) -> u32 {
        self.misaligned_anchors + self.anchors_past_end + self.overlapping_instructions
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationMap {
    entries: Vec<CorrelationEntry>,
    anomalies: CorrelationAnomalies,
    instruction_count: usize,
}

impl CorrelationMap {
    pub fn entries(&self) -> &[CorrelationEntry] {
        &self.entries
    }

    pub fn anomalies(&self) -> CorrelationAnomalies {
        self.anomalies
    }

    pub fn instruction_count(&self) -> usize {
        self.instruction_count
    }

    /// Entry covering native `offset`.
    pub fn entry_at(&self, offset: u64) -> Option<&CorrelationEntry> {
        let idx = self.entries.partition_point(|e| e.end <= offset);
        self.entries.get(idx).filter(|e| e.contains(offset))
    }

    pub fn mapping_at(&self, offset: u64) -> Option<BciMapping> {
        self.entry_at(offset).map(|e| e.mapping)
    }

    /// Fill `source_line` of bytecode entries from `table`.
    pub fn attach_source_lines(&mut self, method: &MethodIdentity, table: &dyn SourceLineTable) {
        for entry in &mut self.entries {
            if let BciMapping::Bytecode { first, .. } = entry.mapping {
                entry.source_line = table.line_for(method, first);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Merge-walk
// ---------------------------------------------------------------------------

/// Anchors sharing one native offset.
struct AnchorGroup {
    offset: u64,
    first: Option<u32>,
    last: Option<u32>,
}

impl AnchorGroup {
    fn mapping(&self) -> BciMapping {
        match (self.first, self.last) {
            (Some(first), Some(last)) => BciMapping::Bytecode { first, last },
            _ => BciMapping::NoMapping,
        }
    }
}

fn group_anchors(anchors: &[DebugAnchor]) -> Vec<AnchorGroup> {
    let mut sorted: Vec<&DebugAnchor> = anchors.iter().collect();
    if !sorted.windows(2).all(|w| w[0].native_offset <= w[1].native_offset) {
        sorted.sort_by_key(|a| a.native_offset);
    }
    let mut groups: Vec<AnchorGroup> = Vec::new();
    for anchor in sorted {
        let bci = u32::try_from(anchor.bci).ok();
        match groups.last_mut() {
            Some(g) if g.offset == anchor.native_offset => {
                if let Some(bci) = bci {
                    g.first = Some(g.first.map_or(bci, |f| f.min(bci)));
                    g.last = Some(g.last.map_or(bci, |l| l.max(bci)));
                }
            }
            _ => groups.push(AnchorGroup {
                offset: anchor.native_offset,
                first: bci,
                last: bci,
            }),
        }
    }
    groups
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKey {
    Prologue,
    Unanchored,
    Group(usize),
}

/// Correlate one instruction stream with its anchors.
///
/// Linear in instructions plus anchors when both arrive offset-ordered; the
/// result depends only on the inputs.
pub fn correlate(instructions: &[Instruction], anchors: &[DebugAnchor]) -> CorrelationMap {
    let mut ordered: Vec<&Instruction> = instructions.iter().collect();
    if !ordered.windows(2).all(|w| w[0].offset <= w[1].offset) {
        ordered.sort_by_key(|i| i.offset);
    }
    let groups = group_anchors(anchors);

    let mut map = CorrelationMap {
        instruction_count: ordered.len(),
        ..CorrelationMap::default()
    };
    let mut next_group = 0usize;
    let mut current: Option<usize> = None;
    let mut current_used = false;
    let mut run: Option<RunKey> = None;
    // Offset 0 is the nmethod's base; code that starts later leaves a leading gap.
    let mut covered_to: Option<u64> = (!ordered.is_empty()).then_some(0);

    for instr in ordered {
        match covered_to {
            Some(end) if instr.offset > end => {
                map.entries.push(CorrelationEntry {
                    start: end,
                    end: instr.offset,
                    mapping: BciMapping::NoMapping,
                    instructions: Vec::new(),
                    source_line: None,
                });
                run = None;
            }
            Some(end) if instr.offset < end => map.anomalies.overlapping_instructions += 1,
            _ => {}
        }

        while next_group < groups.len() && groups[next_group].offset <= instr.offset {
            if current.is_some() && !current_used {
                map.anomalies.misaligned_anchors += 1;
            }
            current = Some(next_group);
            current_used = false;
            next_group += 1;
        }
        current_used |= current.is_some();

        let (key, mapping) = match current {
            Some(g) => (RunKey::Group(g), groups[g].mapping()),
            None if groups.is_empty() => (RunKey::Unanchored, BciMapping::NoMapping),
            None => (RunKey::Prologue, BciMapping::Prologue),
        };

        match map.entries.last_mut() {
            Some(entry) if run == Some(key) => {
                entry.end = entry.end.max(instr.end());
                entry.instructions.push(instr.clone());
            }
            _ => map.entries.push(CorrelationEntry {
                start: instr.offset,
                end: instr.end(),
                mapping,
                instructions: vec![instr.clone()],
                source_line: None,
            }),
        }
        run = Some(key);
        covered_to = Some(covered_to.map_or(instr.end(), |end| end.max(instr.end())));
    }

    // Anchors never reached by an instruction start.
    let stream_end = covered_to.unwrap_or(0);
    for group in &groups[next_group..] {
        if group.offset >= stream_end {
            map.anomalies.anchors_past_end += 1;
        } else {
            map.anomalies.misaligned_anchors += 1;
        }
    }
    map
}

/// Correlate many nmethods in parallel; output order matches `jobs`.
pub fn correlate_many(jobs: &[(&[Instruction], &[DebugAnchor])]) -> Vec<CorrelationMap> {
    if jobs.len() < 2 {
        return jobs.iter().map(|(i, a)| correlate(i, a)).collect();
    }
    let workers = num_cpus::get().clamp(1, jobs.len());
    let chunk = jobs.len().div_ceil(workers);
    thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .chunks(chunk)
            .map(|part| {
                scope.spawn(move || part.iter().map(|(i, a)| correlate(i, a)).collect::<Vec<_>>())
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(maps) => maps,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(spans: &[(u64, u64)]) -> Vec<Instruction> {
        spans.iter().map(|&(o, l)| Instruction::boundary(o, l)).collect()
    }

    fn anchor(bci: i32, native_offset: u64) -> DebugAnchor {
        DebugAnchor { bci, native_offset, line: None }
    }

    fn offsets(entry: &CorrelationEntry) -> Vec<u64> {
        entry.instructions.iter().map(|i| i.offset).collect()
    }

    #[test]
    fn test_nearest_preceding_anchor() {
        let instructions = stream(&[(0, 4), (4, 4), (8, 4), (12, 8), (20, 8), (28, 4)]);
        let anchors = vec![anchor(0, 0), anchor(3, 10), anchor(3, 25)];
        let map = correlate(&instructions, &anchors);

        assert_eq!(map.anomalies(), CorrelationAnomalies::default());
        let entries = map.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(offsets(&entries[0]), vec![0, 4, 8]);
        assert_eq!(entries[0].mapping, BciMapping::Bytecode { first: 0, last: 0 });
        assert_eq!(offsets(&entries[1]), vec![12, 20]);
        assert_eq!(entries[1].mapping, BciMapping::Bytecode { first: 3, last: 3 });
        assert_eq!(offsets(&entries[2]), vec![28]);
        assert_eq!(entries[2].mapping, BciMapping::Bytecode { first: 3, last: 3 });
        assert_eq!(map.mapping_at(22), Some(BciMapping::Bytecode { first: 3, last: 3 }));
    }

    #[test]
    fn test_prologue_before_first_anchor() {
        let instructions = stream(&[(0, 4), (4, 4), (8, 4)]);
        let map = correlate(&instructions, &[anchor(5, 8)]);
        assert_eq!(map.entries()[0].mapping, BciMapping::Prologue);
        assert_eq!(offsets(&map.entries()[0]), vec![0, 4]);
        assert_eq!(map.entries()[1].mapping, BciMapping::Bytecode { first: 5, last: 5 });
    }

    #[test]
    fn test_gaps_are_explicit() {
        let instructions = stream(&[(0, 4), (8, 4)]);
        let map = correlate(&instructions, &[anchor(0, 0)]);
        let entries = map.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!((entries[1].start, entries[1].end), (4, 8));
        assert_eq!(entries[1].mapping, BciMapping::NoMapping);
        assert!(entries[1].instructions.is_empty());
        assert_eq!(entries[2].mapping, BciMapping::Bytecode { first: 0, last: 0 });
    }

    #[test]
    fn test_leading_gap_before_first_instruction() {
        let map = correlate(&stream(&[(16, 4), (20, 4)]), &[anchor(0, 16)]);
        let entries = map.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].start, entries[0].end), (0, 16));
        assert_eq!(map.mapping_at(0), Some(BciMapping::NoMapping));
        assert_eq!(map.mapping_at(20), Some(BciMapping::Bytecode { first: 0, last: 0 }));
        assert_eq!(map.instruction_count(), 2);
    }

    #[test]
    fn test_misaligned_and_trailing_anchors_are_counted() {
        let instructions = stream(&[(0, 8), (8, 4)]);
        // 2 and 5 both fall inside the first instruction; 2 never governs anything.
        let anchors = vec![anchor(0, 0), anchor(1, 2), anchor(2, 5), anchor(9, 40)];
        let map = correlate(&instructions, &anchors);
        let a = map.anomalies();
        assert_eq!(a.misaligned_anchors, 1);
        assert_eq!(a.anchors_past_end, 1);
        assert_eq!(map.entries()[1].mapping, BciMapping::Bytecode { first: 2, last: 2 });
    }

    #[test]
    fn test_same_offset_anchors_merge_into_range() {
        let instructions = stream(&[(0, 4), (4, 4)]);
        let map = correlate(&instructions, &[anchor(7, 4), anchor(3, 4), anchor(0, 0)]);
        assert_eq!(map.anomalies().total(), 0);
        assert_eq!(map.entries()[1].mapping, BciMapping::Bytecode { first: 3, last: 7 });
    }

    #[test]
    fn test_negative_bci_maps_to_nothing() {
        let instructions = stream(&[(0, 4), (4, 4)]);
        let map = correlate(&instructions, &[anchor(0, 0), anchor(-1, 4)]);
        assert_eq!(map.entries()[1].mapping, BciMapping::NoMapping);
    }

    #[test]
    fn test_no_anchors_is_unmapped() {
        let map = correlate(&stream(&[(0, 4), (4, 4)]), &[]);
        assert_eq!(map.entries().len(), 1);
        assert_eq!(map.entries()[0].mapping, BciMapping::NoMapping);
    }

    #[test]
    fn test_overlap_is_counted() {
        let map = correlate(&stream(&[(0, 6), (4, 4)]), &[anchor(0, 0)]);
        assert_eq!(map.anomalies().overlapping_instructions, 1);
        assert_eq!(map.entries().len(), 1);
        assert_eq!(map.entries()[0].end, 8);
    }

    #[test]
    fn test_deterministic_for_unsorted_input() {
        let a = correlate(&stream(&[(8, 4), (0, 4), (4, 4)]), &[anchor(2, 4), anchor(0, 0)]);
        let b = correlate(&stream(&[(0, 4), (4, 4), (8, 4)]), &[anchor(0, 0), anchor(2, 4)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_source_lines_from_anchors() {
        let method = MethodIdentity::new("Foo", "bar", "(I)V");
        let anchors = vec![
            DebugAnchor { bci: 0, native_offset: 0, line: Some(9) },
            DebugAnchor { bci: 4, native_offset: 4, line: Some(10) },
        ];
        let mut map = correlate(&stream(&[(0, 4), (4, 4)]), &anchors);
        map.attach_source_lines(&method, &AnchorLineTable::new(method.clone(), &anchors));
        assert_eq!(map.entries()[0].source_line, Some(9));
        assert_eq!(map.entries()[1].source_line, Some(10));
    }

    #[test]
    fn test_correlate_many_preserves_order() {
        let streams: Vec<Vec<Instruction>> = (0..9u64).map(|n| stream(&[(0, n + 1)])).collect();
        let anchors = vec![anchor(0, 0)];
        let jobs: Vec<(&[Instruction], &[DebugAnchor])> =
            streams.iter().map(|s| (s.as_slice(), anchors.as_slice())).collect();
        let maps = correlate_many(&jobs);
        let ends: Vec<u64> = maps.iter().map(|m| m.entries()[0].end).collect();
        assert_eq!(ends, (1..=9).collect::<Vec<u64>>());
    }
}
