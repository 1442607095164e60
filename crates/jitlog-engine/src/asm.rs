//! Printed assembly listings embedded in the log.
//!
//! Handles both shapes the VM prints: disassembler output
//! (`0x...: mnemonic operands ;comment`) and raw hex dumps printed when no
//! disassembler plugin was loaded (`0x...: 448b 5608 | 49c1 e203`). Scope
//! comments (`; - Foo::bar@4 (line 10)`) yield the debug anchors used for
//! correlation.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::correlate::Instruction;
use crate::model::{CompileId, DebugAnchor};

static HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*Compiled method \((?P<compiler>[^)]*)\)\s+(?P<stamp>\d+)\s+(?P<id>\d+)(?:\s+[%sbn!]+)*(?:\s+(?P<level>\d)\s)?",
    )
    .expect("valid header regex")
});

static DECODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Decoding compiled method (?P<addr>0x[0-9a-fA-F]+)").expect("valid decoding regex")
});

static ADDRESS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^0x(?P<addr>[0-9a-fA-F]+):\s*(?P<body>.*)$").expect("valid address regex")
});

static HEX_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]+(?:[\s|]+[0-9a-fA-F]+)*$").expect("valid hex regex")
});

static SCOPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^;\s*-\s*(?P<class>\S+)::(?P<method>[^@\s]+)@(?P<bci>-?\d+)(?:\s*\(line (?P<line>\d+)\))?")
        .expect("valid scope regex")
});

const PREFIXES: &[&str] = &[
    "lock", "rep", "repe", "repz", "repne", "repnz", "data16", "data32", "addr32", "notrack",
    "bnd", "rex", "rex.W",
];

/// Largest hex dump reassembled into code bytes when the nmethod size is unknown.
pub const MAX_CODE_SPAN: u64 = 16 << 20;

/// Title given to instructions that precede any block title.
pub const DEFAULT_BLOCK: &str = "[Entry Point]";

/// A hex dump whose addresses lie too far apart to be one method's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("hex dump spans {span} bytes, limit is {limit}")]
pub struct CodeSpanError {
    pub span: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyInstruction {
    pub address: u64,
    /// Empty for hex-dump lines.
    pub mnemonic: String,
    pub operands: String,
    /// Raw bytes of a hex-dump line.
    pub bytes: Vec<u8>,
    pub comments: Vec<String>,
}

/// A titled section of the listing (`[Verified Entry Point]`, `[Stub Code]`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyBlock {
    pub title: String,
    pub instructions: Vec<AssemblyInstruction>,
}

/// Frame reference parsed from a `; - Class::method@bci (line N)` comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFrame {
    pub class_name: String,
    pub method_name: String,
    pub bci: i32,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyMethod {
    pub compile_id: Option<CompileId>,
    pub compiler: Option<String>,
    pub level: Option<u8>,
    /// Stamp printed in the header, in milliseconds.
    pub stamp_ms: Option<u64>,
    /// Address from `Decoding compiled method 0x...`, matching the nmethod address.
    pub nmethod_address: Option<u64>,
    pub header: String,
    /// `# {method}` line, when printed.
    pub signature: Option<String>,
    /// False when the listing is a raw hex dump.
    pub disassembled: bool,
    pub blocks: Vec<AssemblyBlock>,
}

impl AssemblyMethod {
    pub fn instructions(&self) -> impl Iterator<Item = &AssemblyInstruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    /// Lowest printed address; native offsets are relative to it.
    pub fn base_address(&self) -> Option<u64> {
        self.instructions().map(|i| i.address).min()
    }

    /// Bytes from the lowest printed address to the end of the last hex-dump line.
    pub fn code_span(&self) -> u64 {
        let Some(base) = self.base_address() else {
            return 0;
        };
        self.instructions()
            .filter(|i| !i.bytes.is_empty())
            .map(|i| (i.address - base).saturating_add(i.bytes.len() as u64))
            .max()
            .unwrap_or(0)
    }

    /// Machine code reassembled from a hex dump. Empty for disassembled listings.
    ///
    /// Fails without allocating when the dump spans more than `limit` bytes.
    pub fn code_bytes(&self, limit: u64) -> Result<Vec<u8>, CodeSpanError> {
        let span = self.code_span();
        if span > limit {
            return Err(CodeSpanError { span, limit });
        }
        let Some(base) = self.base_address() else {
            return Ok(Vec::new());
        };
        let mut code = vec![0u8; span as usize];
        for instr in self.instructions().filter(|i| !i.bytes.is_empty()) {
            let start = (instr.address - base) as usize;
            code[start..start + instr.bytes.len()].copy_from_slice(&instr.bytes);
        }
        Ok(code)
    }

    /// Debug anchors from scope comments, one per annotated address.
    ///
    /// The outermost frame of each comment group (printed last) names the
    /// compiled method's own bytecode index.
    pub fn anchors(&self) -> Vec<DebugAnchor> {
        let Some(base) = self.base_address() else {
            return Vec::new();
        };
        let mut anchors: Vec<DebugAnchor> = Vec::new();
        for instr in self.instructions() {
            let Some(frame) = instr.comments.iter().filter_map(|c| parse_scope(c)).last() else {
                continue;
            };
            let native_offset = instr.address - base;
            if anchors.last().is_some_and(|a| a.native_offset == native_offset) {
                anchors.pop();
            }
            anchors.push(DebugAnchor {
                bci: frame.bci,
                native_offset,
                line: frame.line,
            });
        }
        anchors.sort_by_key(|a| a.native_offset);
        anchors
    }

    /// bci to source line of the compiled method, from scope comments.
    pub fn line_table(&self) -> BTreeMap<i32, u32> {
        self.anchors()
            .into_iter()
            .filter_map(|a| Some((a.bci, a.line?)))
            .collect()
    }

    /// Instruction boundaries of a disassembled listing, as native offsets.
    ///
    /// Lengths come from the distance to the next printed address; the last
    /// instruction runs to `code_end` (an offset) when known, else one byte.
    pub fn listing(&self, code_end: Option<u64>) -> Vec<Instruction> {
        let Some(base) = self.base_address() else {
            return Vec::new();
        };
        let mut printed: Vec<&AssemblyInstruction> =
            self.instructions().filter(|i| !i.mnemonic.is_empty()).collect();
        printed.sort_by_key(|i| i.address);
        printed.dedup_by_key(|i| i.address);

        let mut out = Vec::with_capacity(printed.len());
        for (idx, instr) in printed.iter().enumerate() {
            let offset = instr.address - base;
            let length = match printed.get(idx + 1) {
                Some(next) => next.address - instr.address,
                None => code_end
                    .filter(|end| *end > offset)
                    .map(|end| end - offset)
                    .unwrap_or(1),
            };
            out.push(Instruction {
                offset,
                length,
                mnemonic: instr.mnemonic.clone(),
                operands: instr.operands.clone(),
            });
        }
        out
    }
}

pub fn parse_scope(comment: &str) -> Option<ScopeFrame> {
    let caps = SCOPE.captures(comment.trim_start())?;
    Some(ScopeFrame {
        class_name: caps["class"].to_string(),
        method_name: caps["method"].to_string(),
        bci: caps["bci"].parse().ok()?,
        line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
    })
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Split text holding several listings into one chunk per compiled method.
pub fn split_methods(text: &str) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut seen_code = false;
    let mut seen_header = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        let is_header = trimmed.starts_with("Compiled method (");
        let is_decoding = trimmed.starts_with("Decoding compiled method");
        let starts_new = (is_header && (seen_header || seen_code)) || (is_decoding && seen_code);
        if starts_new && !current.trim().is_empty() {
            chunks.push(std::mem::take(&mut current));
            seen_code = false;
            seen_header = false;
        }
        seen_header |= is_header;
        seen_code |= trimmed.starts_with("0x");
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

fn is_disassembly(text: &str) -> bool {
    if text.contains("[Disassembling for mach") {
        return true;
    }
    text.lines().any(|line| {
        ADDRESS_LINE.captures(line.trim_start()).is_some_and(|caps| {
            let body = strip_comment(&caps["body"], true).0;
            !body.is_empty() && !HEX_BODY.is_match(body)
        })
    })
}

/// Split `body` into (code, comment). Hex dumps also treat `#` as a comment.
fn strip_comment(body: &str, hex: bool) -> (&str, Option<&str>) {
    let at = if hex {
        body.find([';', '#'])
    } else {
        body.find(';')
    };
    match at {
        Some(i) => (body[..i].trim(), Some(body[i..].trim())),
        None => (body.trim(), None),
    }
}

fn hex_bytes(words: &str) -> Option<Vec<u8>> {
    let digits: String = words.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}

fn split_mnemonic(code: &str) -> (String, String) {
    let mut rest = code.trim();
    let mut mnemonic = String::new();
    loop {
        let (token, tail) = match rest.find(char::is_whitespace) {
            Some(i) => (&rest[..i], rest[i..].trim_start()),
            None => (rest, ""),
        };
        if token.is_empty() {
            break;
        }
        if !mnemonic.is_empty() {
            mnemonic.push(' ');
        }
        mnemonic.push_str(token);
        rest = tail;
        if !PREFIXES.contains(&token) {
            break;
        }
    }
    (mnemonic, rest.to_string())
}

struct ListingBuilder {
    method: AssemblyMethod,
    block: Option<AssemblyBlock>,
}

impl ListingBuilder {
    fn block_mut(&mut self) -> &mut AssemblyBlock {
        self.block.get_or_insert_with(|| AssemblyBlock {
            title: DEFAULT_BLOCK.to_string(),
            instructions: Vec::new(),
        })
    }

    fn last_instruction(&mut self) -> Option<&mut AssemblyInstruction> {
        self.block.as_mut()?.instructions.last_mut()
    }

    fn start_block(&mut self, title: &str) {
        if let Some(block) = self.block.take() {
            self.method.blocks.push(block);
        }
        self.block = Some(AssemblyBlock {
            title: title.to_string(),
            instructions: Vec::new(),
        });
    }

    fn push(&mut self, instr: AssemblyInstruction) {
        // Comment-only lines share the address of the instruction they describe.
        if let Some(last) = self.last_instruction() {
            if last.address == instr.address {
                if last.mnemonic.is_empty() {
                    last.mnemonic = instr.mnemonic;
                    last.operands = instr.operands;
                }
                last.bytes.extend(instr.bytes);
                last.comments.extend(instr.comments);
                return;
            }
        }
        self.block_mut().instructions.push(instr);
    }

    fn finish(mut self) -> AssemblyMethod {
        if let Some(block) = self.block.take() {
            self.method.blocks.push(block);
        }
        self.method
    }
}

/// Parse one compiled method's listing.
pub fn parse(text: &str) -> AssemblyMethod {
    let disassembled = is_disassembly(text);
    let mut builder = ListingBuilder {
        method: AssemblyMethod {
            disassembled,
            ..AssemblyMethod::default()
        },
        block: None,
    };
    let mut header = String::new();
    let lines: Vec<String> = text.lines().map(|l| l.replace("&apos;", "'")).collect();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        i += 1;
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = HEADER.captures(line) {
            builder.method.compiler = Some(caps["compiler"].to_string());
            builder.method.stamp_ms = caps["stamp"].parse().ok();
            builder.method.compile_id = caps["id"].parse().ok();
            builder.method.level = caps.name("level").and_then(|m| m.as_str().parse().ok());
        }
        if let Some(caps) = DECODING.captures(line) {
            let digits = caps["addr"].trim_start_matches("0x");
            builder.method.nmethod_address = u64::from_str_radix(digits, 16).ok();
        }

        if line.starts_with('#') {
            if line.starts_with("# {method}") {
                builder.method.signature = Some(line.to_string());
            }
            header.push_str(line);
            header.push('\n');
        } else if line.starts_with('[') {
            // Constant pools sit inside the entry block.
            if line != "[Constants]" && !line.starts_with("[Disassembling") {
                builder.start_block(line);
            }
        } else if line.starts_with(';') {
            if let Some(last) = builder.last_instruction() {
                last.comments.push(line.to_string());
            }
        } else if let Some(caps) = ADDRESS_LINE.captures(line) {
            let Ok(address) = u64::from_str_radix(&caps["addr"], 16) else {
                continue;
            };
            let mut body = caps["body"].to_string();
            // Instruction text wrapped onto the next physical line.
            if body.is_empty() {
                if let Some(next) = lines.get(i).map(|l| l.trim()) {
                    if !next.is_empty() && !next.starts_with("0x") && !next.starts_with('[') {
                        body = next.to_string();
                        i += 1;
                    }
                }
            }
            let (code, comment) = strip_comment(&body, !disassembled);
            let comments: Vec<String> = comment.map(str::to_string).into_iter().collect();
            let instr = if disassembled {
                let (mnemonic, operands) = split_mnemonic(code);
                AssemblyInstruction {
                    address,
                    mnemonic,
                    operands,
                    bytes: Vec::new(),
                    comments,
                }
            } else {
                AssemblyInstruction {
                    address,
                    mnemonic: String::new(),
                    operands: String::new(),
                    bytes: hex_bytes(code).unwrap_or_default(),
                    comments,
                }
            };
            builder.push(instr);
        } else if builder.method.instruction_count() == 0 && builder.block.is_none() {
            header.push_str(line);
            header.push('\n');
        } else if let Some(last) = builder.last_instruction() {
            // Continuation of a wrapped comment.
            if let Some(comment) = last.comments.last_mut() {
                comment.push(' ');
                comment.push_str(line);
            }
        }
    }

    let mut method = builder.finish();
    method.header = header;
    method
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISASSEMBLED: &str = "\
Compiled method (c2)     255    9       4       Foo::bar (17 bytes)
Decoding compiled method 0x00007f0c1d11a110:
Code:
[Disassembling for mach='i386:x86-64']
[Entry Point]
[Constants]
  # {method} {0x00007f0c0c3f3c80} &apos;bar&apos; &apos;(I)V&apos; in &apos;Foo&apos;
  # parm0:    rdx       = int
  0x00007f0c1d11a200: mov    0x8(%rsi),%r10d
  0x00007f0c1d11a204: cmp    %r10,%rax
  0x00007f0c1d11a208: jne    0x00007f0c1d045b60  ;   {runtime_call}
[Verified Entry Point]
  0x00007f0c1d11a20c: lock cmpxchg %rsi,(%rdx)
  0x00007f0c1d11a210: callq  0x00007f0c1d045e20  ; OopMap{off=44}
                                                ;*invokevirtual baz
                                                ; - Foo::baz@2 (line 20)
                                                ; - Foo::bar@4 (line 10)
  0x00007f0c1d11a218:
      add    $0x10,%rsp
  0x00007f0c1d11a21c: retq                      ;*return
                                                ; - Foo::bar@16 (line 12)
";

    #[test]
    fn test_parse_disassembled_listing() {
        let method = parse(DISASSEMBLED);
        assert!(method.disassembled);
        assert_eq!(method.compile_id, Some(9));
        assert_eq!(method.compiler.as_deref(), Some("c2"));
        assert_eq!(method.level, Some(4));
        assert_eq!(method.nmethod_address, Some(0x7f0c1d11a110));
        assert!(method.signature.as_deref().unwrap().contains("'bar'"));

        let titles: Vec<&str> = method.blocks.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["[Entry Point]", "[Verified Entry Point]"]);
        assert_eq!(method.instruction_count(), 7);

        let lock = &method.blocks[1].instructions[0];
        assert_eq!(lock.mnemonic, "lock cmpxchg");
        assert_eq!(lock.operands, "%rsi,(%rdx)");

        let wrapped = &method.blocks[1].instructions[2];
        assert_eq!(wrapped.mnemonic, "add");
        assert_eq!(wrapped.operands, "$0x10,%rsp");
    }

    #[test]
    fn test_anchors_use_outermost_frame() {
        let method = parse(DISASSEMBLED);
        assert_eq!(method.base_address(), Some(0x7f0c1d11a200));
        let anchors = method.anchors();
        assert_eq!(
            anchors,
            vec![
                DebugAnchor { bci: 4, native_offset: 0x10, line: Some(10) },
                DebugAnchor { bci: 16, native_offset: 0x1c, line: Some(12) },
            ]
        );
        assert_eq!(method.line_table().get(&16), Some(&12));
    }

    #[test]
    fn test_listing_boundaries() {
        let listing = parse(DISASSEMBLED).listing(Some(0x20));
        let spans: Vec<(u64, u64)> = listing.iter().map(|i| (i.offset, i.length)).collect();
        assert_eq!(
            spans,
            vec![(0, 4), (4, 4), (8, 4), (0xc, 4), (0x10, 8), (0x18, 4), (0x1c, 4)]
        );
        assert_eq!(parse(DISASSEMBLED).listing(None).last().unwrap().length, 1);
    }

    #[test]
    fn test_parse_hex_dump() {
        let text = "\
Compiled method (c1)     120    5       1       Foo::bar (17 bytes)
[Entry Point]
  0x0000000000001000: 448b 5608 | 49c1 e203
  0x0000000000001008: ;*iload_1
  ; - Foo::bar@0 (line 9)
  0x0000000000001008: 4c3b d00f
";
        let method = parse(text);
        assert!(!method.disassembled);
        assert_eq!(method.compile_id, Some(5));
        assert_eq!(method.level, Some(1));
        assert_eq!(
            method.code_bytes(MAX_CODE_SPAN).unwrap(),
            vec![0x44, 0x8b, 0x56, 0x08, 0x49, 0xc1, 0xe2, 0x03, 0x4c, 0x3b, 0xd0, 0x0f]
        );
        assert_eq!(
            method.anchors(),
            vec![DebugAnchor { bci: 0, native_offset: 8, line: Some(9) }]
        );
        assert!(method.listing(None).is_empty());
    }

    #[test]
    fn test_scattered_hex_dump_is_refused() {
        let text = "\
Compiled method (c1)     120    5       1       Foo::bar (17 bytes)
[Entry Point]
  0x0000000000001000: 448b 5608
  0xfffffffffffff000: 4c3b d00f
";
        let method = parse(text);
        assert_eq!(method.instruction_count(), 2);
        assert_eq!(method.code_span(), 0xfffffffffffff000 - 0x1000 + 4);
        let err = method.code_bytes(MAX_CODE_SPAN).unwrap_err();
        assert_eq!(err.limit, MAX_CODE_SPAN);
    }

    #[test]
    fn test_osr_header_flags() {
        let method = parse("Compiled method (c2)     300   12 %     4       Foo::loop @ 5 (40 bytes)\n");
        assert_eq!(method.compile_id, Some(12));
        assert_eq!(method.level, Some(4));
    }

    #[test]
    fn test_split_methods() {
        let text = format!("{}{}", DISASSEMBLED, DISASSEMBLED.replace("    9 ", "   10 "));
        let chunks = split_methods(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(parse(&chunks[1]).compile_id, Some(10));
    }

    #[test]
    fn test_scope_comment() {
        let frame = parse_scope("; - java.lang.String::hashCode@-1 (line 1500)").unwrap();
        assert_eq!(frame.class_name, "java.lang.String");
        assert_eq!(frame.method_name, "hashCode");
        assert_eq!(frame.bci, -1);
        assert_eq!(frame.line, Some(1500));
        assert!(parse_scope(";*invokevirtual baz").is_none());
    }
}
