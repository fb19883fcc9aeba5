//! Debug information consumed by the kernel: source lines for fault
//! reports and symbol names for user backtraces. Producing it (ELF and
//! DWARF parsing) happens outside the kernel core.

use alloc::format;
use alloc::string::String;

/// Where a program counter came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation<'a> {
    pub dir: &'a str,
    pub file: &'a str,
    pub line: u64,
}

pub trait LineTable {
    fn locate(&self, pc: u64) -> Option<SourceLocation<'_>>;

    /// Text of the given line, without its newline.
    fn source_line(&self, loc: &SourceLocation<'_>) -> Option<String>;
}

pub trait SymbolTable {
    /// Name of the function containing `addr`.
    fn symbol_for(&self, addr: u64) -> Option<&str>;
}

/// Stand-in when no debug information was loaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDebugInfo;

impl LineTable for NoDebugInfo {
    fn locate(&self, _pc: u64) -> Option<SourceLocation<'_>> {
        None
    }

    fn source_line(&self, _loc: &SourceLocation<'_>) -> Option<String> {
        None
    }
}

impl SymbolTable for NoDebugInfo {
    fn symbol_for(&self, _addr: u64) -> Option<&str> {
        None
    }
}

/// "Runtime error at dir/file:line" plus the offending line when it can be read.
///
/// Returns `None` when `pc` has no mapping; a missing source file only drops
/// the second line.
pub fn error_line_report(lines: &dyn LineTable, pc: u64) -> Option<String> {
    let loc = lines.locate(pc)?;
    let mut report = format!("Runtime error at {}/{}:{}\n", loc.dir, loc.file, loc.line);
    if let Some(text) = lines.source_line(&loc) {
        report.push_str(&text);
        report.push('\n');
    }
    Some(report)
}
