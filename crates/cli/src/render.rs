//! Plain-text reports.

use std::fmt::Write;

use anatomist::ExtractionResult;
use common::{ResourceFact, SyscallDefinition};

const RULE: &str = "+------------------------------------------+";

fn boxed_title(out: &mut String, title: &str) {
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "| {:<40} |", title);
    let _ = writeln!(out, "{}", RULE);
}

fn boxed_row(out: &mut String, label: &str, value: usize) {
    let _ = writeln!(out, "| {:<15}: {:>23} |", label, value);
}

fn signature(definition: &SyscallDefinition) -> String {
    let args: Vec<String> = definition
        .args
        .iter()
        .map(|p| format!("{} {}", p.ty, p.name))
        .collect();
    format!("{}({})", definition.name, args.join(", "))
}

pub fn extraction(result: &ExtractionResult) -> String {
    let stats = &result.stats;
    let mut out = String::new();
    boxed_title(&mut out, "DECLSCOPE EXTRACT");
    boxed_row(&mut out, "Files", stats.files);
    boxed_row(&mut out, "Parse errors", stats.files_with_errors);
    boxed_row(&mut out, "Functions", stats.attribution.functions);
    boxed_row(&mut out, "Syscalls", stats.attribution.syscalls);
    boxed_row(&mut out, "Call edges", stats.attribution.call_edges);
    boxed_row(&mut out, "Unresolved", stats.attribution.unresolved_calls);
    boxed_row(&mut out, "Facts", stats.attribution.facts);
    boxed_row(&mut out, "Diagnostics", result.diagnostics.len());
    let _ = writeln!(out, "{}", RULE);

    if result.syscalls.is_empty() {
        let _ = writeln!(out, "No syscalls found.");
    } else {
        let _ = writeln!(out, "\nSYSCALLS:");
        for report in &result.syscalls {
            let _ = write!(
                out,
                "  {}:{} - {} [{} facts]",
                report.definition.file_path,
                report.definition.line,
                signature(&report.definition),
                report.fact_count
            );
            if !report.helpers.is_empty() {
                let _ = write!(out, " helpers: {}", report.helpers.join(", "));
            }
            let _ = writeln!(out);
        }
    }

    if !result.facts.is_empty() {
        let _ = writeln!(out, "\nFACTS:");
        for fact in &result.facts {
            let _ = writeln!(out, "  {}", fact);
        }
    }

    if !result.diagnostics.is_empty() {
        let _ = writeln!(out, "\nDIAGNOSTICS:");
        for diagnostic in &result.diagnostics {
            let _ = writeln!(out, "  {}", diagnostic);
        }
    }
    out
}

/// Facts read back from a store.
pub fn stored(facts: &[ResourceFact], total: usize) -> String {
    let mut out = String::new();
    boxed_title(&mut out, "DECLSCOPE STORE");
    boxed_row(&mut out, "Stored facts", total);
    boxed_row(&mut out, "Shown", facts.len());
    let _ = writeln!(out, "{}", RULE);
    if facts.is_empty() {
        let _ = writeln!(out, "No facts.");
    }
    for fact in facts {
        let _ = writeln!(out, "  {}", fact);
    }
    out
}
