//! Line-preserving source normalization.
//!
//! tree-sitter's C grammar has no notion of kernel macros. Before parsing,
//! three constructs are rewritten into plain C the grammar accepts:
//!
//! - `SYSCALL_DEFINEn(name, ...)` becomes `long __declscope_sys_name(...)`.
//!   Both `type name` and the kernel's `type, name` argument styles work.
//! - `case lo ... hi:` becomes `case __declscope_case_range(lo, hi):`.
//! - Sparse and section annotations (`__user`, `__init`, ...) are blanked.
//!
//! Comments, string and character literals and preprocessor lines are
//! copied untouched. The number of newlines never changes, so line numbers
//! reported against the normalized text match the original file.

/// Prefix of the function a `SYSCALL_DEFINEn` expands to.
pub const SYSCALL_PREFIX: &str = "__declscope_sys_";

/// Callee name standing in for a GNU case range.
pub const CASE_RANGE_MARKER: &str = "__declscope_case_range";

/// Annotations with no meaning to the analysis.
const ANNOTATIONS: &[&str] = &[
    "__user",
    "__kernel",
    "__iomem",
    "__rcu",
    "__force",
    "__percpu",
    "__must_check",
    "__always_inline",
    "noinline",
    "asmlinkage",
    "__init",
    "__exit",
    "__cold",
    "__maybe_unused",
    "notrace",
];

/// A rewrite of `source[start..resume]` into `text`.
struct Rewrite {
    start: usize,
    text: String,
    resume: usize,
}

pub fn normalize(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len() + 64);
    let mut copied = 0;
    let mut i = 0;
    let mut line_start = true;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                line_start = true;
                i += 1;
            }
            b' ' | b'\t' | b'\r' | 0x0c => i += 1,
            b'#' if line_start => i = skip_directive(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            quote @ (b'"' | b'\'') => {
                line_start = false;
                i = skip_quoted(bytes, i, quote);
            }
            c if c.is_ascii_digit() => {
                line_start = false;
                i = ident_end(bytes, i);
            }
            c if is_ident_start(c) => {
                line_start = false;
                let end = ident_end(bytes, i);
                let word = &source[i..end];

                let rewrite = if let Some(arity) = syscall_arity(word) {
                    rewrite_syscall(source, i, end, arity)
                } else if word == "case" {
                    rewrite_case_range(source, end)
                } else if ANNOTATIONS.contains(&word) {
                    Some(Rewrite {
                        start: i,
                        text: " ".repeat(end - i),
                        resume: end,
                    })
                } else {
                    None
                };

                match rewrite {
                    Some(rw) => {
                        out.push_str(&source[copied..rw.start]);
                        out.push_str(&rw.text);
                        copied = rw.resume;
                        i = rw.resume;
                    }
                    None => i = end,
                }
            }
            _ => {
                line_start = false;
                i += 1;
            }
        }
    }
    out.push_str(&source[copied..]);
    out
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn ident_end(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    i
}

/// Stops at the newline ending the directive, honoring `\` continuations.
fn skip_directive(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if bytes.get(i + 1) == Some(&b'\n') => i += 2,
            b'\\' if bytes.get(i + 1) == Some(&b'\r') && bytes.get(i + 2) == Some(&b'\n') => {
                i += 3
            }
            b'\n' => return i,
            _ => i += 1,
        }
    }
    i
}

fn skip_line_comment(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(bytes: &[u8], i: usize) -> usize {
    let mut j = i + 2;
    while j + 1 < bytes.len() {
        if bytes[j] == b'*' && bytes[j + 1] == b'/' {
            return j + 2;
        }
        j += 1;
    }
    bytes.len()
}

/// Skips a string or character literal; an unterminated one ends at the
/// line break.
fn skip_quoted(bytes: &[u8], i: usize, quote: u8) -> usize {
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' => return j,
            c if c == quote => return j + 1,
            _ => j += 1,
        }
    }
    bytes.len()
}

fn syscall_arity(word: &str) -> Option<usize> {
    let digit = word.strip_prefix("SYSCALL_DEFINE")?;
    match digit.parse::<usize>() {
        Ok(n) if n <= 6 => Some(n),
        _ => None,
    }
}

/// Finds the `)` matching the `(` at `open` and the depth-0 commas between.
fn split_parenthesized(bytes: &[u8], open: usize) -> Option<(usize, Vec<usize>)> {
    let mut depth = 0usize;
    let mut commas = Vec::new();
    let mut j = open;
    while j < bytes.len() {
        match bytes[j] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((j, commas));
                }
            }
            b',' if depth == 1 => commas.push(j),
            quote @ (b'"' | b'\'') => {
                j = skip_quoted(bytes, j, quote);
                continue;
            }
            b'/' if bytes.get(j + 1) == Some(&b'*') => {
                j = skip_block_comment(bytes, j);
                continue;
            }
            _ => {}
        }
        j += 1;
    }
    None
}

fn rewrite_syscall(source: &str, start: usize, ident_end: usize, arity: usize) -> Option<Rewrite> {
    let bytes = source.as_bytes();
    let mut open = ident_end;
    while open < bytes.len() && bytes[open].is_ascii_whitespace() {
        open += 1;
    }
    if bytes.get(open) != Some(&b'(') {
        return None;
    }
    let (close, commas) = split_parenthesized(bytes, open)?;

    let mut bounds = Vec::with_capacity(commas.len() + 2);
    bounds.push(open + 1);
    bounds.extend(commas.iter().map(|c| c + 1));
    let mut parts: Vec<&str> = Vec::with_capacity(bounds.len());
    for (k, &from) in bounds.iter().enumerate() {
        let to = commas.get(k).copied().unwrap_or(close);
        parts.push(&source[from..to]);
    }

    // The parameter text is emitted as-is, so annotations inside it are
    // blanked here rather than by the main scan.
    let parts: Vec<String> = parts.iter().map(|p| blank_annotations(p)).collect();
    let name = parts[0].trim();
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return None;
    }
    let params = &parts[1..];

    let mut text = format!("long {}{}(", SYSCALL_PREFIX, name);
    // Keep line breaks that sat between the macro and the first argument.
    let head_newlines = source[start..open + 1].matches('\n').count() + parts[0].matches('\n').count();
    text.push_str(&"\n".repeat(head_newlines));

    if params.iter().all(|p| p.trim().is_empty()) {
        text.push_str("void");
        for p in params {
            text.push_str(&"\n".repeat(p.matches('\n').count()));
        }
    } else if arity > 0 && params.len() == 2 * arity && is_kernel_pairs(params) {
        for (k, pair) in params.chunks(2).enumerate() {
            if k > 0 {
                text.push(',');
            }
            text.push_str(&pair[0]);
            text.push(' ');
            text.push_str(&pair[1]);
        }
    } else {
        text.push_str(&params.join(","));
    }
    text.push(')');

    Some(Rewrite {
        start,
        text,
        resume: close + 1,
    })
}

/// `type, name` pairs: every second argument is a lone identifier and the
/// argument before it is not empty.
fn is_kernel_pairs(params: &[String]) -> bool {
    params.chunks(2).all(|pair| {
        let ty = pair[0].trim();
        let name = pair[1].trim();
        !ty.is_empty()
            && !name.is_empty()
            && is_ident_start(name.as_bytes()[0])
            && ident_end(name.as_bytes(), 0) == name.len()
    })
}

fn blank_annotations(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if is_ident_start(bytes[i]) {
            let end = ident_end(bytes, i);
            if ANNOTATIONS.contains(&&text[i..end]) {
                out.push_str(&text[copied..i]);
                out.push_str(&" ".repeat(end - i));
                copied = end;
            }
            i = end;
        } else if bytes[i].is_ascii_digit() {
            i = ident_end(bytes, i);
        } else {
            i += 1;
        }
    }
    out.push_str(&text[copied..]);
    out
}

/// Rewrites `lo ... hi` between `case` and its `:`. Returns `None` for a
/// plain label.
fn rewrite_case_range(source: &str, after_case: usize) -> Option<Rewrite> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut pending_ternary = 0usize;
    let mut ellipsis = None;
    let mut j = after_case;

    let colon = loop {
        let b = *bytes.get(j)?;
        match b {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.checked_sub(1)?,
            b';' | b'{' | b'}' => return None,
            quote @ (b'"' | b'\'') => {
                j = skip_quoted(bytes, j, quote);
                continue;
            }
            b'/' if bytes.get(j + 1) == Some(&b'*') => {
                j = skip_block_comment(bytes, j);
                continue;
            }
            b'/' if bytes.get(j + 1) == Some(&b'/') => {
                j = skip_line_comment(bytes, j);
                continue;
            }
            b'?' => pending_ternary += 1,
            b':' if depth == 0 && pending_ternary > 0 => pending_ternary -= 1,
            b':' if depth == 0 => break j,
            b'.' if depth == 0 && bytes[j..].starts_with(b"...") => {
                ellipsis.get_or_insert(j);
                j += 3;
                continue;
            }
            _ => {}
        }
        j += 1;
    };

    let dots = ellipsis?;
    let lo = &source[after_case..dots];
    let hi = &source[dots + 3..colon];
    Some(Rewrite {
        start: after_case,
        text: format!(" {}({},{})", CASE_RANGE_MARKER, lo, hi),
        resume: colon,
    })
}
