//! # Fact IR
//!
//! The per-function summaries produced by the C front end and the
//! per-syscall facts the attribution pass derives from them.
//!
//! **Scope paths**: every event carries the chain of `switch` branches that
//! must be taken to reach it, outermost first. An empty path means the
//! event is unconditional within its function.
//!
//! **Origins**: a branch records what its `switch` dispatches on. When the
//! discriminant is a parameter, the origin keeps the parameter index so the
//! branch can be rebased onto a caller's arguments.

use std::fmt;

use forge::CInt;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::FactKind;

/// One bound of a case label: the source text plus its value when every
/// identifier in it resolved.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct CaseValue {
    pub expr: String,
    pub value: Option<CInt>,
}

impl CaseValue {
    pub fn new(expr: impl Into<String>, value: Option<CInt>) -> Self {
        Self {
            expr: expr.into(),
            value,
        }
    }
}

impl fmt::Display for CaseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(tag = "label", rename_all = "snake_case")]
#[rkyv(derive(Debug))]
pub enum CaseLabel {
    /// `default:`
    Default,
    /// `case X:`
    Value { value: CaseValue },
    /// GNU range `case lo ... hi:`, inclusive on both ends.
    Range { lo: CaseValue, hi: CaseValue },
}

impl CaseLabel {
    pub fn value(expr: impl Into<String>, value: Option<CInt>) -> Self {
        CaseLabel::Value {
            value: CaseValue::new(expr, value),
        }
    }

    /// Whether `v` selects this label. `None` when the label is `default`
    /// or symbolic.
    pub fn matches(&self, v: CInt) -> Option<bool> {
        match self {
            CaseLabel::Default => None,
            CaseLabel::Value { value } => Some(value.value?.compare(v).is_eq()),
            CaseLabel::Range { lo, hi } => {
                let (lo, hi) = (lo.value?, hi.value?);
                Some(lo.compare(v).is_le() && hi.compare(v).is_ge())
            }
        }
    }
}

impl fmt::Display for CaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseLabel::Default => f.write_str("default"),
            CaseLabel::Value { value } => write!(f, "{}", value),
            CaseLabel::Range { lo, hi } => write!(f, "{} ... {}", lo, hi),
        }
    }
}

/// What a `switch` (or a call argument) is derived from.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(tag = "origin", rename_all = "snake_case")]
#[rkyv(derive(Debug))]
pub enum ArgOrigin {
    /// The owning function's parameter at `index` (0-based).
    Param { index: u32, name: String },
    /// Anything else, kept as source text.
    Expr { text: String },
}

impl ArgOrigin {
    pub fn expr(text: impl Into<String>) -> Self {
        ArgOrigin::Expr { text: text.into() }
    }
}

impl fmt::Display for ArgOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgOrigin::Param { index, name } => write!(f, "{}(arg{})", name, index),
            ArgOrigin::Expr { text } => f.write_str(text),
        }
    }
}

/// One `switch` branch on the way to an event.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct ScopeStep {
    /// Function containing the `switch`.
    pub function: String,
    pub origin: ArgOrigin,
    /// Labels entering the branch; fallthrough merges several.
    pub labels: Vec<CaseLabel>,
}

impl ScopeStep {
    /// Re-expresses a callee-relative step in terms of the caller, given the
    /// call site's argument bindings. Parameters the call site does not pass
    /// become opaque.
    pub fn rebased(&self, args: &[ArgOrigin]) -> ScopeStep {
        let origin = match &self.origin {
            ArgOrigin::Param { index, name } => match args.get(*index as usize) {
                Some(bound) => bound.clone(),
                None => ArgOrigin::expr(name.clone()),
            },
            other => other.clone(),
        };
        ScopeStep {
            function: self.function.clone(),
            origin,
            labels: self.labels.clone(),
        }
    }
}

impl fmt::Display for ScopeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {{", self.origin)?;
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", label)?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct Param {
    pub ty: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// A call the resource rules recognize.
    Resource { kind: FactKind, call: String },
    /// Any other direct call, with what each argument is derived from.
    Call {
        callee: String,
        args: Vec<ArgOrigin>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct Event {
    pub kind: EventKind,
    pub path: Vec<ScopeStep>,
    pub line: u32,
}

/// One `switch` statement and the label sets of its branches.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct SwitchScope {
    pub origin: ArgOrigin,
    pub line: u32,
    /// Branches enclosing the `switch`, outermost first.
    pub path: Vec<ScopeStep>,
    /// Labels of each branch that has statements, in source order.
    pub branches: Vec<Vec<CaseLabel>>,
}

impl SwitchScope {
    /// Every label value the switch dispatches on, ranges excluded.
    pub fn values(&self) -> impl Iterator<Item = &CaseValue> + '_ {
        self.branches.iter().flatten().filter_map(|label| match label {
            CaseLabel::Value { value } => Some(value),
            _ => None,
        })
    }
}

/// Everything attribution needs to know about one function definition.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct FunctionSummary {
    /// Symbol name. Syscalls use the kernel's `sys_<name>` symbol.
    pub name: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub params: Vec<Param>,
    pub is_static: bool,
    /// Set for `SYSCALL_DEFINEn` bodies.
    pub syscall: Option<String>,
    pub events: Vec<Event>,
    pub switches: Vec<SwitchScope>,
}

impl FunctionSummary {
    pub fn is_syscall(&self) -> bool {
        self.syscall.is_some()
    }

    pub fn param_index(&self, name: &str) -> Option<u32> {
        self.params
            .iter()
            .position(|p| p.name == name)
            .map(|i| i as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct SyscallDefinition {
    pub name: String,
    pub args: Vec<Param>,
    pub file_path: String,
    pub line: u32,
}

impl SyscallDefinition {
    pub fn from_summary(summary: &FunctionSummary) -> Option<Self> {
        Some(Self {
            name: summary.syscall.clone()?,
            args: summary.params.clone(),
            file_path: summary.file_path.clone(),
            line: summary.start_line,
        })
    }
}

/// A resource operation reachable from a syscall, with the branch path
/// that gates it and the call chain leading to it.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct ResourceFact {
    pub syscall: String,
    pub kind: FactKind,
    /// Name of the recognized call (`alloc_fd`, `__fget_light`, ...).
    pub call: String,
    pub path: Vec<ScopeStep>,
    /// Functions from the syscall body down to the one containing the call.
    pub via: Vec<String>,
    pub file_path: String,
    pub line: u32,
}

impl ResourceFact {
    pub fn is_unconditional(&self) -> bool {
        self.path.is_empty()
    }

    /// `true` when some step of the path is entered through `label_expr`.
    pub fn gated_by(&self, label_expr: &str) -> bool {
        self.path.iter().any(|step| {
            step.labels.iter().any(|label| match label {
                CaseLabel::Value { value } => value.expr == label_expr,
                CaseLabel::Range { lo, hi } => lo.expr == label_expr || hi.expr == label_expr,
                CaseLabel::Default => label_expr == "default",
            })
        })
    }
}

impl fmt::Display for ResourceFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} `{}`", self.syscall, self.kind, self.call)?;
        if !self.path.is_empty() {
            f.write_str(" when ")?;
            for (i, step) in self.path.iter().enumerate() {
                if i > 0 {
                    f.write_str(" && ")?;
                }
                write!(f, "{}", step)?;
            }
        }
        if self.via.len() > 1 {
            write!(f, " via {}", self.via.join(" -> "))?;
        }
        write!(f, " ({}:{})", self.file_path, self.line)
    }
}

/// A macro or enumerator that evaluated to an integer.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct ConstFact {
    pub name: String,
    pub expr: String,
    pub value: CInt,
    pub file_path: String,
}

/// A non-fatal problem tied to a source location.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct Diagnostic {
    pub file_path: String,
    pub line: u32,
    pub function: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_path, self.line)?;
        if let Some(function) = &self.function {
            write!(f, " in {}", function)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Everything extracted from one `.c` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct TranslationUnit {
    pub file_path: String,
    pub functions: Vec<FunctionSummary>,
    pub consts: Vec<ConstFact>,
    pub diagnostics: Vec<Diagnostic>,
    /// tree-sitter had to recover from syntax errors somewhere in the file.
    pub has_parse_errors: bool,
}

impl TranslationUnit {
    pub fn syscalls(&self) -> impl Iterator<Item = SyscallDefinition> + '_ {
        self.functions.iter().filter_map(SyscallDefinition::from_summary)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSummary> {
        self.functions.iter().find(|f| f.name == name)
    }
}
