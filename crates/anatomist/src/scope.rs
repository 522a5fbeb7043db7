//! Control-scope walker over one function body.
//!
//! Produces the ordered [`Event`]s of a function: every resource call and
//! every ordinary call, each tagged with the stack of `switch` branches
//! enclosing it. Case labels are evaluated against the translation unit's
//! [`ConstEnv`]; a label that cannot be evaluated is skipped with a
//! [`Diagnostic`] and does not stop the walk.

use common::{
    ArgOrigin, CaseLabel, CaseValue, Diagnostic, Event, EventKind, Param, ScopeStep, SwitchScope,
};
use forge::{ConstEnv, ConstantEvalError};
use tracing::warn;
use tree_sitter::Node;

use crate::classify::{classify_call, Classifier};
use crate::shim::CASE_RANGE_MARKER;

/// Per-file state shared by every function walk.
#[derive(Clone, Copy)]
pub struct WalkContext<'a> {
    pub source: &'a [u8],
    pub env: &'a ConstEnv,
    pub classifiers: &'a [Box<dyn Classifier>],
    pub file_path: &'a str,
}

#[derive(Debug, Default)]
pub struct WalkOutput {
    pub events: Vec<Event>,
    pub switches: Vec<SwitchScope>,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct ScopeWalker<'a> {
    ctx: WalkContext<'a>,
    function: &'a str,
    params: &'a [Param],
    path: Vec<ScopeStep>,
    out: WalkOutput,
}

impl<'a> ScopeWalker<'a> {
    pub fn new(ctx: WalkContext<'a>, function: &'a str, params: &'a [Param]) -> Self {
        Self {
            ctx,
            function,
            params,
            path: Vec::new(),
            out: WalkOutput::default(),
        }
    }

    /// Walks `body` (normally the function's `compound_statement`).
    pub fn walk(mut self, body: Node<'_>) -> WalkOutput {
        self.visit(body);
        self.out
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.ctx.source).unwrap_or("")
    }

    fn visit(&mut self, node: Node<'_>) {
        match node.kind() {
            "comment" => {}
            "switch_statement" => self.visit_switch(node),
            "call_expression" => {
                self.record_call(node);
                self.visit_children(node);
            }
            _ => self.visit_children(node),
        }
    }

    fn visit_children(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn visit_switch(&mut self, node: Node<'_>) {
        let Some(condition) = node.child_by_field_name("condition") else {
            return;
        };
        // The condition runs before any branch is taken.
        self.visit(condition);
        let origin = self.origin_of(condition);

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        if body.kind() != "compound_statement" {
            self.visit(body);
            return;
        }

        // Reserve the slot so switches stay in source order.
        let slot = self.out.switches.len();
        self.out.switches.push(SwitchScope {
            origin: origin.clone(),
            line: (node.start_position().row + 1) as u32,
            path: self.path.clone(),
            branches: Vec::new(),
        });

        let mut cursor = body.walk();
        let cases: Vec<Node<'_>> = body
            .named_children(&mut cursor)
            .filter(|n| n.kind() == "case_statement")
            .collect();

        let mut branches = Vec::new();
        let mut labels: Vec<CaseLabel> = Vec::new();
        let mut falls_through = false;
        for case in cases {
            if !falls_through {
                labels.clear();
            }
            if let Some(label) = self.case_label(case) {
                labels.push(label);
            }

            let statements = case_statements(case);
            let Some(last) = statements.last().copied() else {
                falls_through = true;
                continue;
            };
            if !labels.is_empty() {
                branches.push(labels.clone());
                self.path.push(ScopeStep {
                    function: self.function.to_string(),
                    origin: origin.clone(),
                    labels: labels.clone(),
                });
                for statement in statements {
                    self.visit(statement);
                }
                self.path.pop();
            }
            falls_through = !ends_with_jump(last);
        }
        self.out.switches[slot].branches = branches;
    }

    fn case_label(&mut self, case: Node<'_>) -> Option<CaseLabel> {
        let Some(value) = case.child_by_field_name("value") else {
            return Some(CaseLabel::Default);
        };

        let is_range = value.kind() == "call_expression"
            && value
                .child_by_field_name("function")
                .is_some_and(|f| self.text(f) == CASE_RANGE_MARKER);
        if !is_range {
            return self
                .case_value(value, case)
                .map(|value| CaseLabel::Value { value });
        }

        let bounds = value
            .child_by_field_name("arguments")
            .map(|args| {
                let mut cursor = args.walk();
                let bounds: Vec<Node<'_>> = args
                    .named_children(&mut cursor)
                    .filter(|n| n.kind() != "comment")
                    .collect();
                bounds
            })
            .unwrap_or_default();
        if bounds.len() != 2 {
            self.diagnose(case, "malformed case range".to_string());
            return None;
        }
        let lo = self.case_value(bounds[0], case)?;
        let hi = self.case_value(bounds[1], case)?;
        Some(CaseLabel::Range { lo, hi })
    }

    fn case_value(&mut self, node: Node<'_>, case: Node<'_>) -> Option<CaseValue> {
        let text = self.text(node).trim();
        match self.ctx.env.eval(text) {
            Ok(value) => Some(CaseValue::new(text, Some(value))),
            Err(err) if err.is_unresolved() => Some(CaseValue::new(text, None)),
            Err(err @ ConstantEvalError::Unsupported(_)) => {
                self.diagnose(case, format!("case label `{}` kept symbolic: {}", text, err));
                Some(CaseValue::new(text, None))
            }
            Err(err) => {
                self.diagnose(case, format!("case label `{}` skipped: {}", text, err));
                None
            }
        }
    }

    fn diagnose(&mut self, node: Node<'_>, message: String) {
        let line = (node.start_position().row + 1) as u32;
        warn!(
            file = %self.ctx.file_path,
            line,
            function = %self.function,
            "{}",
            message
        );
        self.out.diagnostics.push(Diagnostic {
            file_path: self.ctx.file_path.to_string(),
            line,
            function: Some(self.function.to_string()),
            message,
        });
    }

    fn record_call(&mut self, call: Node<'_>) {
        let Some(function) = call.child_by_field_name("function") else {
            return;
        };
        // Calls through pointers or members are opaque.
        if function.kind() != "identifier" {
            return;
        }
        let callee = self.text(function);
        if callee == CASE_RANGE_MARKER {
            return;
        }

        let kind = match classify_call(self.ctx.classifiers, callee, &call, self.ctx.source) {
            Some(kind) => EventKind::Resource {
                kind,
                call: callee.to_string(),
            },
            None => {
                let args = call
                    .child_by_field_name("arguments")
                    .map(|list| {
                        let mut cursor = list.walk();
                        let args: Vec<ArgOrigin> = list
                            .named_children(&mut cursor)
                            .filter(|n| n.kind() != "comment")
                            .map(|arg| self.origin_of(arg))
                            .collect();
                        args
                    })
                    .unwrap_or_default();
                EventKind::Call {
                    callee: callee.to_string(),
                    args,
                }
            }
        };

        self.out.events.push(Event {
            kind,
            path: self.path.clone(),
            line: (call.start_position().row + 1) as u32,
        });
    }

    /// A bare parameter (possibly parenthesized or cast) maps to its index;
    /// anything else is kept as text.
    fn origin_of(&self, node: Node<'_>) -> ArgOrigin {
        let inner = strip_wrappers(node);
        if inner.kind() == "identifier" {
            let name = self.text(inner);
            if let Some(index) = self.params.iter().position(|p| p.name == name) {
                return ArgOrigin::Param {
                    index: index as u32,
                    name: name.to_string(),
                };
            }
        }
        let text = self.text(node);
        let text = text
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .filter(|_| node.kind() == "parenthesized_expression")
            .unwrap_or(text);
        ArgOrigin::expr(text.trim())
    }
}

fn strip_wrappers(mut node: Node<'_>) -> Node<'_> {
    loop {
        let next = match node.kind() {
            "parenthesized_expression" => {
                let mut cursor = node.walk();
                let inner = node
                    .named_children(&mut cursor)
                    .find(|n| n.kind() != "comment");
                inner
            }
            "cast_expression" => node.child_by_field_name("value"),
            _ => None,
        };
        match next {
            Some(inner) => node = inner,
            None => return node,
        }
    }
}

/// Statements of a case branch, after its label.
fn case_statements(case: Node<'_>) -> Vec<Node<'_>> {
    let value_id = case.child_by_field_name("value").map(|v| v.id());
    let mut cursor = case.walk();
    let statements: Vec<Node<'_>> = case
        .named_children(&mut cursor)
        .filter(|n| Some(n.id()) != value_id && n.kind() != "comment")
        .collect();
    statements
}

fn ends_with_jump(statement: Node<'_>) -> bool {
    match statement.kind() {
        "break_statement" | "return_statement" | "goto_statement" | "continue_statement" => true,
        "compound_statement" => {
            let mut cursor = statement.walk();
            let last = statement
                .named_children(&mut cursor)
                .filter(|n| n.kind() != "comment")
                .last();
            last.is_some_and(ends_with_jump)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RuleClassifier;
    use crate::shim::normalize;
    use common::{FactKind, ResourceRules};
    use forge::{CInt, DataModel};
    use tree_sitter::Parser;

    fn params(names: &[&str]) -> Vec<Param> {
        names
            .iter()
            .map(|n| Param {
                ty: "long".into(),
                name: n.to_string(),
            })
            .collect()
    }

    fn walk_first_function(src: &str, env: &ConstEnv, names: &[&str]) -> WalkOutput {
        let normalized = normalize(src);
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_c::LANGUAGE.into())
            .unwrap();
        let tree = parser.parse(&normalized, None).unwrap();
        let root = tree.root_node();
        let mut cursor = root.walk();
        let function = root
            .named_children(&mut cursor)
            .find(|n| n.kind() == "function_definition")
            .unwrap();
        let body = function.child_by_field_name("body").unwrap();

        let classifiers: Vec<Box<dyn Classifier>> =
            vec![Box::new(RuleClassifier::new(ResourceRules::default()))];
        let params = params(names);
        let ctx = WalkContext {
            source: normalized.as_bytes(),
            env,
            classifiers: &classifiers,
            file_path: "test.c",
        };
        ScopeWalker::new(ctx, "f", &params).walk(body)
    }

    fn label_exprs(step: &ScopeStep) -> Vec<String> {
        step.labels.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_unconditional_call_has_empty_path() {
        let env = ConstEnv::new(DataModel::Lp64);
        let out = walk_first_function("long f(long aux) { __fget_light(aux); }", &env, &["aux"]);
        assert_eq!(out.events.len(), 1);
        assert!(out.events[0].path.is_empty());
        assert_eq!(
            out.events[0].kind,
            EventKind::Resource {
                kind: FactKind::FetchFile,
                call: "__fget_light".into()
            }
        );
        assert_eq!(out.events[0].line, 1);
    }

    #[test]
    fn test_fallthrough_merges_labels() {
        let mut env = ConstEnv::new(DataModel::Lp64);
        env.define("A", "1");
        env.define("B", "2");
        let src = "long f(long x, long cmd) {\n\
                   switch (cmd) {\n\
                   case A:\n\
                   case B:\n\
                   \treturn alloc_fd();\n\
                   case 3:\n\
                   \tfget(x);\n\
                   }\n\
                   }";
        let out = walk_first_function(src, &env, &["x", "cmd"]);
        assert_eq!(out.events.len(), 2);

        let alloc = &out.events[0];
        assert_eq!(alloc.path.len(), 1);
        assert_eq!(label_exprs(&alloc.path[0]), vec!["A", "B"]);
        assert_eq!(
            alloc.path[0].origin,
            ArgOrigin::Param {
                index: 1,
                name: "cmd".into()
            }
        );
        assert_eq!(alloc.line, 5);

        let fetch = &out.events[1];
        assert_eq!(label_exprs(&fetch.path[0]), vec!["3"]);
    }

    #[test]
    fn test_body_without_break_falls_into_next_case() {
        let env = ConstEnv::new(DataModel::Lp64);
        let src = "long f(long cmd) { switch (cmd) { case 1: foo(); case 2: fget(0); break; } }";
        let out = walk_first_function(src, &env, &["cmd"]);
        let fetch = out
            .events
            .iter()
            .find(|e| matches!(e.kind, EventKind::Resource { .. }))
            .unwrap();
        assert_eq!(label_exprs(&fetch.path[0]), vec!["1", "2"]);
    }

    #[test]
    fn test_braced_case_body_with_break() {
        let env = ConstEnv::new(DataModel::Lp64);
        let src = "long f(long cmd) { switch (cmd) { case 1: { foo(); break; } case 2: fget(0); } }";
        let out = walk_first_function(src, &env, &["cmd"]);
        let fetch = out.events.last().unwrap();
        assert_eq!(label_exprs(&fetch.path[0]), vec!["2"]);
    }

    #[test]
    fn test_range_and_default_labels() {
        let mut env = ConstEnv::new(DataModel::Lp64);
        env.define("BASE", "0x10");
        let src = "long f(long cmd) { switch (cmd) { case BASE ... BASE + 2: fget(1); break; default: alloc_fd(); } }";
        let out = walk_first_function(src, &env, &["cmd"]);
        assert_eq!(out.events.len(), 2);

        match &out.events[0].path[0].labels[..] {
            [CaseLabel::Range { lo, hi }] => {
                assert_eq!(lo.expr, "BASE");
                assert_eq!(lo.value, Some(CInt::int(16)));
                assert_eq!(hi.expr, "BASE + 2");
                assert_eq!(hi.value, Some(CInt::int(18)));
            }
            other => panic!("unexpected labels {:?}", other),
        }
        assert_eq!(out.events[1].path[0].labels, vec![CaseLabel::Default]);
    }

    #[test]
    fn test_unresolved_label_stays_symbolic() {
        let env = ConstEnv::new(DataModel::Lp64);
        let src = "long f(long cmd) { switch (cmd) { case FOO_IOCTL1: fget(0); break; } }";
        let out = walk_first_function(src, &env, &["cmd"]);
        assert!(out.diagnostics.is_empty());
        let label = &out.events[0].path[0].labels[0];
        assert_eq!(label, &CaseLabel::value("FOO_IOCTL1", None));
    }

    #[test]
    fn test_bad_label_is_skipped_with_diagnostic() {
        let env = ConstEnv::new(DataModel::Lp64);
        let src = "long f(long cmd) {\nswitch (cmd) {\ncase 1 / 0:\n\tfget(0);\n\tbreak;\ncase 2:\n\talloc_fd();\n}\n}";
        let out = walk_first_function(src, &env, &["cmd"]);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].line, 3);
        assert_eq!(out.diagnostics[0].function.as_deref(), Some("f"));
        // Only the second case survives.
        assert_eq!(out.events.len(), 1);
        assert_eq!(label_exprs(&out.events[0].path[0]), vec!["2"]);
    }

    #[test]
    fn test_nested_switch_stacks_scopes() {
        let env = ConstEnv::new(DataModel::Lp64);
        let src = "long f(long a, long b) { switch (a) { case 1: switch ((int)b) { case 2: fget(0); } break; } }";
        let out = walk_first_function(src, &env, &["a", "b"]);
        let path = &out.events[0].path;
        assert_eq!(path.len(), 2);
        assert_eq!(
            path[1].origin,
            ArgOrigin::Param {
                index: 1,
                name: "b".into()
            }
        );
    }

    #[test]
    fn test_call_arguments_and_non_param_switch() {
        let env = ConstEnv::new(DataModel::Lp64);
        let src = "long f(long cmd, long x) { switch (cmd & 0xff) { case 7: helper(cmd, x + 1, 4); } }";
        let out = walk_first_function(src, &env, &["cmd", "x"]);
        let event = &out.events[0];
        assert_eq!(event.path[0].origin, ArgOrigin::expr("cmd & 0xff"));
        match &event.kind {
            EventKind::Call { callee, args } => {
                assert_eq!(callee, "helper");
                assert_eq!(
                    args,
                    &vec![
                        ArgOrigin::Param {
                            index: 0,
                            name: "cmd".into()
                        },
                        ArgOrigin::expr("x + 1"),
                        ArgOrigin::expr("4"),
                    ]
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_switches_record_branches_in_source_order() {
        let env = ConstEnv::new(DataModel::Lp64);
        let src = "long f(long a, long b) {\nswitch (a) {\ncase 1:\ncase 2:\n\tswitch (b) { case 9: break; }\n\tbreak;\ncase 3 ... 5:\n\tbreak;\n}\n}";
        let out = walk_first_function(src, &env, &["a", "b"]);
        assert_eq!(out.switches.len(), 2);

        let outer = &out.switches[0];
        assert_eq!(outer.line, 2);
        assert!(outer.path.is_empty());
        let rendered: Vec<Vec<String>> = outer
            .branches
            .iter()
            .map(|b| b.iter().map(|l| l.to_string()).collect())
            .collect();
        assert_eq!(rendered, vec![vec!["1", "2"], vec!["3 ... 5"]]);
        let values: Vec<&str> = outer.values().map(|v| v.expr.as_str()).collect();
        assert_eq!(values, vec!["1", "2"]);

        let inner = &out.switches[1];
        assert_eq!(inner.line, 5);
        assert_eq!(inner.path.len(), 1);
        assert_eq!(inner.origin, ArgOrigin::Param { index: 1, name: "b".into() });
    }

    #[test]
    fn test_statements_before_first_case_are_ignored() {
        let env = ConstEnv::new(DataModel::Lp64);
        let src = "long f(long cmd) { switch (cmd) { fget(0); case 1: break; } }";
        let out = walk_first_function(src, &env, &["cmd"]);
        assert!(out.events.is_empty());
    }

    #[test]
    fn test_nested_calls_are_all_recorded() {
        let env = ConstEnv::new(DataModel::Lp64);
        let out = walk_first_function("long f(void) { return wrap(alloc_fd()); }", &env, &[]);
        assert_eq!(out.events.len(), 2);
        assert!(matches!(&out.events[0].kind, EventKind::Call { callee, .. } if callee == "wrap"));
        assert!(matches!(out.events[1].kind, EventKind::Resource { kind: FactKind::AllocFd, .. }));
    }
}
