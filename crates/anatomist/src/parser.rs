//! tree-sitter C front end: builds a [`TranslationUnit`] from one `.c` file.
//!
//! A single query over the normalized source collects `#define`s,
//! `#include`s, enumerator lists and function definitions. Constants are
//! gathered into a [`ConstEnv`] in three layers (configured defines, then
//! included headers, then the file's own definitions) and every function
//! body is handed to the [`ScopeWalker`].

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use common::{ConstFact, Diagnostic, ExtractorConfig, FunctionSummary, Param, TranslationUnit};
use forge::{CInt, ConstEnv};
use memmap2::MmapOptions;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser, Query, QueryCapture, QueryCursor, StreamingIterator, Tree};

use crate::classify::{Classifier, RuleClassifier};
use crate::path_util::normalize_path;
use crate::scope::{ScopeWalker, WalkContext};
use crate::shim::{self, SYSCALL_PREFIX};
use crate::AnatomistError;

/// Pattern indices for the top-level query.
const PATTERN_DEFINE: usize = 0;
const PATTERN_FUNCTION_DEFINE: usize = 1;
const PATTERN_INCLUDE: usize = 2;
const PATTERN_ENUM: usize = 3;
const PATTERN_FUNCTION: usize = 4;

/// Include chains deeper than this are cut off.
const MAX_INCLUDE_DEPTH: usize = 32;

static TOP_LEVEL_QUERY: OnceLock<Query> = OnceLock::new();

fn get_query() -> &'static Query {
    TOP_LEVEL_QUERY.get_or_init(|| {
        Query::new(
            &tree_sitter_c::LANGUAGE.into(),
            r#"
            ; Pattern 0: object-like macros
            (preproc_def
              name: (identifier) @def.name) @def

            ; Pattern 1: function-like macros
            (preproc_function_def
              name: (identifier) @fdef.name
              parameters: (preproc_params) @fdef.params) @fdef

            ; Pattern 2: includes
            (preproc_include
              path: (_) @include.path) @include

            ; Pattern 3: enum bodies
            (enumerator_list) @enums

            ; Pattern 4: function definitions
            (function_definition) @function
            "#,
        )
        .expect("Top-level query compilation failed; the hardcoded S-expression is malformed")
    })
}

fn capture<'tree>(
    query: &Query,
    captures: &[QueryCapture<'tree>],
    name: &str,
) -> Option<Node<'tree>> {
    captures
        .iter()
        .find(|c| query.capture_names()[c.index as usize] == name)
        .map(|c| c.node)
}

fn node_text<'s>(node: Node<'_>, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or("")
}

/// Macro body without a trailing `//` comment, which the grammar folds
/// into the body text.
fn macro_body(node: Node<'_>, source: &[u8]) -> String {
    let text = node_text(node, source);
    let bytes = text.as_bytes();
    let mut quote = None;
    let mut i = 0;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Some(_), b'\\') => i += 1,
            (Some(q), c) if c == q => quote = None,
            (None, c @ (b'"' | b'\'')) => quote = Some(c),
            (None, b'/') if bytes.get(i + 1) == Some(&b'/') => return text[..i].trim().to_string(),
            _ => {}
        }
        i += 1;
    }
    text.trim().to_string()
}

/// Preprocessor and enum content of one file.
#[derive(Debug, Default)]
struct Directives {
    defines: Vec<(String, String)>,
    function_defines: Vec<(String, Vec<String>, String)>,
    includes: Vec<String>,
    enums: Vec<Vec<(String, Option<String>)>>,
}

/// A constant defined by the file itself, with its value when already known.
struct OwnConstant {
    name: String,
    expr: String,
    value: Option<CInt>,
}

fn scan<'tree>(tree: &'tree Tree, source: &[u8]) -> (Directives, Vec<Node<'tree>>) {
    let query = get_query();
    let mut directives = Directives::default();
    let mut functions = Vec::new();

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source);
    while let Some(m) = matches.next() {
        match m.pattern_index {
            PATTERN_DEFINE => {
                let (Some(def), Some(name)) = (
                    capture(query, m.captures, "def"),
                    capture(query, m.captures, "def.name"),
                ) else {
                    continue;
                };
                let body = def
                    .child_by_field_name("value")
                    .map(|v| macro_body(v, source))
                    .unwrap_or_default();
                directives
                    .defines
                    .push((node_text(name, source).to_string(), body));
            }
            PATTERN_FUNCTION_DEFINE => {
                let (Some(def), Some(name), Some(params)) = (
                    capture(query, m.captures, "fdef"),
                    capture(query, m.captures, "fdef.name"),
                    capture(query, m.captures, "fdef.params"),
                ) else {
                    continue;
                };
                let params = node_text(params, source)
                    .trim_start_matches('(')
                    .trim_end_matches(')')
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                let body = def
                    .child_by_field_name("value")
                    .map(|v| macro_body(v, source))
                    .unwrap_or_default();
                directives.function_defines.push((
                    node_text(name, source).to_string(),
                    params,
                    body,
                ));
            }
            PATTERN_INCLUDE => {
                if let Some(path) = capture(query, m.captures, "include.path") {
                    let spec = node_text(path, source)
                        .trim_matches(|c| c == '"' || c == '<' || c == '>')
                        .to_string();
                    if !spec.is_empty() {
                        directives.includes.push(spec);
                    }
                }
            }
            PATTERN_ENUM => {
                if let Some(list) = capture(query, m.captures, "enums") {
                    let mut walker = list.walk();
                    let enumerators = list
                        .named_children(&mut walker)
                        .filter(|n| n.kind() == "enumerator")
                        .filter_map(|e| {
                            let name = e.child_by_field_name("name")?;
                            let value = e
                                .child_by_field_name("value")
                                .map(|v| node_text(v, source).trim().to_string());
                            Some((node_text(name, source).to_string(), value))
                        })
                        .collect();
                    directives.enums.push(enumerators);
                }
            }
            PATTERN_FUNCTION => {
                if let Some(function) = capture(query, m.captures, "function") {
                    functions.push(function);
                }
            }
            _ => {}
        }
    }
    (directives, functions)
}

/// Loads `directives` into `env` and returns the constants they name.
///
/// Macros are stored unevaluated; enumerators are numbered as they are
/// met, so an enumerator whose value cannot be computed also leaves the
/// implicit ones after it unnumbered.
fn apply_directives(directives: &Directives, env: &mut ConstEnv) -> Vec<OwnConstant> {
    let mut own = Vec::new();
    for (name, body) in &directives.defines {
        env.define(name, body);
        if !body.is_empty() {
            own.push(OwnConstant {
                name: name.clone(),
                expr: body.clone(),
                value: None,
            });
        }
    }
    for (name, params, body) in &directives.function_defines {
        env.define_function(name, params, body);
    }
    for enumerators in &directives.enums {
        let mut next = Some(CInt::int(0));
        for (name, expr) in enumerators {
            let value = match expr {
                Some(expr) => env.eval(expr).ok(),
                None => next,
            };
            next = value.map(|v| v.wrapping_add(CInt::int(1)));
            if let Some(value) = value {
                env.set_value(name, value);
                own.push(OwnConstant {
                    name: name.clone(),
                    expr: expr.clone().unwrap_or_else(|| value.to_string()),
                    value: Some(value),
                });
            }
        }
    }
    own
}

/// Descends pointer and parenthesized wrappers to the function declarator.
fn function_declarator(mut node: Node<'_>) -> Option<Node<'_>> {
    loop {
        node = match node.kind() {
            "function_declarator" => return Some(node),
            "pointer_declarator" => node.child_by_field_name("declarator")?,
            "parenthesized_declarator" | "attributed_declarator" => node.named_child(0)?,
            _ => return None,
        };
    }
}

/// Pointer depth and name of a parameter declarator.
fn declarator_name<'s>(mut node: Node<'_>, source: &'s [u8]) -> (usize, Option<&'s str>) {
    let mut stars = 0;
    loop {
        let next = match node.kind() {
            "identifier" => return (stars, Some(node_text(node, source))),
            "pointer_declarator" | "abstract_pointer_declarator" => {
                stars += 1;
                node.child_by_field_name("declarator")
            }
            "array_declarator" | "function_declarator" => node.child_by_field_name("declarator"),
            "parenthesized_declarator" | "attributed_declarator" => node.named_child(0),
            _ => None,
        };
        match next {
            Some(inner) => node = inner,
            None => return (stars, None),
        }
    }
}

fn extract_params(list: Node<'_>, source: &[u8]) -> Vec<Param> {
    let mut cursor = list.walk();
    let declarations: Vec<Node<'_>> = list
        .named_children(&mut cursor)
        .filter(|n| n.kind() == "parameter_declaration")
        .collect();

    let mut params = Vec::new();
    for declaration in declarations {
        let declarator = declaration.child_by_field_name("declarator");
        let declarator_id = declarator.map(|d| d.id());
        let mut walker = declaration.walk();
        let mut ty = declaration
            .named_children(&mut walker)
            .filter(|n| Some(n.id()) != declarator_id && n.kind() != "comment")
            .map(|n| node_text(n, source).trim())
            .collect::<Vec<_>>()
            .join(" ");

        let (stars, name) = match declarator {
            Some(d) => declarator_name(d, source),
            None if ty == "void" => continue,
            None => (0, None),
        };
        if stars > 0 {
            ty.push(' ');
            ty.push_str(&"*".repeat(stars));
        }
        params.push(Param {
            ty,
            name: name.unwrap_or_default().to_string(),
        });
    }
    params
}

fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let mut children: Vec<Node<'_>> = node.children(&mut cursor).collect();
            children.reverse();
            stack.extend(children);
        }
    }
    None
}

/// The C parser host.
///
/// # Architecture
/// - Uses memory-mapped file I/O for the translation unit itself
/// - Normalizes kernel macros with [`shim::normalize`] before parsing
/// - Registered classifiers decide which calls are resource operations;
///   a [`RuleClassifier`] over the configured rules is always first
///
/// # Example
/// ```no_run
/// use anatomist::ParserHost;
/// use common::ExtractorConfig;
/// use std::path::Path;
///
/// let mut host = ParserHost::new(ExtractorConfig::default()).unwrap();
/// let unit = host.dissect(Path::new("fs/ioctl.c")).unwrap();
/// for syscall in unit.syscalls() {
///     println!("{} ({} args)", syscall.name, syscall.args.len());
/// }
/// ```
pub struct ParserHost {
    parser: Parser,
    config: ExtractorConfig,
    classifiers: Vec<Box<dyn Classifier>>,
}

impl ParserHost {
    /// Creates a host with the C grammar loaded.
    ///
    /// # Errors
    /// Returns `AnatomistError::ParseFailure` if the grammar cannot be loaded.
    pub fn new(config: ExtractorConfig) -> Result<Self, AnatomistError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_c::LANGUAGE.into())
            .map_err(|e| AnatomistError::ParseFailure(format!("Failed to load C grammar: {}", e)))?;

        let classifiers: Vec<Box<dyn Classifier>> =
            vec![Box::new(RuleClassifier::new(config.rules.clone()))];
        Ok(Self {
            parser,
            config,
            classifiers,
        })
    }

    /// Adds a classifier after the ones already registered.
    pub fn register_classifier(&mut self, classifier: Box<dyn Classifier>) {
        self.classifiers.push(classifier);
    }

    /// Extracts a translation unit from a file using memory-mapped I/O.
    ///
    /// # Errors
    /// - `IoError`: File not found, permission denied, mmap failure
    /// - `ByteRangeOverflow`: File larger than 4GB (tree-sitter u32 limit)
    /// - `ParseFailure`: Tree-sitter returned no tree
    pub fn dissect(&mut self, path: &Path) -> Result<TranslationUnit, AnatomistError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        if file_len > u32::MAX as u64 {
            return Err(AnatomistError::ByteRangeOverflow);
        }
        let normalized_path = normalize_path(path)?;
        if file_len == 0 {
            return Ok(TranslationUnit {
                file_path: normalized_path,
                ..Default::default()
            });
        }

        // SAFETY: The file handle is held for the duration of the mmap lifetime.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let dir = Path::new(&normalized_path).parent().map(Path::to_path_buf);
        self.dissect_source(&mmap[..], &normalized_path, dir.as_deref())
    }

    /// Extracts a translation unit from an in-memory buffer. Quoted
    /// includes are looked up in `dir` first, then in the configured
    /// include directories.
    pub fn dissect_source(
        &mut self,
        source: &[u8],
        file_path: &str,
        dir: Option<&Path>,
    ) -> Result<TranslationUnit, AnatomistError> {
        let text = String::from_utf8_lossy(source);
        let normalized = shim::normalize(&text);
        let tree = self.parser.parse(normalized.as_bytes(), None).ok_or_else(|| {
            AnatomistError::ParseFailure("Tree-sitter parse returned None".to_string())
        })?;
        let bytes = normalized.as_bytes();
        let (directives, functions) = scan(&tree, bytes);

        let mut env = ConstEnv::new(self.config.data_model);
        for (name, value) in &self.config.defines {
            env.define(name, value);
        }
        let mut visited = HashSet::new();
        for include in &directives.includes {
            self.include(include, dir, &mut env, &mut visited, 0);
        }
        let own = apply_directives(&directives, &mut env);

        let mut unit = TranslationUnit {
            file_path: file_path.to_string(),
            ..Default::default()
        };
        unit.consts = own
            .into_iter()
            .filter_map(|c| {
                let value = match c.value {
                    Some(v) => v,
                    None => env.eval(&c.expr).ok()?,
                };
                Some(ConstFact {
                    name: c.name,
                    expr: c.expr,
                    value,
                    file_path: file_path.to_string(),
                })
            })
            .collect();

        let ctx = WalkContext {
            source: bytes,
            env: &env,
            classifiers: &self.classifiers,
            file_path,
        };
        for node in functions {
            if let Some(summary) = extract_function(node, ctx, &mut unit.diagnostics) {
                unit.functions.push(summary);
            }
        }

        let root = tree.root_node();
        if root.has_error() {
            unit.has_parse_errors = true;
            let line = first_error(root)
                .map(|n| (n.start_position().row + 1) as u32)
                .unwrap_or(1);
            warn!(file = %file_path, line, "syntax error; surrounding code may be incomplete");
            unit.diagnostics.push(Diagnostic {
                file_path: file_path.to_string(),
                line,
                function: None,
                message: "syntax error; surrounding code may be incomplete".to_string(),
            });
        }

        debug!(
            file = %file_path,
            functions = unit.functions.len(),
            consts = unit.consts.len(),
            "dissected translation unit"
        );
        Ok(unit)
    }

    fn resolve_include(&self, spec: &str, dir: Option<&Path>) -> Option<PathBuf> {
        dir.into_iter()
            .chain(self.config.include_dirs.iter().map(PathBuf::as_path))
            .map(|base| base.join(spec))
            .find(|candidate| candidate.is_file())
            .map(|found| dunce::canonicalize(&found).unwrap_or(found))
    }

    /// Folds one header (and, recursively, its own includes) into `env`.
    /// Headers contribute constants only; their functions are not summarized.
    fn include(
        &mut self,
        spec: &str,
        dir: Option<&Path>,
        env: &mut ConstEnv,
        visited: &mut HashSet<PathBuf>,
        depth: usize,
    ) {
        if depth >= MAX_INCLUDE_DEPTH {
            debug!(header = %spec, depth, "include chain too deep");
            return;
        }
        let Some(path) = self.resolve_include(spec, dir) else {
            debug!(header = %spec, "header not found; its constants stay symbolic");
            return;
        };
        if !visited.insert(path.clone()) {
            return;
        }
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(header = %path.display(), error = %e, "failed to read header");
                return;
            }
        };
        let normalized = shim::normalize(&String::from_utf8_lossy(&bytes));
        let Some(tree) = self.parser.parse(normalized.as_bytes(), None) else {
            debug!(header = %path.display(), "failed to parse header");
            return;
        };
        let (directives, _) = scan(&tree, normalized.as_bytes());

        let header_dir = path.parent().map(Path::to_path_buf);
        for nested in &directives.includes {
            self.include(nested, header_dir.as_deref(), env, visited, depth + 1);
        }
        apply_directives(&directives, env);
    }
}

fn extract_function(
    node: Node<'_>,
    ctx: WalkContext<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<FunctionSummary> {
    let declarator = function_declarator(node.child_by_field_name("declarator")?)?;
    let name_node = declarator.child_by_field_name("declarator")?;
    if name_node.kind() != "identifier" {
        return None;
    }
    let raw_name = node_text(name_node, ctx.source);
    let (name, syscall) = match raw_name.strip_prefix(SYSCALL_PREFIX) {
        Some(syscall) => (format!("sys_{}", syscall), Some(syscall.to_string())),
        None => (raw_name.to_string(), None),
    };

    let params = declarator
        .child_by_field_name("parameters")
        .map(|list| extract_params(list, ctx.source))
        .unwrap_or_default();
    let mut cursor = node.walk();
    let is_static = node
        .children(&mut cursor)
        .any(|c| c.kind() == "storage_class_specifier" && node_text(c, ctx.source) == "static");

    let body = node.child_by_field_name("body")?;
    let out = ScopeWalker::new(ctx, &name, &params).walk(body);
    diagnostics.extend(out.diagnostics);

    Some(FunctionSummary {
        file_path: ctx.file_path.to_string(),
        start_line: (node.start_position().row + 1) as u32,
        end_line: (node.end_position().row + 1) as u32,
        is_static,
        syscall,
        events: out.events,
        switches: out.switches,
        name,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{EventKind, FactKind};
    use forge::IntType;

    fn host() -> ParserHost {
        ParserHost::new(ExtractorConfig::default()).unwrap()
    }

    fn const_value(unit: &TranslationUnit, name: &str) -> Option<CInt> {
        unit.consts.iter().find(|c| c.name == name).map(|c| c.value)
    }

    #[test]
    fn test_syscall_and_helper_extraction() {
        let source = b"static int helper(long cmd, long aux) {\n\treturn alloc_fd();\n}\n\nSYSCALL_DEFINE2(demo, int, fd, char __user *, buf)\n{\n\treturn helper(fd, 0);\n}\n";
        let unit = host().dissect_source(source, "demo.c", None).unwrap();
        assert!(!unit.has_parse_errors);
        assert_eq!(unit.functions.len(), 2);

        let helper = unit.function("helper").unwrap();
        assert!(helper.is_static);
        assert!(!helper.is_syscall());
        assert_eq!(helper.start_line, 1);
        assert_eq!(helper.end_line, 3);
        assert_eq!(
            helper.events[0].kind,
            EventKind::Resource {
                kind: FactKind::AllocFd,
                call: "alloc_fd".into()
            }
        );

        let sys = unit.function("sys_demo").unwrap();
        assert_eq!(sys.syscall.as_deref(), Some("demo"));
        assert_eq!(sys.start_line, 5);
        let names: Vec<&str> = sys.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["fd", "buf"]);
        assert_eq!(sys.params[1].ty, "char *");

        let syscalls: Vec<_> = unit.syscalls().collect();
        assert_eq!(syscalls.len(), 1);
        assert_eq!(syscalls[0].name, "demo");
        assert_eq!(syscalls[0].line, 5);
    }

    #[test]
    fn test_typed_syscall_params_with_even_count() {
        let source = b"SYSCALL_DEFINE1(foo, int x, long cmd)\n{\n\treturn cmd;\n}\n";
        let unit = host().dissect_source(source, "foo.c", None).unwrap();
        assert!(!unit.has_parse_errors);
        let sys = unit.function("sys_foo").unwrap();
        let params: Vec<(&str, &str)> = sys
            .params
            .iter()
            .map(|p| (p.ty.as_str(), p.name.as_str()))
            .collect();
        assert_eq!(params, vec![("int", "x"), ("long", "cmd")]);
        assert_eq!(sys.end_line, 4);
    }

    #[test]
    fn test_void_params_and_pointer_return() {
        let source = b"struct file *get(void) { return fget(0); }\nSYSCALL_DEFINE0(ping) { return 0; }\n";
        let unit = host().dissect_source(source, "t.c", None).unwrap();
        assert!(unit.function("get").unwrap().params.is_empty());
        assert!(unit.function("sys_ping").unwrap().params.is_empty());
    }

    #[test]
    fn test_constants_from_defines_and_enums() {
        let source = br#"
#define LARGE_UINT (1ull<<63) // this is supposed to overflow int64
#define LARGE_SINT (20ll<<63) /* wraps to zero */
#define NAME "not a number"
#define EMPTY
enum modes { MODE_A, MODE_B = 10, MODE_C };
"#;
        let unit = host().dissect_source(source, "c.c", None).unwrap();

        let large = const_value(&unit, "LARGE_UINT").unwrap();
        assert_eq!(large.bits(), 1u64 << 63);
        assert_eq!(large.ty(), IntType::ULLONG);
        let wrapped = const_value(&unit, "LARGE_SINT").unwrap();
        assert!(wrapped.is_zero());
        assert_eq!(wrapped.ty(), IntType::LLONG);

        assert_eq!(const_value(&unit, "MODE_A"), Some(CInt::int(0)));
        assert_eq!(const_value(&unit, "MODE_B"), Some(CInt::int(10)));
        assert_eq!(const_value(&unit, "MODE_C"), Some(CInt::int(11)));
        assert!(const_value(&unit, "NAME").is_none());
        let expr = |name: &str| unit.consts.iter().find(|c| c.name == name).map(|c| c.expr.clone());
        assert_eq!(expr("LARGE_UINT").as_deref(), Some("(1ull<<63)"));
        assert!(const_value(&unit, "EMPTY").is_none());
    }

    #[test]
    fn test_config_defines_seed_the_environment() {
        let mut config = ExtractorConfig::default();
        config.add_define("FOO_BASE=0x40");
        let mut host = ParserHost::new(config).unwrap();
        let source = b"#define FOO_IOCTL1 (FOO_BASE + 1)\nlong f(long cmd) { switch (cmd) { case FOO_IOCTL1: fget(0); } }";
        let unit = host.dissect_source(source, "t.c", None).unwrap();
        assert_eq!(const_value(&unit, "FOO_IOCTL1"), Some(CInt::int(0x41)));
        // Configured defines are not facts of the file.
        assert!(const_value(&unit, "FOO_BASE").is_none());

        let f = unit.function("f").unwrap();
        let label = &f.events[0].path[0].labels[0];
        assert_eq!(label, &common::CaseLabel::value("FOO_IOCTL1", Some(CInt::int(0x41))));
    }

    #[test]
    fn test_includes_resolve_label_constants() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("include/uapi")).unwrap();
        std::fs::write(
            dir.path().join("include/uapi/ioctl.h"),
            "#include \"../base.h\"\n#define FOO_IOCTL1 _IO('f', 1)\nint header_only(void) { return alloc_fd(); }\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("include/base.h"),
            "#define _IO(t, n) (((t) << 8) | (n))\n#include \"uapi/ioctl.h\"\n",
        )
        .unwrap();
        let c_file = dir.path().join("x.c");
        std::fs::write(
            &c_file,
            "#include \"include/uapi/ioctl.h\"\n#include <missing/header.h>\nlong f(long cmd) { switch (cmd) { case FOO_IOCTL1: fget(0); } }\n",
        )
        .unwrap();

        let unit = host().dissect(&c_file).unwrap();
        assert_eq!(unit.functions.len(), 1, "header functions are not summarized");
        assert!(unit.consts.is_empty(), "header constants are not facts of the file");
        let label = &unit.functions[0].events[0].path[0].labels[0];
        let expected = (i64::from(b'f') << 8) | 1;
        assert_eq!(label, &common::CaseLabel::value("FOO_IOCTL1", Some(CInt::int(expected))));
    }

    #[test]
    fn test_include_dirs_from_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("consts.h"), "#define MAGIC 7\n").unwrap();
        let mut config = ExtractorConfig::default();
        config.include_dirs.push(dir.path().to_path_buf());
        let mut host = ParserHost::new(config).unwrap();
        let source = b"#include <consts.h>\n#define DOUBLE (MAGIC * 2)\n";
        let unit = host.dissect_source(source, "t.c", None).unwrap();
        assert_eq!(const_value(&unit, "DOUBLE"), Some(CInt::int(14)));
    }

    #[test]
    fn test_syntax_errors_are_flagged_not_fatal() {
        let source = b"int ok(void) { return fget(0); }\n\nint broken( { ;\n";
        let unit = host().dissect_source(source, "bad.c", None).unwrap();
        assert!(unit.has_parse_errors);
        assert_eq!(unit.diagnostics.len(), 1);
        assert!(unit.function("ok").is_some());
    }

    #[test]
    fn test_dissect_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.c");
        std::fs::write(&path, "").unwrap();
        let unit = host().dissect(&path).unwrap();
        assert!(unit.functions.is_empty());
        assert!(unit.file_path.ends_with("empty.c"));
    }

    #[test]
    fn test_dissect_missing_file() {
        let result = host().dissect(Path::new("/this/does/not/exist/nowhere.c"));
        assert!(matches!(result, Err(AnatomistError::IoError(_))));
    }

    #[test]
    fn test_registered_classifier_runs_after_rules() {
        struct MyFget;
        impl Classifier for MyFget {
            fn classify(&self, callee: &str, _: &Node<'_>, _: &[u8]) -> Option<FactKind> {
                (callee == "my_fget").then_some(FactKind::FetchFile)
            }
        }
        let mut host = host();
        host.register_classifier(Box::new(MyFget));
        let unit = host
            .dissect_source(b"int f(void) { my_fget(); alloc_fd(); }", "t.c", None)
            .unwrap();
        let kinds: Vec<_> = unit.functions[0]
            .events
            .iter()
            .map(|e| match &e.kind {
                EventKind::Resource { kind, .. } => Some(*kind),
                EventKind::Call { .. } => None,
            })
            .collect();
        assert_eq!(kinds, vec![Some(FactKind::FetchFile), Some(FactKind::AllocFd)]);
    }
}
