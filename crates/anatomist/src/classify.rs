//! Call classification: deciding which calls are resource operations.
//!
//! The scope walker asks every registered [`Classifier`] about each direct
//! call. The first one to answer `Some(kind)` wins and the call becomes a
//! resource event; otherwise it is recorded as an ordinary call edge.

use common::{FactKind, ResourceRules};

/// Recognizes resource operations at call sites.
///
/// # Implementation Notes
/// - Classifiers run during the body walk, once per call expression
/// - Only calls through a plain identifier reach a classifier
/// - `call` is the whole `call_expression` node, so a classifier may inspect
///   the arguments as well as the callee name
///
/// # Example
/// ```no_run
/// use anatomist::Classifier;
/// use common::FactKind;
/// use tree_sitter::Node;
///
/// struct AnonInodes;
///
/// impl Classifier for AnonInodes {
///     fn classify(&self, callee: &str, _call: &Node, _source: &[u8]) -> Option<FactKind> {
///         callee.starts_with("anon_inode_get").then_some(FactKind::AllocFd)
///     }
/// }
/// ```
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        callee: &str,
        call: &tree_sitter::Node<'_>,
        source: &[u8],
    ) -> Option<FactKind>;
}

/// Name-based classification from [`ResourceRules`].
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier {
    rules: ResourceRules,
}

impl RuleClassifier {
    pub fn new(rules: ResourceRules) -> Self {
        Self { rules }
    }
}

impl Classifier for RuleClassifier {
    fn classify(
        &self,
        callee: &str,
        _call: &tree_sitter::Node<'_>,
        _source: &[u8],
    ) -> Option<FactKind> {
        self.rules.classify(callee)
    }
}

/// Runs `classifiers` in order and returns the first verdict.
pub fn classify_call(
    classifiers: &[Box<dyn Classifier>],
    callee: &str,
    call: &tree_sitter::Node<'_>,
    source: &[u8],
) -> Option<FactKind> {
    classifiers
        .iter()
        .find_map(|c| c.classify(callee, call, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    struct Everything;

    impl Classifier for Everything {
        fn classify(&self, _: &str, _: &tree_sitter::Node<'_>, _: &[u8]) -> Option<FactKind> {
            Some(FactKind::FetchFile)
        }
    }

    fn with_call<F: FnOnce(&tree_sitter::Node<'_>, &[u8])>(source: &str, f: F) {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_c::LANGUAGE.into())
            .unwrap();
        let tree = parser.parse(source, None).unwrap();
        let root = tree.root_node();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node.kind() == "call_expression" {
                f(&node, source.as_bytes());
                return;
            }
            let mut cursor = node.walk();
            stack.extend(node.children(&mut cursor));
        }
        panic!("no call expression in {:?}", source);
    }

    #[test]
    fn test_rule_classifier() {
        let classifier = RuleClassifier::new(ResourceRules::default());
        with_call("void f(void) { alloc_fd(); }", |call, src| {
            assert_eq!(
                classifier.classify("alloc_fd", call, src),
                Some(FactKind::AllocFd)
            );
            assert_eq!(classifier.classify("kfree", call, src), None);
        });
    }

    #[test]
    fn test_first_classifier_wins() {
        let classifiers: Vec<Box<dyn Classifier>> = vec![
            Box::new(RuleClassifier::new(ResourceRules::default())),
            Box::new(Everything),
        ];
        with_call("void f(void) { alloc_fd(); }", |call, src| {
            assert_eq!(
                classify_call(&classifiers, "alloc_fd", call, src),
                Some(FactKind::AllocFd)
            );
            assert_eq!(
                classify_call(&classifiers, "kfree", call, src),
                Some(FactKind::FetchFile)
            );
        });
    }

    #[test]
    fn test_no_classifiers() {
        with_call("void f(void) { fget(0); }", |call, src| {
            assert_eq!(classify_call(&[], "fget", call, src), None);
        });
    }
}
