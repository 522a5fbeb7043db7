//! # The Oracle: Call Graph & Syscall Attribution
//!
//! Links every `FunctionSummary` into one call graph and decides, for each
//! syscall, which resource operations it can reach and under which branch
//! path.
//!
//! **Algorithm**:
//! 1. **Link**: resolve each call event to a definition (same file first,
//!    then a non-static definition elsewhere). Unresolved calls are opaque.
//! 2. **Summarize**: walk strongly connected components callees-first and
//!    memoize each function's reachable facts. A callee's facts enter the
//!    caller prefixed by the call site's path, with parameter origins
//!    rebased through the call arguments. Members of a recursive component
//!    are re-summarized until none of them gains a fact; a fact whose call
//!    chain would re-enter the caller is dropped, so every chain stays
//!    acyclic.
//! 3. **Attribute**: every syscall's summary becomes its `ResourceFact`s.

use common::ir::{EventKind, FunctionSummary, ResourceFact, ScopeStep, TranslationUnit};
use common::FactKind;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// A fact relative to the function whose summary holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SummaryFact {
    kind: FactKind,
    call: String,
    path: Vec<ScopeStep>,
    via: Vec<String>,
    /// Function indices behind `via`.
    chain: Vec<usize>,
    file_path: String,
    line: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttributionStats {
    pub functions: usize,
    pub syscalls: usize,
    pub call_edges: usize,
    pub unresolved_calls: usize,
    pub recursive_calls: usize,
    pub facts: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Attribution {
    pub facts: Vec<ResourceFact>,
    pub stats: AttributionStats,
}

pub struct CallGraph<'a> {
    /// Node weight: index into `functions`. Edge weight: caller event index.
    graph: DiGraph<usize, usize>,
    functions: Vec<&'a FunctionSummary>,
    nodes: Vec<NodeIndex>,
    /// (caller, event index) → callee.
    resolved: HashMap<(usize, usize), usize>,
    unresolved_calls: usize,
}

impl<'a> CallGraph<'a> {
    /// Builds the graph over every function of every unit.
    pub fn build(units: &'a [TranslationUnit]) -> Self {
        let functions: Vec<&FunctionSummary> =
            units.iter().flat_map(|u| u.functions.iter()).collect();

        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, f) in functions.iter().enumerate() {
            by_name.entry(f.name.as_str()).or_default().push(idx);
        }

        let mut graph = DiGraph::with_capacity(functions.len(), 0);
        let nodes: Vec<NodeIndex> = (0..functions.len()).map(|i| graph.add_node(i)).collect();

        let mut resolved = HashMap::new();
        let mut unresolved_calls = 0;
        for (caller, f) in functions.iter().enumerate() {
            for (event_idx, event) in f.events.iter().enumerate() {
                let EventKind::Call { callee, .. } = &event.kind else {
                    continue;
                };
                match resolve(&functions, &by_name, &f.file_path, callee) {
                    Some(target) => {
                        resolved.insert((caller, event_idx), target);
                        graph.add_edge(nodes[caller], nodes[target], event_idx);
                    }
                    None => {
                        debug!(caller = %f.name, callee = %callee, "call left opaque");
                        unresolved_calls += 1;
                    }
                }
            }
        }

        Self {
            graph,
            functions,
            nodes,
            resolved,
            unresolved_calls,
        }
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Names of every function reachable from `name` through resolved
    /// calls, excluding `name` itself, in BFS order.
    pub fn reachable_from(&self, name: &str) -> Vec<String> {
        let Some(start) = self.functions.iter().position(|f| f.name == name) else {
            return Vec::new();
        };

        let mut visited: HashSet<usize> = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(self.nodes[start].index());
        queue.push_back(self.nodes[start]);

        let mut reached = Vec::new();
        while let Some(node_idx) = queue.pop_front() {
            for edge in self.graph.edges_directed(node_idx, Direction::Outgoing) {
                let target_idx = edge.target();
                if visited.insert(target_idx.index()) {
                    reached.push(self.functions[self.graph[target_idx]].name.clone());
                    queue.push_back(target_idx);
                }
            }
        }
        reached
    }

    /// Computes every syscall's resource facts.
    pub fn attribute(&self) -> Attribution {
        let sccs = tarjan_scc(&self.graph);
        let mut component = vec![0usize; self.functions.len()];
        for (scc_id, scc) in sccs.iter().enumerate() {
            for node in scc {
                component[self.graph[*node]] = scc_id;
            }
        }

        let recursive_calls = self
            .graph
            .edge_references()
            .filter(|e| component[self.graph[e.source()]] == component[self.graph[e.target()]])
            .count();
        let mut stats = AttributionStats {
            functions: self.functions.len(),
            call_edges: self.graph.edge_count(),
            unresolved_calls: self.unresolved_calls,
            recursive_calls,
            ..Default::default()
        };

        // Postorder: every callee outside the component is summarized first.
        let mut summaries: Vec<Vec<SummaryFact>> = vec![Vec::new(); self.functions.len()];
        for scc in &sccs {
            // A lone function's own facts all start at itself, so calling
            // itself adds nothing and one pass is final.
            let mut rounds = 0;
            loop {
                rounds += 1;
                let mut grew = false;
                for node in scc {
                    let idx = self.graph[*node];
                    let facts = self.summarize(idx, &summaries);
                    if facts.len() != summaries[idx].len() {
                        grew = true;
                        summaries[idx] = facts;
                    }
                }
                if !grew || scc.len() == 1 {
                    break;
                }
            }
            if scc.len() > 1 {
                debug!(members = scc.len(), rounds, "recursive component summarized");
            }
        }

        let mut facts = Vec::new();
        for (idx, f) in self.functions.iter().enumerate() {
            let Some(syscall) = &f.syscall else {
                continue;
            };
            stats.syscalls += 1;
            facts.extend(summaries[idx].iter().map(|s| ResourceFact {
                syscall: syscall.clone(),
                kind: s.kind,
                call: s.call.clone(),
                path: s.path.clone(),
                via: s.via.clone(),
                file_path: s.file_path.clone(),
                line: s.line,
            }));
        }
        stats.facts = facts.len();

        Attribution { facts, stats }
    }

    /// Facts `idx` reaches given the current callee summaries. Only grows as
    /// `summaries` grows.
    fn summarize(&self, idx: usize, summaries: &[Vec<SummaryFact>]) -> Vec<SummaryFact> {
        let f = self.functions[idx];
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for (event_idx, event) in f.events.iter().enumerate() {
            match &event.kind {
                EventKind::Resource { kind, call } => {
                    let fact = SummaryFact {
                        kind: *kind,
                        call: call.clone(),
                        path: event.path.clone(),
                        via: vec![f.name.clone()],
                        chain: vec![idx],
                        file_path: f.file_path.clone(),
                        line: event.line,
                    };
                    if seen.insert(fact.clone()) {
                        out.push(fact);
                    }
                }
                EventKind::Call { callee, args } => {
                    let Some(&target) = self.resolved.get(&(idx, event_idx)) else {
                        continue;
                    };
                    for inner in &summaries[target] {
                        if inner.chain.contains(&idx) {
                            debug!(caller = %f.name, callee = %callee, "cyclic chain dropped");
                            continue;
                        }
                        let mut path = event.path.clone();
                        path.extend(inner.path.iter().map(|step| step.rebased(args)));
                        let mut via = Vec::with_capacity(inner.via.len() + 1);
                        via.push(f.name.clone());
                        via.extend(inner.via.iter().cloned());
                        let mut chain = Vec::with_capacity(inner.chain.len() + 1);
                        chain.push(idx);
                        chain.extend(inner.chain.iter().copied());
                        let fact = SummaryFact {
                            kind: inner.kind,
                            call: inner.call.clone(),
                            path,
                            via,
                            chain,
                            file_path: inner.file_path.clone(),
                            line: inner.line,
                        };
                        if seen.insert(fact.clone()) {
                            out.push(fact);
                        }
                    }
                }
            }
        }
        out
    }
}

/// Same-file definitions win; otherwise the first non-static definition
/// by file path.
fn resolve(
    functions: &[&FunctionSummary],
    by_name: &HashMap<&str, Vec<usize>>,
    caller_file: &str,
    callee: &str,
) -> Option<usize> {
    let candidates = by_name.get(callee)?;
    if let Some(&local) = candidates
        .iter()
        .find(|&&i| functions[i].file_path == caller_file)
    {
        return Some(local);
    }
    candidates
        .iter()
        .copied()
        .filter(|&i| !functions[i].is_static)
        .min_by(|&a, &b| functions[a].file_path.cmp(&functions[b].file_path))
}

/// Convenience: build the graph and attribute in one step.
pub fn attribute(units: &[TranslationUnit]) -> Attribution {
    CallGraph::build(units).attribute()
}
