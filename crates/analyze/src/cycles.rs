//! Pass 4: circular references.
//!
//! Agents and flows form one reference graph: `delegate` and `use` edges
//! between agents, and `run` edges from flows to the agents and flows they
//! run. Prompts form a second graph through `{{name}}` composition. In both,
//! every elementary cycle is reported once as E0011 with the full path,
//! starting at its smallest member.

use crate::globals::Globals;
use agentflow_core::ast::{CompilationUnit, DeclKind, Declaration, Stmt};
use agentflow_core::{Code, Diagnostic, Span};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// A reference from one node to another, at the referencing site.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub to: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    file: String,
    edges: Vec<Edge>,
}

/// Directed graph over declaration names.
#[derive(Debug, Default)]
pub struct RefGraph {
    nodes: BTreeMap<String, Node>,
}

/// One cycle found by [`RefGraph::cycles`]: `path` starts and ends with
/// the same name. `file` and `span` locate the edge that closes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    pub path: Vec<String>,
    pub file: String,
    pub span: Span,
}

impl RefGraph {
    pub fn add_node(&mut self, name: &str, file: &str) {
        self.nodes.entry(name.to_owned()).or_insert_with(|| Node {
            file: file.to_owned(),
            edges: Vec::new(),
        });
    }

    pub fn add_edge(&mut self, from: &str, to: &str, span: Span) {
        if let Some(node) = self.nodes.get_mut(from) {
            node.edges.push(Edge {
                to: to.to_owned(),
                span,
            });
        }
    }

    /// Every elementary cycle, each once. Cycles are enumerated from their
    /// smallest member in name order, so `path[0]` is that member.
    pub fn cycles(&self) -> Vec<Cycle> {
        let mut search = Search {
            graph: self,
            root: "",
            in_path: HashSet::new(),
            path: Vec::new(),
            seen: BTreeSet::new(),
            found: Vec::new(),
        };
        for root in self.nodes.keys() {
            search.root = root;
            search.dfs(root);
        }
        search.found
    }
}

/// Depth-first search restricted to nodes not smaller than `root`. A path
/// only closes when an edge returns to `root`; nodes on the current path
/// are never re-entered, and nothing is pruned across paths.
struct Search<'g> {
    graph: &'g RefGraph,
    root: &'g str,
    in_path: HashSet<&'g str>,
    path: Vec<&'g str>,
    /// Cycles already reported; parallel edges would repeat them.
    seen: BTreeSet<Vec<&'g str>>,
    found: Vec<Cycle>,
}

impl<'g> Search<'g> {
    fn dfs(&mut self, name: &'g str) {
        self.path.push(name);
        self.in_path.insert(name);

        if let Some(node) = self.graph.nodes.get(name) {
            for edge in &node.edges {
                let target = edge.to.as_str();
                if target == self.root {
                    self.close(&node.file, edge.span);
                    continue;
                }
                if target < self.root || self.in_path.contains(target) {
                    continue;
                }
                if let Some((key, _)) = self.graph.nodes.get_key_value(target) {
                    self.dfs(key);
                }
            }
        }

        self.in_path.remove(name);
        self.path.pop();
    }

    fn close(&mut self, file: &str, span: Span) {
        if !self.seen.insert(canonical(&self.path)) {
            return;
        }
        let mut path: Vec<String> = self.path.iter().map(|n| (*n).to_owned()).collect();
        path.push(self.root.to_owned());
        self.found.push(Cycle {
            path,
            file: file.to_owned(),
            span,
        });
    }
}

/// Rotation of a cycle that starts at its smallest member.
fn canonical<'g>(members: &[&'g str]) -> Vec<&'g str> {
    let pivot = members
        .iter()
        .enumerate()
        .min_by_key(|(_, n)| **n)
        .map_or(0, |(i, _)| i);
    members[pivot..]
        .iter()
        .chain(&members[..pivot])
        .copied()
        .collect()
}

pub fn check_cycles(unit: &CompilationUnit, globals: &Globals, diags: &mut Vec<Diagnostic>) {
    let (refs, prompts) = build_graphs(unit, globals);

    for cycle in refs.cycles() {
        diags.push(cycle_diagnostic("circular reference", &cycle));
    }
    for cycle in prompts.cycles() {
        diags.push(cycle_diagnostic("circular prompt composition", &cycle));
    }
}

fn cycle_diagnostic(what: &str, cycle: &Cycle) -> Diagnostic {
    Diagnostic::new(
        Code::CircularReference,
        &cycle.file,
        Some(cycle.span),
        format!("{}: {}", what, cycle.path.join(" -> ")),
    )
    .with_help("remove one of the references in this cycle")
}

/// Agent/flow reference graph and prompt composition graph. Edges to names
/// that are undefined or of the wrong kind are left out; resolution has
/// already reported them.
pub fn build_graphs(unit: &CompilationUnit, globals: &Globals) -> (RefGraph, RefGraph) {
    let mut refs = RefGraph::default();
    let mut prompts = RefGraph::default();

    for decl in &unit.declarations {
        let file = &decl.prov().file;
        match decl {
            Declaration::Agent(a) => refs.add_node(&a.name.name, file),
            Declaration::Flow(f) => refs.add_node(&f.name.name, file),
            Declaration::Prompt(p) => prompts.add_node(&p.name.name, file),
            _ => {}
        }
    }

    let is = |name: &str, kinds: &[DeclKind]| globals.kind_of(name).is_some_and(|k| kinds.contains(&k));

    for decl in &unit.declarations {
        match decl {
            Declaration::Agent(a) => {
                for target in a.delegates().chain(a.uses()) {
                    if is(&target.name, &[DeclKind::Agent]) {
                        refs.add_edge(&a.name.name, &target.name, target.span);
                    }
                }
            }
            Declaration::Flow(f) => {
                let mut runs = Vec::new();
                collect_runs(&f.body, &mut runs);
                for (callee, span) in runs {
                    if is(callee, &[DeclKind::Agent, DeclKind::Flow]) {
                        refs.add_edge(&f.name.name, callee, span);
                    }
                }
            }
            Declaration::Prompt(p) => {
                for name in p.compositions() {
                    if is(&name, &[DeclKind::Prompt]) {
                        prompts.add_edge(&p.name.name, &name, p.body_span);
                    }
                }
            }
            _ => {}
        }
    }
    (refs, prompts)
}

fn collect_runs<'a>(stmts: &'a [Stmt], out: &mut Vec<(&'a str, Span)>) {
    for stmt in stmts {
        match stmt {
            Stmt::Run { callee, .. } => out.push((callee.name.as_str(), callee.span)),
            Stmt::ForLoop { body, .. } | Stmt::Parallel { body, .. } | Stmt::Loop { body, .. } => {
                collect_runs(body, out)
            }
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_runs(then_body, out);
                if let Some(body) = else_body {
                    collect_runs(body, out);
                }
            }
            Stmt::Match { arms, default, .. } => {
                for arm in arms {
                    collect_runs(&arm.body, out);
                }
                if let Some(body) = default {
                    collect_runs(body, out);
                }
            }
            _ => {}
        }
    }
}
