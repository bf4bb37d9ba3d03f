//! Static definition of the investigation flow graph.
//!
//! The graph is a table of named nodes built once at startup and validated
//! before anything runs: exactly one start node, at least one end node,
//! every edge resolves, no cycles, everything reachable. Decision nodes are
//! pure routing — they never get a task row — and their branch conditions
//! are data (which earlier nodes to read, what a missing verdict counts
//! as), not code.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow has no start node")]
    NoStart,

    #[error("flow has more than one start node: {0}, {1}")]
    MultipleStarts(String, String),

    #[error("flow has no end node")]
    NoEnd,

    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    #[error("node {node} points at unknown successor {target}")]
    UnknownTarget { node: String, target: String },

    #[error("cycle detected through node {0}")]
    Cycle(String),

    #[error("node {0} is unreachable from the start node")]
    Unreachable(String),
}

/// Branch predicate of a decision node, evaluated against the process's
/// accumulated analysis results.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchCondition {
    /// True when the newest analysis verdict of any listed node is a pass.
    /// A node with no verdict yet (or an open NULL verdict) contributes
    /// `missing_as` instead of silently counting as a fail.
    AnyLatestResultTrue {
        nodes: Vec<String>,
        missing_as: bool,
    },
}

impl BranchCondition {
    pub fn nodes(&self) -> &[String] {
        match self {
            BranchCondition::AnyLatestResultTrue { nodes, .. } => nodes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Start {
        next: String,
    },
    Human {
        next: String,
    },
    Decision {
        condition: BranchCondition,
        then_next: String,
        else_next: String,
    },
    End,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_human(&self) -> bool {
        matches!(self.kind, NodeKind::Human { .. })
    }

    fn successors(&self) -> Vec<&str> {
        match &self.kind {
            NodeKind::Start { next } | NodeKind::Human { next } => vec![next],
            NodeKind::Decision {
                then_next,
                else_next,
                ..
            } => vec![then_next, else_next],
            NodeKind::End => vec![],
        }
    }
}

/// Validated, immutable node table. Built once at startup.
#[derive(Debug, Clone)]
pub struct Flow {
    nodes: HashMap<String, Node>,
    start: String,
}

impl Flow {
    pub fn builder() -> FlowBuilder {
        FlowBuilder { nodes: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn start(&self) -> &Node {
        // Validated at build time.
        &self.nodes[&self.start]
    }
}

pub struct FlowBuilder {
    nodes: Vec<Node>,
}

impl FlowBuilder {
    pub fn start(mut self, name: &str, next: &str) -> Self {
        self.nodes.push(Node {
            name: name.to_string(),
            kind: NodeKind::Start {
                next: next.to_string(),
            },
        });
        self
    }

    pub fn human(mut self, name: &str, next: &str) -> Self {
        self.nodes.push(Node {
            name: name.to_string(),
            kind: NodeKind::Human {
                next: next.to_string(),
            },
        });
        self
    }

    pub fn decision(
        mut self,
        name: &str,
        condition: BranchCondition,
        then_next: &str,
        else_next: &str,
    ) -> Self {
        self.nodes.push(Node {
            name: name.to_string(),
            kind: NodeKind::Decision {
                condition,
                then_next: then_next.to_string(),
                else_next: else_next.to_string(),
            },
        });
        self
    }

    pub fn end(mut self, name: &str) -> Self {
        self.nodes.push(Node {
            name: name.to_string(),
            kind: NodeKind::End,
        });
        self
    }

    pub fn build(self) -> Result<Flow, FlowError> {
        let mut nodes = HashMap::new();
        let mut start = None;
        let mut has_end = false;

        for node in self.nodes {
            if matches!(node.kind, NodeKind::Start { .. }) {
                if let Some(existing) = &start {
                    return Err(FlowError::MultipleStarts(
                        String::clone(existing),
                        node.name,
                    ));
                }
                start = Some(node.name.clone());
            }
            if matches!(node.kind, NodeKind::End) {
                has_end = true;
            }
            let name = node.name.clone();
            if nodes.insert(name.clone(), node).is_some() {
                return Err(FlowError::DuplicateNode(name));
            }
        }

        let start = start.ok_or(FlowError::NoStart)?;
        if !has_end {
            return Err(FlowError::NoEnd);
        }

        let flow = Flow { nodes, start };
        flow.validate()?;
        Ok(flow)
    }
}

impl Flow {
    fn validate(&self) -> Result<(), FlowError> {
        // Every edge resolves.
        for node in self.nodes.values() {
            for target in node.successors() {
                if !self.nodes.contains_key(target) {
                    return Err(FlowError::UnknownTarget {
                        node: node.name.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        // Acyclic: DFS with a path-local visited set.
        let mut done: HashSet<&str> = HashSet::new();
        for name in self.nodes.keys() {
            let mut on_path = HashSet::new();
            self.check_cycle(name, &mut on_path, &mut done)?;
        }

        // Everything reachable from start.
        let mut reachable = HashSet::new();
        let mut stack = vec![self.start.as_str()];
        while let Some(name) = stack.pop() {
            if !reachable.insert(name) {
                continue;
            }
            for target in self.nodes[name].successors() {
                stack.push(target);
            }
        }
        for name in self.nodes.keys() {
            if !reachable.contains(name.as_str()) {
                return Err(FlowError::Unreachable(name.clone()));
            }
        }

        Ok(())
    }

    fn check_cycle<'a>(
        &'a self,
        name: &'a str,
        on_path: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), FlowError> {
        if done.contains(name) {
            return Ok(());
        }
        if !on_path.insert(name) {
            return Err(FlowError::Cycle(name.to_string()));
        }
        for target in self.nodes[name].successors() {
            self.check_cycle(target, on_path, done)?;
        }
        on_path.remove(name);
        done.insert(name);
        Ok(())
    }
}

/// Node names of the deployed device-investigation flow.
pub mod nodes {
    pub const START: &str = "start";
    pub const PRODUCTION_TEST_FAIL: &str = "production_test_fail";
    pub const FAE_INITIAL_RETEST: &str = "FAE_initial_retest";
    pub const JUDGE_RETEST_RESULT: &str = "judge_retest_result";
    pub const X_RAY_TEST: &str = "X_ray_test";
    pub const JUDGE_X_RAY_RESULT: &str = "judge_X_ray_result";
    pub const ENGINEERING_ANALYSIS: &str = "engineering_analysis";
    pub const ME_ANALYSIS: &str = "me_analysis";
    pub const ANALYSIS_RESULT: &str = "analysis_result";
    pub const FAE_FINAL_RETEST: &str = "FAE_final_retest";
    pub const FINAL_RETEST_RESULT: &str = "final_retest_result";
    pub const SCRAPPED: &str = "scrapped";
    pub const RETURN_NORMAL_FLOW: &str = "return_normal_flow";
    pub const END: &str = "end";
}

/// The device-investigation flow: production failure → retest → branch into
/// X-ray and specialist analysis → final retest → return to line or scrap.
///
/// `missing_as` is the branch outcome used when a decision's source node has
/// no verdict yet; the shipped policy is `false` (route to the Else branch).
pub fn device_investigation(missing_as: bool) -> Result<Flow, FlowError> {
    use nodes::*;

    let latest = |node: &str| BranchCondition::AnyLatestResultTrue {
        nodes: vec![node.to_string()],
        missing_as,
    };

    Flow::builder()
        .start(START, PRODUCTION_TEST_FAIL)
        .human(PRODUCTION_TEST_FAIL, FAE_INITIAL_RETEST)
        .human(FAE_INITIAL_RETEST, JUDGE_RETEST_RESULT)
        .decision(
            JUDGE_RETEST_RESULT,
            latest(FAE_INITIAL_RETEST),
            RETURN_NORMAL_FLOW,
            X_RAY_TEST,
        )
        .human(X_RAY_TEST, JUDGE_X_RAY_RESULT)
        .decision(
            JUDGE_X_RAY_RESULT,
            latest(X_RAY_TEST),
            ENGINEERING_ANALYSIS,
            ME_ANALYSIS,
        )
        .human(ENGINEERING_ANALYSIS, ANALYSIS_RESULT)
        .human(ME_ANALYSIS, ANALYSIS_RESULT)
        .decision(
            ANALYSIS_RESULT,
            BranchCondition::AnyLatestResultTrue {
                nodes: vec![
                    ENGINEERING_ANALYSIS.to_string(),
                    ME_ANALYSIS.to_string(),
                ],
                missing_as,
            },
            FAE_FINAL_RETEST,
            SCRAPPED,
        )
        .human(FAE_FINAL_RETEST, FINAL_RETEST_RESULT)
        .decision(
            FINAL_RETEST_RESULT,
            latest(FAE_FINAL_RETEST),
            RETURN_NORMAL_FLOW,
            SCRAPPED,
        )
        .human(SCRAPPED, END)
        .human(RETURN_NORMAL_FLOW, END)
        .end(END)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_investigation_builds() {
        let flow = device_investigation(false).unwrap();
        assert_eq!(flow.start().name, nodes::START);
        assert!(flow.contains(nodes::SCRAPPED));
        assert!(flow.get(nodes::JUDGE_X_RAY_RESULT).unwrap().kind
            != NodeKind::End);
    }

    #[test]
    fn unknown_target_rejected() {
        let err = Flow::builder()
            .start("start", "missing")
            .end("end")
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownTarget { .. }));
    }

    #[test]
    fn cycle_rejected() {
        let err = Flow::builder()
            .start("start", "a")
            .human("a", "b")
            .human("b", "a")
            .end("end")
            .build()
            .unwrap_err();
        // "end" is also unreachable, but the cycle check runs first.
        assert!(matches!(err, FlowError::Cycle(_)));
    }

    #[test]
    fn two_starts_rejected() {
        let err = Flow::builder()
            .start("start", "end")
            .start("start2", "end")
            .end("end")
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowError::MultipleStarts(_, _)));
    }

    #[test]
    fn missing_end_rejected() {
        let err = Flow::builder()
            .start("start", "a")
            .human("a", "start")
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowError::NoEnd));
    }

    #[test]
    fn unreachable_node_rejected() {
        let err = Flow::builder()
            .start("start", "end")
            .human("island", "end")
            .end("end")
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowError::Unreachable(_)));
    }
}
