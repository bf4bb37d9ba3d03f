//! Dashboard affordances: which buttons a given actor sees on a task.
//!
//! Built from the state machine's legal transitions, filtered through the
//! same department/role axes the gate enforces. A correctly-departmented
//! non-supervisor still sees supervisor-gated steps — relabeled as a
//! pending-escalation placeholder with no link — so the dashboard shows
//! where the task is stuck instead of going blank.

use db::models::task::Task;
use serde::Serialize;

use super::{
    activation::TransitionKind,
    directory::Actor,
    permission::{OperationKind, PermissionGate, SUPERVISOR_ROLE},
};

pub const AWAITING_ASSIGNMENT_LABEL: &str = "待主管分配";
pub const AWAITING_REVIEW_LABEL: &str = "待主管审核";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskAction {
    pub label: String,
    /// `None` renders as status text, not a link.
    pub href: Option<String>,
}

impl TaskAction {
    fn link(label: &str, href: String) -> Self {
        Self {
            label: label.to_string(),
            href: Some(href),
        }
    }

    fn placeholder(label: &str) -> Self {
        Self {
            label: label.to_string(),
            href: None,
        }
    }
}

pub fn available_actions(task: &Task, actor: &Actor, gate: &PermissionGate) -> Vec<TaskAction> {
    if !actor.authenticated {
        return Vec::new();
    }
    // Outside the node's departments nothing is offered at all.
    if !gate.actor_in_node_department(&task.node, actor) {
        return Vec::new();
    }

    let mut actions = Vec::new();
    for kind in TransitionKind::available_from(task.status, task.data_submitted) {
        match kind {
            // Reassign has no routing target; never rendered.
            TransitionKind::Reassign => continue,

            TransitionKind::Start => {
                if gate.actor_may_operate(OperationKind::Submit, actor) {
                    actions.push(TaskAction::link(kind.label(), route(kind, task)));
                }
            }

            TransitionKind::Assign => {
                if gate.actor_may_operate(OperationKind::Assign, actor) {
                    actions.push(TaskAction::link(kind.label(), route(kind, task)));
                } else {
                    actions.push(TaskAction::placeholder(AWAITING_ASSIGNMENT_LABEL));
                }
            }

            TransitionKind::Approve => {
                if gate.actor_may_operate(OperationKind::Approve, actor) {
                    actions.push(TaskAction::link(kind.label(), route(kind, task)));
                } else {
                    actions.push(TaskAction::placeholder(AWAITING_REVIEW_LABEL));
                }
            }

            TransitionKind::Reject => {
                if gate.actor_may_operate(OperationKind::Approve, actor) {
                    actions.push(TaskAction::link(kind.label(), route(kind, task)));
                }
            }

            // Manage-level housekeeping without a gated URL pattern.
            TransitionKind::Unassign | TransitionKind::Cancel => {
                if actor.has_role(SUPERVISOR_ROLE) {
                    actions.push(TaskAction::link(kind.label(), route(kind, task)));
                }
            }
        }
    }
    actions
}

fn route(kind: TransitionKind, task: &Task) -> String {
    let base = format!("/workflows/{}/{}/{}", task.process_id, task.node, task.id);
    match kind {
        TransitionKind::Assign => format!("{base}/assign"),
        TransitionKind::Start => format!("{base}/execute"),
        TransitionKind::Approve | TransitionKind::Reject => format!("{base}/approve"),
        TransitionKind::Cancel => format!("{base}/cancel"),
        TransitionKind::Unassign => format!("{base}/unassign"),
        TransitionKind::Reassign => unreachable!("reassign has no route"),
    }
}
