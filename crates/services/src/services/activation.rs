//! Task activation: the per-task state machine and the engine that walks
//! the flow graph forward.
//!
//! Every transition is one serialized unit of work: the guard is expressed
//! as the WHERE clause of the status update, so two racing requests cannot
//! both observe the old state and both win — the loser's update touches
//! zero rows and surfaces as an illegal transition. Successor creation and
//! evidence writes ride in the same transaction.

use std::sync::Arc;

use db::{
    models::{
        analysis_result::{AnalysisResult, CreateAnalysisResult},
        device::{CreateDevice, Device},
        operation_record::{CreateOperationRecord, OperationRecord},
        process::Process,
        task::{Task, TaskStatus},
    },
    DBService,
};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use strum_macros::Display;
use thiserror::Error;
use uuid::Uuid;

use super::{
    directory::Actor,
    events::{DomainEvent, EventService},
    flow::{nodes, BranchCondition, Flow, NodeKind},
    permission::OperationKind,
};

pub type ActivationResult<T> = Result<T, ActivationError>;

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("process {0} not found")]
    ProcessNotFound(Uuid),

    #[error("device {0} not found")]
    DeviceNotFound(Uuid),

    #[error("device {0} already has an active investigation")]
    ActiveInvestigation(String),

    #[error("cannot {transition} a task in status {from:?}: {reason}")]
    IllegalTransition {
        transition: TransitionKind,
        from: TaskStatus,
        reason: String,
    },

    #[error("unknown flow node {0}")]
    UnknownNode(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Validation(String),
}

/// The fixed transition vocabulary of a task. Each kind knows its display
/// label, the gated operation it corresponds to, and whether it needs the
/// manage-level role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TransitionKind {
    Assign,
    Unassign,
    Start,
    Approve,
    Reject,
    Cancel,
    Reassign,
}

impl TransitionKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransitionKind::Assign => "Assign",
            TransitionKind::Unassign => "Unassign",
            TransitionKind::Start => "Upload Data",
            TransitionKind::Approve => "Approve",
            TransitionKind::Reject => "Reject",
            TransitionKind::Cancel => "Cancel",
            TransitionKind::Reassign => "Reassign",
        }
    }

    /// The URL-operation this transition is gated as, if any. Cancel and
    /// Unassign match no gate pattern; they rely on the manage-role check
    /// in the resolver.
    pub fn operation(&self) -> Option<OperationKind> {
        match self {
            TransitionKind::Assign | TransitionKind::Reassign => Some(OperationKind::Assign),
            TransitionKind::Start => Some(OperationKind::Submit),
            TransitionKind::Approve | TransitionKind::Reject => Some(OperationKind::Approve),
            TransitionKind::Unassign | TransitionKind::Cancel => None,
        }
    }

    pub fn requires_manage(&self) -> bool {
        !matches!(self, TransitionKind::Start)
    }

    /// Transitions that are legal from a task state, before any actor
    /// filtering. A raw unguarded execute does not exist in this
    /// vocabulary: data entry is only reachable through `Start`, which
    /// refuses to run over an unreviewed submission.
    pub fn available_from(status: TaskStatus, data_submitted: bool) -> Vec<TransitionKind> {
        use TransitionKind::*;
        match status {
            TaskStatus::New => vec![Assign, Cancel],
            TaskStatus::Assigned => {
                let mut transitions = Vec::new();
                if !data_submitted {
                    transitions.push(Start);
                }
                transitions.extend([Unassign, Reassign, Cancel]);
                transitions
            }
            TaskStatus::Started => {
                if data_submitted {
                    vec![Approve, Reject, Cancel]
                } else {
                    vec![Start, Cancel]
                }
            }
            TaskStatus::Done | TaskStatus::Cancelled => Vec::new(),
        }
    }
}

/// Human-entered payload of an execute submission.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitData {
    /// What was done; nodes have source-faithful defaults when omitted.
    pub action: Option<String>,
    pub attachment: Option<String>,
    pub analysis_notes: Option<String>,
    /// Tri-state verdict consumed by downstream decision nodes.
    pub result: Option<bool>,
    /// Attach the analysis to an existing record of this task instead of
    /// logging a new one.
    pub operation_id: Option<Uuid>,
    /// Where the physical unit now sits (retest nodes).
    pub current_position: Option<String>,
    /// Bug tracker reference (engineering analysis).
    pub bug_ref: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartOutcome {
    pub device: Device,
    pub process: Process,
    /// The first human task; `None` only for a degenerate flow whose start
    /// leads straight to an end node.
    pub first_task: Option<Task>,
}

#[derive(Debug, Serialize)]
pub struct ApproveOutcome {
    pub task: Task,
    pub next_task: Option<Task>,
    pub process_finished: bool,
}

#[derive(Clone)]
pub struct ActivationEngine {
    db: DBService,
    flow: Arc<Flow>,
    events: EventService,
}

impl ActivationEngine {
    pub fn new(db: DBService, flow: Arc<Flow>, events: EventService) -> Self {
        Self { db, flow, events }
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Open an investigation: get-or-create the device by serial number,
    /// create the process and the (already completed) start task, then
    /// advance to the first human node.
    pub async fn start_process(
        &self,
        actor: &Actor,
        descriptor: &CreateDevice,
    ) -> ActivationResult<StartOutcome> {
        self.require_actor(actor)?;
        let sn = descriptor.sn.trim();
        if sn.is_empty() {
            return Err(ActivationError::Validation(
                "device serial number is required".to_string(),
            ));
        }

        let mut tx = self.db.pool.begin().await?;

        let device = match Device::find_by_sn(&mut *tx, sn).await? {
            Some(device) => device,
            None => {
                let mut descriptor = descriptor.clone();
                descriptor.sn = sn.to_string();
                Device::create(&mut *tx, &descriptor, Uuid::new_v4()).await?
            }
        };

        if Process::find_active_by_device(&mut *tx, device.id)
            .await?
            .is_some()
        {
            return Err(ActivationError::ActiveInvestigation(device.sn.clone()));
        }

        let process = Process::create(&mut *tx, device.id, Uuid::new_v4()).await?;

        // History row for the start node; it completes the moment the
        // operator files the investigation.
        let start = self.flow.start();
        Task::create(
            &mut *tx,
            process.id,
            &start.name,
            TaskStatus::Done,
            Uuid::new_v4(),
        )
        .await?;

        let first_task = self.advance(&mut tx, process.id, &start.name).await?;
        tx.commit().await?;

        tracing::info!(
            process_id = %process.id,
            device_sn = %device.sn,
            operator = %actor.username,
            "investigation opened"
        );
        self.events.emit(DomainEvent::ProcessCreated {
            process_id: process.id,
            device_sn: device.sn.clone(),
        });

        Ok(StartOutcome {
            device,
            process,
            first_task,
        })
    }

    /// NEW → ASSIGNED, recording the assignee.
    pub async fn assign(&self, actor: &Actor, task_id: Uuid) -> ActivationResult<Task> {
        self.require_actor(actor)?;
        let mut tx = self.db.pool.begin().await?;
        let task = self.load_task(&mut tx, task_id).await?;

        let rows = Task::try_assign(&mut *tx, task_id, &actor.username).await?;
        if rows == 0 {
            return Err(ActivationError::IllegalTransition {
                transition: TransitionKind::Assign,
                from: task.status,
                reason: "only an unassigned task can be assigned".to_string(),
            });
        }

        let task = self.reload_task(&mut tx, task_id).await?;
        tx.commit().await?;
        tracing::info!(%task_id, assignee = %actor.username, node = %task.node, "task assigned");
        Ok(task)
    }

    /// ASSIGNED → NEW, clearing the assignee.
    pub async fn unassign(&self, actor: &Actor, task_id: Uuid) -> ActivationResult<Task> {
        self.require_actor(actor)?;
        let mut tx = self.db.pool.begin().await?;
        let task = self.load_task(&mut tx, task_id).await?;

        let rows = Task::try_unassign(&mut *tx, task_id).await?;
        if rows == 0 {
            return Err(ActivationError::IllegalTransition {
                transition: TransitionKind::Unassign,
                from: task.status,
                reason: "only an assigned task can be unassigned".to_string(),
            });
        }

        let task = self.reload_task(&mut tx, task_id).await?;
        tx.commit().await?;
        tracing::info!(%task_id, node = %task.node, "task unassigned");
        Ok(task)
    }

    /// ASSIGNED|STARTED → STARTED plus the node's evidence writes and the
    /// data-submitted flip, all in one commit.
    pub async fn submit(
        &self,
        actor: &Actor,
        task_id: Uuid,
        payload: &SubmitData,
    ) -> ActivationResult<Task> {
        self.require_actor(actor)?;
        let mut tx = self.db.pool.begin().await?;
        let task = self.load_task(&mut tx, task_id).await?;
        let process = Process::find_by_id(&mut *tx, task.process_id)
            .await?
            .ok_or(ActivationError::ProcessNotFound(task.process_id))?;
        let device = Device::find_by_id(&mut *tx, process.device_id)
            .await?
            .ok_or(ActivationError::DeviceNotFound(process.device_id))?;

        let rows = Task::try_start(&mut *tx, task_id).await?;
        if rows == 0 {
            let reason = if task.data_submitted {
                "submitted data is awaiting review".to_string()
            } else {
                "task must be assigned before data entry".to_string()
            };
            return Err(ActivationError::IllegalTransition {
                transition: TransitionKind::Start,
                from: task.status,
                reason,
            });
        }

        let operation_id = match payload.operation_id {
            Some(op_id) => {
                let record = OperationRecord::find_by_id(&mut *tx, op_id)
                    .await?
                    .filter(|r| r.task_id == task.id)
                    .ok_or_else(|| {
                        ActivationError::Validation(
                            "operation record does not belong to this task".to_string(),
                        )
                    })?;
                record.id
            }
            None => {
                let action = payload
                    .action
                    .clone()
                    .unwrap_or_else(|| default_action(&task.node, &device.sn));
                let record = OperationRecord::create(
                    &mut *tx,
                    &CreateOperationRecord {
                        process_id: process.id,
                        task_id: task.id,
                        action,
                        actor: actor.username.clone(),
                        attachment: payload.attachment.clone(),
                    },
                    Uuid::new_v4(),
                )
                .await?;
                record.id
            }
        };

        if payload.result.is_some() || payload.analysis_notes.is_some() {
            let analysis_notes = payload
                .analysis_notes
                .clone()
                .unwrap_or_else(|| default_notes(&task.node, payload.result));
            AnalysisResult::create(
                &mut *tx,
                &CreateAnalysisResult {
                    process_id: process.id,
                    task_id: task.id,
                    operation_id: Some(operation_id),
                    actor: actor.username.clone(),
                    analysis_notes,
                    result: payload.result,
                },
                Uuid::new_v4(),
            )
            .await?;
        }

        if let Some(position) = payload.current_position.as_deref() {
            Device::update_position(&mut *tx, device.id, position).await?;
        }
        if let Some(bug_ref) = payload.bug_ref.as_deref() {
            Device::set_bug_ref(&mut *tx, device.id, bug_ref).await?;
        }

        Task::mark_data_submitted(&mut *tx, task_id).await?;
        let task = self.reload_task(&mut tx, task_id).await?;
        tx.commit().await?;

        tracing::info!(%task_id, node = %task.node, actor = %actor.username, "task data submitted");
        self.events.emit(DomainEvent::TaskStarted {
            process_id: task.process_id,
            task_id: task.id,
            node: task.node.clone(),
        });
        Ok(task)
    }

    /// STARTED → DONE, then walk the graph to the next human task or the
    /// end of the process. Decision nodes evaluate inside the same
    /// transaction and never get a task row.
    pub async fn approve(&self, actor: &Actor, task_id: Uuid) -> ActivationResult<ApproveOutcome> {
        self.require_actor(actor)?;
        let mut tx = self.db.pool.begin().await?;
        let task = self.load_task(&mut tx, task_id).await?;

        let rows = Task::try_complete(&mut *tx, task_id).await?;
        if rows == 0 {
            let reason = if task.status == TaskStatus::Started && !task.data_submitted {
                "no data has been submitted for review".to_string()
            } else {
                "only a started task with submitted data can be approved".to_string()
            };
            return Err(ActivationError::IllegalTransition {
                transition: TransitionKind::Approve,
                from: task.status,
                reason,
            });
        }

        let next_task = self.advance(&mut tx, task.process_id, &task.node).await?;
        let task = self.reload_task(&mut tx, task_id).await?;
        tx.commit().await?;

        let process_finished = next_task.is_none();
        tracing::info!(
            %task_id,
            node = %task.node,
            approver = %actor.username,
            next = next_task.as_ref().map(|t| t.node.as_str()).unwrap_or("<finished>"),
            "task approved"
        );
        Ok(ApproveOutcome {
            task,
            next_task,
            process_finished,
        })
    }

    /// STARTED → ASSIGNED with the submission voided; no graph advance.
    pub async fn reject(&self, actor: &Actor, task_id: Uuid) -> ActivationResult<Task> {
        self.require_actor(actor)?;
        let mut tx = self.db.pool.begin().await?;
        let task = self.load_task(&mut tx, task_id).await?;

        let rows = Task::try_reject(&mut *tx, task_id).await?;
        if rows == 0 {
            return Err(ActivationError::IllegalTransition {
                transition: TransitionKind::Reject,
                from: task.status,
                reason: "only a started task can be sent back for rework".to_string(),
            });
        }

        let task = self.reload_task(&mut tx, task_id).await?;
        tx.commit().await?;
        tracing::info!(%task_id, node = %task.node, reviewer = %actor.username, "task rejected");
        Ok(task)
    }

    /// Abandon the investigation: the active task and its process both go
    /// terminal, no successor is created.
    pub async fn cancel(&self, actor: &Actor, task_id: Uuid) -> ActivationResult<Task> {
        self.require_actor(actor)?;
        let mut tx = self.db.pool.begin().await?;
        let task = self.load_task(&mut tx, task_id).await?;

        let rows = Task::try_cancel(&mut *tx, task_id).await?;
        if rows == 0 {
            return Err(ActivationError::IllegalTransition {
                transition: TransitionKind::Cancel,
                from: task.status,
                reason: "task is already terminal".to_string(),
            });
        }
        Process::try_cancel(&mut *tx, task.process_id).await?;

        let task = self.reload_task(&mut tx, task_id).await?;
        tx.commit().await?;
        tracing::info!(%task_id, node = %task.node, by = %actor.username, "task cancelled");
        Ok(task)
    }

    /// State-machine view only; the actions resolver applies actor
    /// filtering on top.
    pub fn available_transitions(&self, task: &Task) -> Vec<TransitionKind> {
        TransitionKind::available_from(task.status, task.data_submitted)
    }

    async fn advance(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        process_id: Uuid,
        completed_node: &str,
    ) -> ActivationResult<Option<Task>> {
        let node = self
            .flow
            .get(completed_node)
            .ok_or_else(|| ActivationError::UnknownNode(completed_node.to_string()))?;

        let mut target_name = match &node.kind {
            NodeKind::Start { next } | NodeKind::Human { next } => next.clone(),
            NodeKind::Decision { .. } | NodeKind::End => {
                // Decisions and ends never own tasks, so nothing completes
                // "at" them.
                return Err(ActivationError::UnknownNode(completed_node.to_string()));
            }
        };

        loop {
            let target = self
                .flow
                .get(&target_name)
                .ok_or_else(|| ActivationError::UnknownNode(target_name.clone()))?;

            match &target.kind {
                NodeKind::Decision {
                    condition,
                    then_next,
                    else_next,
                } => {
                    let pass = self.eval_condition(tx, process_id, condition).await?;
                    tracing::debug!(node = %target.name, pass, "decision evaluated");
                    target_name = if pass {
                        then_next.clone()
                    } else {
                        else_next.clone()
                    };
                }
                NodeKind::End => {
                    Process::try_finish(&mut **tx, process_id).await?;
                    tracing::info!(%process_id, "process finished");
                    return Ok(None);
                }
                NodeKind::Human { .. } | NodeKind::Start { .. } => {
                    let task = Task::create(
                        &mut **tx,
                        process_id,
                        &target.name,
                        TaskStatus::New,
                        Uuid::new_v4(),
                    )
                    .await?;
                    return Ok(Some(task));
                }
            }
        }
    }

    async fn eval_condition(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        process_id: Uuid,
        condition: &BranchCondition,
    ) -> Result<bool, sqlx::Error> {
        match condition {
            BranchCondition::AnyLatestResultTrue { nodes, missing_as } => {
                for node in nodes {
                    let verdict =
                        AnalysisResult::latest_result_for_node(&mut **tx, process_id, node)
                            .await?
                            .flatten()
                            .unwrap_or(*missing_as);
                    if verdict {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    async fn load_task(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        task_id: Uuid,
    ) -> ActivationResult<Task> {
        let task = Task::find_by_id(&mut **tx, task_id)
            .await?
            .ok_or(ActivationError::TaskNotFound(task_id))?;
        if !self.flow.contains(&task.node) {
            return Err(ActivationError::UnknownNode(task.node.clone()));
        }
        Ok(task)
    }

    async fn reload_task(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        task_id: Uuid,
    ) -> ActivationResult<Task> {
        Task::find_by_id(&mut **tx, task_id)
            .await?
            .ok_or(ActivationError::TaskNotFound(task_id))
    }

    fn require_actor(&self, actor: &Actor) -> ActivationResult<()> {
        if !actor.authenticated {
            return Err(ActivationError::Unauthenticated);
        }
        Ok(())
    }
}

/// Source-faithful default action text per node.
fn default_action(node: &str, sn: &str) -> String {
    match node {
        n if n == nodes::PRODUCTION_TEST_FAIL => {
            format!("{sn}线上同一个测站测试fail三次")
        }
        n if n == nodes::FAE_INITIAL_RETEST => "FAE复测".to_string(),
        n if n == nodes::X_RAY_TEST => "X-ray test".to_string(),
        n if n == nodes::FAE_FINAL_RETEST => "回到产线前的复测".to_string(),
        n if n == nodes::SCRAPPED => "经过客户审批，决定报废".to_string(),
        n if n == nodes::RETURN_NORMAL_FLOW => {
            "问题已解决，经过客户同意，可以返回产线".to_string()
        }
        _ => "分析记录".to_string(),
    }
}

fn default_notes(node: &str, result: Option<bool>) -> String {
    if node == nodes::FAE_FINAL_RETEST || node == nodes::FAE_INITIAL_RETEST {
        match result {
            Some(true) => return "复测pass".to_string(),
            Some(false) => return "复测fail".to_string(),
            None => {}
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_offers_assign_and_cancel() {
        let transitions = TransitionKind::available_from(TaskStatus::New, false);
        assert_eq!(
            transitions,
            vec![TransitionKind::Assign, TransitionKind::Cancel]
        );
    }

    #[test]
    fn assigned_task_with_pending_data_cannot_restart() {
        let transitions = TransitionKind::available_from(TaskStatus::Assigned, true);
        assert!(!transitions.contains(&TransitionKind::Start));
    }

    #[test]
    fn started_task_with_data_offers_review_transitions() {
        let transitions = TransitionKind::available_from(TaskStatus::Started, true);
        assert!(transitions.contains(&TransitionKind::Approve));
        assert!(transitions.contains(&TransitionKind::Reject));
        assert!(!transitions.contains(&TransitionKind::Start));
    }

    #[test]
    fn terminal_tasks_offer_nothing() {
        assert!(TransitionKind::available_from(TaskStatus::Done, true).is_empty());
        assert!(TransitionKind::available_from(TaskStatus::Cancelled, false).is_empty());
    }

    #[test]
    fn start_is_the_only_non_manage_transition() {
        for kind in [
            TransitionKind::Assign,
            TransitionKind::Unassign,
            TransitionKind::Approve,
            TransitionKind::Reject,
            TransitionKind::Cancel,
            TransitionKind::Reassign,
        ] {
            assert!(kind.requires_manage());
        }
        assert!(!TransitionKind::Start.requires_manage());
    }
}
