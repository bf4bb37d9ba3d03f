//! Node-operation authorization gate.
//!
//! Two independent axes, checked in order and fail-closed: which roles may
//! perform an operation kind (matched from the request path), and which
//! departments may touch a given node at all. A path that matches no
//! operation pattern, or a node with no department restriction, is a
//! short-circuit allow.

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use super::{
    config::{OperationRule, PermissionRules},
    directory::{normalize, Actor},
};

/// Role that carries the manage-level permissions (assign, approve, cancel).
pub const SUPERVISOR_ROLE: &str = "部门主管";
/// Rank-and-file role allowed to submit node data.
pub const STAFF_ROLE: &str = "普通员工";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Assign,
    Submit,
    Approve,
}

/// Why the gate said no. Every variant maps to a distinct operator-facing
/// message; none of them leak internals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    Unauthenticated,
    MissingTaskId,
    TaskNotFound,
    MissingDepartment,
    WrongDepartment { required: Vec<String> },
    WrongRole { required: Vec<String> },
}

impl DenialReason {
    /// Stable machine-readable code carried in the 403 payload.
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::Unauthenticated => "unauthenticated",
            DenialReason::MissingTaskId => "missing_task_id",
            DenialReason::TaskNotFound => "task_not_found",
            DenialReason::MissingDepartment => "missing_department",
            DenialReason::WrongDepartment { .. } => "wrong_department",
            DenialReason::WrongRole { .. } => "wrong_role",
        }
    }

    pub fn message(&self) -> String {
        match self {
            DenialReason::Unauthenticated => "请先登录系统".to_string(),
            DenialReason::MissingTaskId => "缺少任务ID参数".to_string(),
            DenialReason::TaskNotFound => "任务不存在或已被删除".to_string(),
            DenialReason::MissingDepartment => {
                "用户部门信息不完整，请联系管理员配置".to_string()
            }
            DenialReason::WrongDepartment { required } => {
                format!("需要{}部门权限", required.join("/"))
            }
            DenialReason::WrongRole { required } => {
                format!("需要{}角色权限", required.join("/"))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid operation pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

#[derive(Debug)]
struct CompiledRule {
    pattern: Regex,
    operation: OperationKind,
    roles: Vec<String>,
}

pub struct PermissionGate {
    rules: Vec<CompiledRule>,
    node_departments: Vec<(String, Vec<String>)>,
}

/// Outcome of a path match: the operation kind and the roles it demands.
#[derive(Debug, Clone)]
pub struct MatchedOperation {
    pub operation: OperationKind,
    pub roles: Vec<String>,
}

impl PermissionGate {
    /// Compile the configured patterns once; malformed config fails startup.
    pub fn from_rules(rules: &PermissionRules) -> Result<Self, GateError> {
        let compiled = rules
            .operations
            .iter()
            .map(|OperationRule { pattern, operation, roles }| {
                Regex::new(pattern)
                    .map(|re| CompiledRule {
                        pattern: re,
                        operation: *operation,
                        roles: roles.clone(),
                    })
                    .map_err(|source| GateError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules: compiled,
            node_departments: rules
                .node_departments
                .iter()
                .map(|(node, depts)| (node.clone(), depts.clone()))
                .collect(),
        })
    }

    /// First matching operation pattern wins; no match means no restriction.
    pub fn match_operation(&self, path: &str) -> Option<MatchedOperation> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(path))
            .map(|rule| MatchedOperation {
                operation: rule.operation,
                roles: rule.roles.clone(),
            })
    }

    pub fn departments_for_node(&self, node: &str) -> Option<&[String]> {
        let node = node.trim();
        self.node_departments
            .iter()
            .find(|(name, _)| name == node)
            .map(|(_, depts)| depts.as_slice())
    }

    /// Roles the configuration grants an operation kind, if it is gated.
    pub fn roles_for_operation(&self, operation: OperationKind) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|rule| rule.operation == operation)
            .map(|rule| rule.roles.as_slice())
    }

    /// Department-then-role check for a matched operation on a node.
    ///
    /// A node without a department restriction is open to anyone, role
    /// included — if no department cares about the node, no rank does
    /// either (the source middleware's short-circuit).
    pub fn check(
        &self,
        matched: &MatchedOperation,
        node: &str,
        actor: &Actor,
    ) -> Result<(), DenialReason> {
        let Some(required_departments) = self.departments_for_node(node) else {
            return Ok(());
        };

        if !actor.authenticated {
            return Err(DenialReason::Unauthenticated);
        }

        let Some(department) = actor.department.as_deref().filter(|d| !d.trim().is_empty())
        else {
            return Err(DenialReason::MissingDepartment);
        };

        let department = normalize(department);
        if !required_departments
            .iter()
            .any(|d| normalize(d) == department)
        {
            return Err(DenialReason::WrongDepartment {
                required: required_departments.to_vec(),
            });
        }

        if !actor.has_any_role(&matched.roles) {
            return Err(DenialReason::WrongRole {
                required: matched.roles.clone(),
            });
        }

        Ok(())
    }

    /// Role-only view used by the actions resolver (the department axis is
    /// applied separately there, before any transition is listed).
    pub fn actor_may_operate(&self, operation: OperationKind, actor: &Actor) -> bool {
        match self.roles_for_operation(operation) {
            Some(roles) => actor.has_any_role(roles),
            None => true,
        }
    }

    /// Department axis alone, for a node.
    pub fn actor_in_node_department(&self, node: &str, actor: &Actor) -> bool {
        match self.departments_for_node(node) {
            None => true,
            Some(required) => actor
                .department
                .as_deref()
                .map(|d| {
                    let d = normalize(d);
                    required.iter().any(|r| normalize(r) == d)
                })
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::config::PermissionRules;

    fn gate() -> PermissionGate {
        PermissionGate::from_rules(&PermissionRules::default()).unwrap()
    }

    fn actor(department: &str, roles: &[&str]) -> Actor {
        Actor {
            username: "w001".to_string(),
            department: Some(department.to_string()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            authenticated: true,
        }
    }

    #[test]
    fn unmatched_path_is_unrestricted() {
        assert!(gate()
            .match_operation("/workflows/p1/production_test_fail/t1/cancel")
            .is_none());
        assert!(gate().match_operation("/devices").is_none());
    }

    #[test]
    fn approve_requires_supervisor_role() {
        let gate = gate();
        let matched = gate
            .match_operation("/workflows/p1/X_ray_test/t1/approve")
            .unwrap();
        assert_eq!(matched.operation, OperationKind::Approve);

        let staff = actor("FAE", &[STAFF_ROLE]);
        let err = gate.check(&matched, "X_ray_test", &staff).unwrap_err();
        assert!(matches!(err, DenialReason::WrongRole { .. }));

        let supervisor = actor("FAE", &[SUPERVISOR_ROLE]);
        assert!(gate.check(&matched, "X_ray_test", &supervisor).is_ok());
    }

    #[test]
    fn department_checked_before_role() {
        // Supervisor rank in the wrong department is still turned away.
        let gate = gate();
        let matched = gate
            .match_operation("/workflows/p1/X_ray_test/t1/approve")
            .unwrap();
        let me_supervisor = actor("ME", &[SUPERVISOR_ROLE]);
        let err = gate.check(&matched, "X_ray_test", &me_supervisor).unwrap_err();
        assert!(matches!(err, DenialReason::WrongDepartment { .. }));
    }

    #[test]
    fn staff_may_submit_in_own_department() {
        let gate = gate();
        let matched = gate
            .match_operation("/workflows/p1/me_analysis/t1/execute")
            .unwrap();
        assert_eq!(matched.operation, OperationKind::Submit);
        let staff = actor("ME", &[STAFF_ROLE]);
        assert!(gate.check(&matched, "me_analysis", &staff).is_ok());
    }

    #[test]
    fn department_comparison_is_normalized() {
        let gate = gate();
        let matched = gate
            .match_operation("/workflows/p1/FAE_initial_retest/t1/execute")
            .unwrap();
        let staff = actor(" fae ", &[STAFF_ROLE]);
        assert!(gate.check(&matched, "FAE_initial_retest", &staff).is_ok());
    }

    #[test]
    fn unrestricted_node_allows_anyone() {
        let gate = gate();
        let matched = gate
            .match_operation("/workflows/p1/some_future_node/t1/execute")
            .unwrap();
        let anon = Actor::anonymous();
        assert!(gate.check(&matched, "some_future_node", &anon).is_ok());
    }

    #[test]
    fn missing_department_is_its_own_reason() {
        let gate = gate();
        let matched = gate
            .match_operation("/workflows/p1/scrapped/t1/approve")
            .unwrap();
        let mut no_dept = actor("", &[SUPERVISOR_ROLE]);
        no_dept.department = None;
        let err = gate.check(&matched, "scrapped", &no_dept).unwrap_err();
        assert!(matches!(err, DenialReason::MissingDepartment));
    }

    #[test]
    fn unauthenticated_denied_on_restricted_node() {
        let gate = gate();
        let matched = gate
            .match_operation("/workflows/p1/scrapped/t1/execute")
            .unwrap();
        let err = gate.check(&matched, "scrapped", &Actor::anonymous()).unwrap_err();
        assert!(matches!(err, DenialReason::Unauthenticated));
    }
}
