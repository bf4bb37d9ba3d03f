//! Actor identity as consumed by the engine.
//!
//! The employee directory itself is an external system; the engine only
//! needs "which department is this user in, which roles do they hold". A
//! config-backed lookup stands in for it here.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::config::EmployeeEntry;

/// The authenticated (or anonymous) user attempting an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    pub department: Option<String>,
    pub roles: Vec<String>,
    pub authenticated: bool,
}

impl Actor {
    pub fn anonymous() -> Self {
        Self {
            username: String::new(),
            department: None,
            roles: Vec::new(),
            authenticated: false,
        }
    }

    /// Role comparison is normalized: trimmed, case-insensitive.
    pub fn has_role(&self, role: &str) -> bool {
        let wanted = normalize(role);
        self.roles.iter().any(|r| normalize(r) == wanted)
    }

    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }
}

pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn lookup(&self, username: &str) -> Option<Actor>;
}

/// Directory backed by the static employee table in the config file.
pub struct StaticDirectory {
    entries: HashMap<String, Actor>,
}

impl StaticDirectory {
    pub fn new(employees: &[EmployeeEntry]) -> Self {
        let entries = employees
            .iter()
            .map(|e| {
                (
                    e.username.clone(),
                    Actor {
                        username: e.username.clone(),
                        department: e.department.clone(),
                        roles: e.roles.clone(),
                        authenticated: true,
                    },
                )
            })
            .collect();
        Self { entries }
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn lookup(&self, username: &str) -> Option<Actor> {
        self.entries.get(username).cloned()
    }
}
