use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::{
    flow::nodes,
    permission::{OperationKind, STAFF_ROLE, SUPERVISOR_ROLE},
};

/// One URL-operation gate entry: which roles may hit paths matching the
/// pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRule {
    pub pattern: String,
    pub operation: OperationKind,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionRules {
    pub operations: Vec<OperationRule>,
    pub node_departments: BTreeMap<String, Vec<String>>,
}

impl Default for PermissionRules {
    fn default() -> Self {
        let role = |r: &str| r.to_string();
        let depts = |ds: &[&str]| ds.iter().map(|d| d.to_string()).collect::<Vec<_>>();

        Self {
            operations: vec![
                OperationRule {
                    pattern: r"^/workflows/.+/assign$".to_string(),
                    operation: OperationKind::Assign,
                    roles: vec![role(SUPERVISOR_ROLE)],
                },
                OperationRule {
                    pattern: r"^/workflows/.+/execute$".to_string(),
                    operation: OperationKind::Submit,
                    roles: vec![role(STAFF_ROLE), role(SUPERVISOR_ROLE)],
                },
                OperationRule {
                    pattern: r"^/workflows/.+/approve$".to_string(),
                    operation: OperationKind::Approve,
                    roles: vec![role(SUPERVISOR_ROLE)],
                },
            ],
            node_departments: BTreeMap::from([
                (nodes::PRODUCTION_TEST_FAIL.to_string(), depts(&["产线"])),
                (nodes::FAE_INITIAL_RETEST.to_string(), depts(&["FAE"])),
                (nodes::X_RAY_TEST.to_string(), depts(&["FAE"])),
                (nodes::ENGINEERING_ANALYSIS.to_string(), depts(&["EE", "SW"])),
                (nodes::ME_ANALYSIS.to_string(), depts(&["ME"])),
                (nodes::RETURN_NORMAL_FLOW.to_string(), depts(&["Clients"])),
                (nodes::FAE_FINAL_RETEST.to_string(), depts(&["FAE"])),
                (nodes::SCRAPPED.to_string(), depts(&["Clients"])),
            ]),
        }
    }
}

/// Static directory row backing the actor lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeEntry {
    pub username: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub database_path: Option<PathBuf>,
    /// Branch outcome a decision node uses for a source node with no
    /// recorded verdict. The source system routed unknown to Else.
    pub decision_missing_as: bool,
    pub permissions: PermissionRules,
    pub employees: Vec<EmployeeEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: None,
            decision_missing_as: false,
            permissions: PermissionRules::default(),
            employees: Vec::new(),
        }
    }
}

impl Config {
    /// Load from a JSON file, falling back to the built-in defaults when no
    /// file is present.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) if p.exists() => {
                let raw = fs::read_to_string(p)?;
                let config = serde_json::from_str(&raw)?;
                tracing::info!("loaded config from {}", p.display());
                Ok(config)
            }
            Some(p) => {
                tracing::warn!("config file {} not found, using defaults", p.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn load_from_env() -> anyhow::Result<Self> {
        let path = std::env::var_os("TRIAGE_CONFIG").map(PathBuf::from);
        Self::load(path.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port, 8080);
        assert_eq!(back.permissions.operations.len(), 3);
        assert_eq!(
            back.permissions.node_departments["me_analysis"],
            vec!["ME".to_string()]
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/config.json"))).unwrap();
        assert!(!config.decision_missing_as);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"port": 9999}"#).unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.permissions.operations.len(), 3);
    }
}
