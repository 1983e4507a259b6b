use crate::config::ReplicationConfig;
use crate::error::SnapError;
use crate::hooks::ReplicationConfigProvider;
use parking_lot::RwLock;
use std::collections::HashMap;

pub const REPLICATE_TO_REMOTE: &str = "replicate_to_remote";
pub const REPLICATION_ASYNC: &str = "replication_async";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysVarValue {
    Text(String),
    Bool(bool),
    Int(i64),
}

impl From<&str> for SysVarValue {
    fn from(v: &str) -> Self {
        SysVarValue::Text(v.to_string())
    }
}

impl From<bool> for SysVarValue {
    fn from(v: bool) -> Self {
        SysVarValue::Bool(v)
    }
}

impl From<i64> for SysVarValue {
    fn from(v: i64) -> Self {
        SysVarValue::Int(v)
    }
}

/// Session-visible variables. Names are case-insensitive.
#[derive(Debug)]
pub struct SystemVariables {
    vars: RwLock<HashMap<String, SysVarValue>>,
}

impl Default for SystemVariables {
    fn default() -> Self {
        let vars = SystemVariables::empty();
        vars.set(REPLICATE_TO_REMOTE, "");
        vars.set(REPLICATION_ASYNC, false);
        vars
    }
}

impl SystemVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// No variables registered, not even the replication ones.
    pub fn empty() -> Self {
        Self {
            vars: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, name: &str, value: impl Into<SysVarValue>) {
        self.vars.write().insert(name.to_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<SysVarValue> {
        self.vars.read().get(&name.to_lowercase()).cloned()
    }

    fn require(&self, name: &str) -> Result<SysVarValue, SnapError> {
        self.get(name)
            .ok_or_else(|| SnapError::ReplicationConfig(format!("unknown system variable '{name}'")))
    }
}

fn as_bool(name: &str, value: &SysVarValue) -> Result<bool, SnapError> {
    match value {
        SysVarValue::Bool(b) => Ok(*b),
        SysVarValue::Int(0) => Ok(false),
        SysVarValue::Int(1) => Ok(true),
        SysVarValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "on" | "true" => Ok(true),
            "0" | "off" | "false" | "" => Ok(false),
            other => Err(SnapError::ReplicationConfig(format!(
                "'{other}' is not a boolean for {name}"
            ))),
        },
        SysVarValue::Int(i) => Err(SnapError::ReplicationConfig(format!(
            "{i} is not a boolean for {name}"
        ))),
    }
}

impl ReplicationConfigProvider for SystemVariables {
    fn replication_config(&self) -> Result<ReplicationConfig, SnapError> {
        let remote = match self.require(REPLICATE_TO_REMOTE)? {
            SysVarValue::Text(s) => s.trim().to_string(),
            other => {
                return Err(SnapError::ReplicationConfig(format!(
                    "{REPLICATE_TO_REMOTE} must be a string, got {other:?}"
                )));
            }
        };
        let async_mode = as_bool(REPLICATION_ASYNC, &self.require(REPLICATION_ASYNC)?)?;
        Ok(ReplicationConfig { remote, async_mode })
    }
}

#[cfg(test)]
mod tests {
    use super::{REPLICATE_TO_REMOTE, REPLICATION_ASYNC, SystemVariables};
    use crate::error::SnapErrorCode;
    use crate::hooks::ReplicationConfigProvider;

    #[test]
    fn defaults_disable_replication() {
        let vars = SystemVariables::new();
        let cfg = vars.replication_config().expect("config");
        assert!(!cfg.is_enabled());
        assert!(!cfg.async_mode);
    }

    #[test]
    fn reads_remote_and_async_flag() {
        let vars = SystemVariables::new();
        vars.set("REPLICATE_TO_REMOTE", " origin ");
        vars.set(REPLICATION_ASYNC, "ON");
        let cfg = vars.replication_config().expect("config");
        assert_eq!(cfg.remote, "origin");
        assert!(cfg.async_mode);
    }

    #[test]
    fn missing_or_malformed_variables_are_config_errors() {
        let err = SystemVariables::empty().replication_config().unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::ReplicationConfig);

        let vars = SystemVariables::new();
        vars.set(REPLICATE_TO_REMOTE, 5i64);
        let err = vars.replication_config().unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::ReplicationConfig);

        let vars = SystemVariables::new();
        vars.set(REPLICATION_ASYNC, 7i64);
        assert!(vars.replication_config().is_err());
    }
}
