//! `radosgw-admin` backed implementation of [`AdminOps`]
//!
//! Every operation shells out to the gateway admin tool and parses its JSON
//! output. The tool mutates global shared state with no transactions, so all
//! callers go through the reconciler's diff-then-write loop rather than
//! relying on any atomicity here.

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Error, Result};

use super::{
    AdminOps, PeriodScope, SyncFlowState, SyncFlowType, SyncGroupState, SyncPipeState,
    SyncPolicyState, UserCreds, ZoneGroupInfo, ZoneUpdate,
};

/// Admin client that executes the `radosgw-admin` tool
pub struct RadosgwAdmin {
    program: String,
}

impl RadosgwAdmin {
    /// Create a client using `radosgw-admin` from PATH
    pub fn new() -> Self {
        Self {
            program: "radosgw-admin".to_string(),
        }
    }

    /// Create a client using a specific executable path
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        debug!(program = %self.program, ?args, "running admin command");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::admin(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::admin(format!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_json(&self, args: &[String]) -> Result<Value> {
        let stdout = self.run(args).await?;
        serde_json::from_str(&stdout).map_err(|e| {
            Error::serialization(format!(
                "unexpected output from {} {}: {}",
                self.program,
                args.first().map(String::as_str).unwrap_or(""),
                e
            ))
        })
    }
}

impl Default for RadosgwAdmin {
    fn default() -> Self {
        Self::new()
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Extract a list of names from admin tool output.
///
/// List commands emit either a bare JSON array of names or an object holding
/// the array under a plural key (alongside `default_info`).
fn parse_name_list(value: &Value, key: &str) -> Vec<String> {
    let array = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get(key).and_then(Value::as_array) {
            Some(items) => items,
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    array
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("name")
                .or_else(|| obj.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

/// Extract the first key pair from user info/create output
fn parse_user_creds(value: &Value) -> Result<UserCreds> {
    let key = value
        .get("keys")
        .and_then(Value::as_array)
        .and_then(|keys| keys.first())
        .ok_or_else(|| Error::serialization("user output has no keys"))?;

    let access_key = key
        .get("access_key")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::serialization("user key has no access_key"))?;
    let secret_key = key
        .get("secret_key")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::serialization("user key has no secret_key"))?;

    Ok(UserCreds::new(access_key, secret_key))
}

fn parse_zone_names(value: &Value) -> Vec<String> {
    value
        .get("zones")
        .and_then(Value::as_array)
        .map(|zones| {
            zones
                .iter()
                .filter_map(|z| z.get("name").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Parse `sync group get` output into a [`SyncGroupState`].
///
/// The tool reports symmetrical flows with a `zones` list and directional
/// flows with explicit source/dest; both map onto [`SyncFlowState`].
fn parse_sync_group(group_id: &str, value: &Value) -> Option<SyncGroupState> {
    // Output is a list of {key, val} entries, one per group.
    let group = value.as_array()?.iter().find_map(|entry| {
        let val = entry.get("val")?;
        if entry.get("key").and_then(Value::as_str) == Some(group_id)
            || val.get("id").and_then(Value::as_str) == Some(group_id)
        {
            Some(val)
        } else {
            None
        }
    })?;

    let status = group
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut flows = Vec::new();
    if let Some(data_flow) = group.get("data_flow") {
        if let Some(symmetrical) = data_flow.get("symmetrical").and_then(Value::as_array) {
            for flow in symmetrical {
                let id = flow.get("id").and_then(Value::as_str).unwrap_or_default();
                let zones: Vec<&str> = flow
                    .get("zones")
                    .and_then(Value::as_array)
                    .map(|z| z.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                if zones.len() >= 2 {
                    flows.push(SyncFlowState {
                        id: id.to_string(),
                        flow_type: SyncFlowType::Symmetrical,
                        source_zone: zones[0].to_string(),
                        dest_zone: zones[1].to_string(),
                    });
                }
            }
        }
        if let Some(directional) = data_flow.get("directional").and_then(Value::as_array) {
            for flow in directional {
                flows.push(SyncFlowState {
                    id: flow
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    flow_type: SyncFlowType::Directional,
                    source_zone: flow
                        .get("source_zone")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    dest_zone: flow
                        .get("dest_zone")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }
    }

    let pipes = group
        .get("pipes")
        .and_then(Value::as_array)
        .map(|pipes| {
            pipes
                .iter()
                .map(|pipe| SyncPipeState {
                    id: pipe
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    source_zones: pipe
                        .get("source")
                        .and_then(|s| s.get("zones"))
                        .and_then(Value::as_array)
                        .map(|z| {
                            z.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                    dest_zones: pipe
                        .get("dest")
                        .and_then(|d| d.get("zones"))
                        .and_then(Value::as_array)
                        .map(|z| {
                            z.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(SyncGroupState {
        id: group_id.to_string(),
        status,
        flows,
        pipes,
    })
}

#[async_trait]
impl AdminOps for RadosgwAdmin {
    async fn list_realms(&self) -> Result<Vec<String>> {
        let value = self.run_json(&args(&["realm", "list"])).await?;
        Ok(parse_name_list(&value, "realms"))
    }

    async fn list_zonegroups(&self) -> Result<Vec<String>> {
        let value = self.run_json(&args(&["zonegroup", "list"])).await?;
        Ok(parse_name_list(&value, "zonegroups"))
    }

    async fn list_zones(&self) -> Result<Vec<String>> {
        let value = self.run_json(&args(&["zone", "list"])).await?;
        Ok(parse_name_list(&value, "zones"))
    }

    async fn list_users(&self) -> Result<Vec<String>> {
        let value = self.run_json(&args(&["user", "list"])).await?;
        Ok(parse_name_list(&value, "keys"))
    }

    async fn create_realm(&self, name: &str, default: bool) -> Result<()> {
        let mut cmd = args(&["realm", "create"]);
        cmd.push(format!("--rgw-realm={}", name));
        if default {
            cmd.push("--default".to_string());
        }
        self.run(&cmd).await.map(drop)
    }

    async fn create_zonegroup(
        &self,
        name: &str,
        endpoints: &[String],
        default: bool,
        master: bool,
        realm: &str,
    ) -> Result<()> {
        let mut cmd = args(&["zonegroup", "create"]);
        cmd.push(format!("--rgw-zonegroup={}", name));
        cmd.push(format!("--endpoints={}", endpoints.join(",")));
        cmd.push(format!("--rgw-realm={}", realm));
        if default {
            cmd.push("--default".to_string());
        }
        if master {
            cmd.push("--master".to_string());
        }
        self.run(&cmd).await.map(drop)
    }

    async fn create_zone(
        &self,
        name: &str,
        endpoints: &[String],
        default: bool,
        master: bool,
        zonegroup: &str,
        creds: Option<UserCreds>,
    ) -> Result<()> {
        let mut cmd = args(&["zone", "create"]);
        cmd.push(format!("--rgw-zone={}", name));
        cmd.push(format!("--endpoints={}", endpoints.join(",")));
        cmd.push(format!("--rgw-zonegroup={}", zonegroup));
        if default {
            cmd.push("--default".to_string());
        }
        if master {
            cmd.push("--master".to_string());
        }
        if let Some(creds) = creds {
            cmd.push(format!("--access-key={}", creds.access_key));
            cmd.push(format!("--secret={}", creds.secret_key));
        }
        self.run(&cmd).await.map(drop)
    }

    async fn modify_zone(&self, name: &str, update: &ZoneUpdate) -> Result<()> {
        let mut cmd = args(&["zone", "modify"]);
        cmd.push(format!("--rgw-zone={}", name));
        if let Some(endpoints) = &update.endpoints {
            cmd.push(format!("--endpoints={}", endpoints.join(",")));
        }
        if let Some(creds) = &update.creds {
            cmd.push(format!("--access-key={}", creds.access_key));
            cmd.push(format!("--secret={}", creds.secret_key));
        }
        if update.default == Some(true) {
            cmd.push("--default".to_string());
        }
        if update.master == Some(true) {
            cmd.push("--master".to_string());
        }
        if let Some(zonegroup) = &update.zonegroup {
            cmd.push(format!("--rgw-zonegroup={}", zonegroup));
        }
        if let Some(realm) = &update.realm {
            cmd.push(format!("--rgw-realm={}", realm));
        }
        self.run(&cmd).await.map(drop)
    }

    async fn modify_zonegroup(&self, name: &str, endpoints: &[String], realm: &str) -> Result<()> {
        let mut cmd = args(&["zonegroup", "modify"]);
        cmd.push(format!("--rgw-zonegroup={}", name));
        cmd.push(format!("--endpoints={}", endpoints.join(",")));
        cmd.push(format!("--rgw-realm={}", realm));
        self.run(&cmd).await.map(drop)
    }

    async fn rename_zonegroup(&self, old: &str, new: &str) -> Result<()> {
        let mut cmd = args(&["zonegroup", "rename"]);
        cmd.push(format!("--rgw-zonegroup={}", old));
        cmd.push(format!("--zonegroup-new-name={}", new));
        self.run(&cmd).await.map(drop)
    }

    async fn rename_zone(&self, old: &str, new: &str) -> Result<()> {
        let mut cmd = args(&["zone", "rename"]);
        cmd.push(format!("--rgw-zone={}", old));
        cmd.push(format!("--zone-new-name={}", new));
        self.run(&cmd).await.map(drop)
    }

    async fn zonegroup_info(&self, name: &str) -> Result<ZoneGroupInfo> {
        let mut cmd = args(&["zonegroup", "get"]);
        cmd.push(format!("--rgw-zonegroup={}", name));
        let value = self.run_json(&cmd).await?;

        Ok(ZoneGroupInfo {
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string(),
            zones: parse_zone_names(&value),
        })
    }

    async fn remove_zone_from_zonegroup(&self, zone: &str, zonegroup: &str) -> Result<()> {
        let mut cmd = args(&["zonegroup", "remove"]);
        cmd.push(format!("--rgw-zonegroup={}", zonegroup));
        cmd.push(format!("--rgw-zone={}", zone));
        self.run(&cmd).await.map(drop)
    }

    async fn create_user(&self, name: &str, system: bool) -> Result<UserCreds> {
        let mut cmd = args(&["user", "create"]);
        cmd.push(format!("--uid={}", name));
        cmd.push(format!("--display-name=Synchronization User ({})", name));
        if system {
            cmd.push("--system".to_string());
        }
        let value = self.run_json(&cmd).await?;
        parse_user_creds(&value)
    }

    async fn user_creds(&self, name: &str) -> Result<UserCreds> {
        let mut cmd = args(&["user", "info"]);
        cmd.push(format!("--uid={}", name));
        let value = self.run_json(&cmd).await?;
        parse_user_creds(&value)
    }

    async fn suspend_user(&self, name: &str) -> Result<()> {
        let mut cmd = args(&["user", "suspend"]);
        cmd.push(format!("--uid={}", name));
        self.run(&cmd).await.map(drop)
    }

    async fn sync_group(&self, group_id: &str) -> Result<Option<SyncGroupState>> {
        let mut cmd = args(&["sync", "group", "get"]);
        cmd.push(format!("--group-id={}", group_id));
        match self.run_json(&cmd).await {
            Ok(value) => Ok(parse_sync_group(group_id, &value)),
            // A missing group is reported as a command failure, not as an
            // empty document.
            Err(Error::Admin(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_sync_group(&self, group_id: &str, status: SyncPolicyState) -> Result<()> {
        let mut cmd = args(&["sync", "group", "create"]);
        cmd.push(format!("--group-id={}", group_id));
        cmd.push(format!("--status={}", status));
        self.run(&cmd).await.map(drop)
    }

    async fn create_sync_group_flow(
        &self,
        group_id: &str,
        flow_id: &str,
        flow_type: SyncFlowType,
        source_zone: &str,
        dest_zone: &str,
    ) -> Result<()> {
        let mut cmd = args(&["sync", "group", "flow", "create"]);
        cmd.push(format!("--group-id={}", group_id));
        cmd.push(format!("--flow-id={}", flow_id));
        cmd.push(format!("--flow-type={}", flow_type));
        match flow_type {
            SyncFlowType::Symmetrical => {
                cmd.push(format!("--zones={},{}", source_zone, dest_zone));
            }
            SyncFlowType::Directional => {
                cmd.push(format!("--source-zone={}", source_zone));
                cmd.push(format!("--dest-zone={}", dest_zone));
            }
        }
        self.run(&cmd).await.map(drop)
    }

    async fn create_sync_group_pipe(
        &self,
        group_id: &str,
        pipe_id: &str,
        source_zones: &[String],
        dest_zones: &[String],
    ) -> Result<()> {
        let mut cmd = args(&["sync", "group", "pipe", "create"]);
        cmd.push(format!("--group-id={}", group_id));
        cmd.push(format!("--pipe-id={}", pipe_id));
        cmd.push(format!("--source-zones={}", source_zones.join(",")));
        cmd.push(format!("--dest-zones={}", dest_zones.join(",")));
        cmd.push("--source-bucket=*".to_string());
        cmd.push("--dest-bucket=*".to_string());
        self.run(&cmd).await.map(drop)
    }

    async fn pull_realm(&self, url: &str, creds: &UserCreds) -> Result<()> {
        let mut cmd = args(&["realm", "pull"]);
        cmd.push(format!("--url={}", url));
        cmd.push(format!("--access-key={}", creds.access_key));
        cmd.push(format!("--secret={}", creds.secret_key));
        self.run(&cmd).await.map(drop)
    }

    async fn pull_period(&self, url: &str, creds: &UserCreds) -> Result<()> {
        let mut cmd = args(&["period", "pull"]);
        cmd.push(format!("--url={}", url));
        cmd.push(format!("--access-key={}", creds.access_key));
        cmd.push(format!("--secret={}", creds.secret_key));
        self.run(&cmd).await.map(drop)
    }

    async fn set_default_realm(&self, name: &str) -> Result<()> {
        let mut cmd = args(&["realm", "default"]);
        cmd.push(format!("--rgw-realm={}", name));
        self.run(&cmd).await.map(drop)
    }

    async fn update_period(&self, scope: &PeriodScope, fatal: bool) -> Result<()> {
        let mut cmd = args(&["period", "update", "--commit"]);
        if let Some(realm) = &scope.realm {
            cmd.push(format!("--rgw-realm={}", realm));
        }
        if let Some(zonegroup) = &scope.zonegroup {
            cmd.push(format!("--rgw-zonegroup={}", zonegroup));
        }
        if let Some(zone) = &scope.zone {
            cmd.push(format!("--rgw-zone={}", zone));
        }

        match self.run(&cmd).await {
            Ok(_) => Ok(()),
            Err(e) if !fatal => {
                warn!(error = %e, "period update failed (non-fatal)");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn cluster_has_buckets(&self) -> Result<bool> {
        let value = self.run_json(&args(&["bucket", "list"])).await?;
        Ok(value
            .as_array()
            .map(|buckets| !buckets.is_empty())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn name_list_parses_bare_arrays() {
        let value = json!(["alice", "bob"]);
        assert_eq!(parse_name_list(&value, "keys"), vec!["alice", "bob"]);
    }

    #[test]
    fn name_list_parses_keyed_objects() {
        let value = json!({"default_info": "abc", "realms": ["replicated"]});
        assert_eq!(parse_name_list(&value, "realms"), vec!["replicated"]);
    }

    #[test]
    fn name_list_tolerates_missing_key() {
        let value = json!({"other": []});
        assert!(parse_name_list(&value, "zones").is_empty());
    }

    #[test]
    fn user_creds_come_from_first_key() {
        let value = json!({
            "user_id": "multisite-sync",
            "keys": [
                {"user": "multisite-sync", "access_key": "AK", "secret_key": "SK"},
                {"user": "multisite-sync", "access_key": "AK2", "secret_key": "SK2"}
            ]
        });
        let creds = parse_user_creds(&value).unwrap();
        assert_eq!(creds.access_key, "AK");
        assert_eq!(creds.secret_key, "SK");
    }

    #[test]
    fn user_without_keys_is_a_serialization_error() {
        let value = json!({"user_id": "x", "keys": []});
        assert!(matches!(
            parse_user_creds(&value),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn zonegroup_zones_are_extracted_by_name() {
        let value = json!({
            "name": "rgw-east",
            "master_zone": "1234",
            "zones": [{"name": "east-1"}, {"name": "west-1"}]
        });
        assert_eq!(parse_zone_names(&value), vec!["east-1", "west-1"]);
    }

    #[test]
    fn sync_group_output_maps_flows_and_pipes() {
        let value = json!([{
            "key": "default",
            "val": {
                "id": "default",
                "status": "enabled",
                "data_flow": {
                    "directional": [
                        {"id": "east-1-west-1", "source_zone": "east-1", "dest_zone": "west-1"}
                    ]
                },
                "pipes": [{
                    "id": "east-1-west-1",
                    "source": {"zones": ["east-1"]},
                    "dest": {"zones": ["west-1"]}
                }]
            }
        }]);

        let group = parse_sync_group("default", &value).unwrap();
        assert_eq!(group.status, "enabled");
        assert_eq!(group.flows.len(), 1);
        assert_eq!(group.flows[0].flow_type, SyncFlowType::Directional);
        assert_eq!(group.flows[0].source_zone, "east-1");
        assert_eq!(group.pipes[0].dest_zones, vec!["west-1"]);
    }

    #[test]
    fn sync_group_symmetrical_flows_use_the_zones_list() {
        let value = json!([{
            "key": "default",
            "val": {
                "id": "default",
                "status": "allowed",
                "data_flow": {
                    "symmetrical": [
                        {"id": "east-1-west-1", "zones": ["east-1", "west-1"]}
                    ]
                },
                "pipes": []
            }
        }]);

        let group = parse_sync_group("default", &value).unwrap();
        assert_eq!(group.flows[0].flow_type, SyncFlowType::Symmetrical);
        assert_eq!(group.flows[0].source_zone, "east-1");
        assert_eq!(group.flows[0].dest_zone, "west-1");
    }

    #[test]
    fn sync_group_absent_from_output_is_none() {
        let value = json!([{"key": "other", "val": {"id": "other"}}]);
        assert!(parse_sync_group("default", &value).is_none());
    }
}
