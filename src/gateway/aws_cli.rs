//! Backend that drives the `aws` command-line client with JSON output

use super::session::Connector;
use super::{
    Account, AccountAssignment, AssignmentOperation, AssignmentTarget, DirectoryBackend, Group,
    Instance, Membership, OperationState, OperationStatus, PRINCIPAL_TYPE_GROUP, Page, User,
    short_arn,
};
use crate::error::{IdcError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// Items requested per page from paginated operations
const PAGE_SIZE: &str = "100";

/// Runs `aws` subcommands for one profile and region
#[derive(Debug, Clone)]
pub struct AwsCliBackend {
    program: String,
    profile: String,
    region: String,
}

impl AwsCliBackend {
    pub fn new(
        program: impl Into<String>,
        profile: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            profile: profile.into(),
            region: region.into(),
        }
    }

    fn args(
        &self,
        service: &str,
        operation: &str,
        params: &[(&str, &str)],
        page: Option<Option<&str>>,
    ) -> Vec<String> {
        let mut args: Vec<String> = [
            service,
            operation,
            "--profile",
            self.profile.as_str(),
            "--region",
            self.region.as_str(),
            "--output",
            "json",
            "--no-cli-pager",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        for (flag, value) in params {
            args.push(format!("--{}", flag));
            args.push(value.to_string());
        }

        if let Some(token) = page {
            args.push("--max-items".into());
            args.push(PAGE_SIZE.into());
            if let Some(token) = token {
                args.push("--starting-token".into());
                args.push(token.to_string());
            }
        }

        args
    }

    async fn run(&self, args: Vec<String>) -> Result<String> {
        debug!(program = %self.program, args = ?args, "aws call");

        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(&self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(status = ?output.status.code(), stderr = %stderr, "aws call failed");
            return Err(IdcError::from_backend_message(if stderr.is_empty() {
                format!("{} {} exited with {}", args[0], args[1], output.status)
            } else {
                stderr
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let stdout = self
            .run(self.args(service, operation, params, None))
            .await?;
        parse(&stdout)
    }

    async fn call_paged<T: DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        params: &[(&str, &str)],
        token: Option<&str>,
    ) -> Result<T> {
        let stdout = self
            .run(self.args(service, operation, params, Some(token)))
            .await?;
        parse(&stdout)
    }

    async fn call_unit(
        &self,
        service: &str,
        operation: &str,
        params: &[(&str, &str)],
    ) -> Result<()> {
        self.run(self.args(service, operation, params, None))
            .await
            .map(drop)
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> IdcError {
    if e.kind() == ErrorKind::NotFound {
        IdcError::Config(format!(
            "AWS CLI '{}' not found; install it or set aws_cli in config.toml",
            program
        ))
    } else {
        IdcError::Io(e)
    }
}

/// Empty stdout (e.g. delete operations) parses as `{}`
fn parse<T: DeserializeOwned>(stdout: &str) -> Result<T> {
    let body = stdout.trim();
    Ok(serde_json::from_str(if body.is_empty() { "{}" } else { body })?)
}

fn non_empty(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.is_empty())
}

// Response shapes

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListInstancesOutput {
    #[serde(default)]
    instances: Vec<InstanceRecord>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceRecord {
    #[serde(default)]
    instance_arn: String,
    #[serde(default)]
    identity_store_id: String,
    #[serde(default)]
    owner_account_id: String,
    #[serde(default)]
    name: Option<String>,
}

impl From<InstanceRecord> for Instance {
    fn from(record: InstanceRecord) -> Self {
        let display_name = record
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| short_arn(&record.instance_arn).to_string());
        Instance {
            arn: record.instance_arn,
            identity_store_id: record.identity_store_id,
            display_name,
            owner_account_id: record.owner_account_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListGroupsOutput {
    #[serde(default)]
    groups: Vec<GroupRecord>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupRecord {
    group_id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateGroupOutput {
    group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListMembershipsOutput {
    #[serde(default)]
    group_memberships: Vec<MembershipRecord>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MembershipRecord {
    #[serde(default)]
    membership_id: String,
    #[serde(default)]
    member_id: Option<MemberId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MemberId {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateMembershipOutput {
    membership_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListUsersOutput {
    #[serde(default)]
    users: Vec<UserRecord>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserRecord {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    emails: Vec<EmailRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EmailRecord {
    value: Option<String>,
    #[serde(default)]
    primary: bool,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        let email = record
            .emails
            .iter()
            .find(|e| e.primary)
            .or_else(|| record.emails.first())
            .and_then(|e| e.value.clone())
            .unwrap_or_default();
        User {
            id: record.user_id,
            display_name: record.display_name.unwrap_or_default(),
            user_name: record.user_name.unwrap_or_default(),
            email,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListAccountsOutput {
    #[serde(default)]
    accounts: Vec<AccountRecord>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccountRecord {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPermissionSetsOutput {
    #[serde(default)]
    permission_sets: Vec<String>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribePermissionSetOutput {
    permission_set: Option<PermissionSetRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PermissionSetRecord {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListAccountAssignmentsOutput {
    #[serde(default)]
    account_assignments: Vec<AssignmentRecord>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssignmentRecord {
    #[serde(default)]
    principal_type: String,
    #[serde(default)]
    principal_id: String,
}

/// Create/delete and describe-status responses share one status record,
/// keyed by the operation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssignmentStatusOutput {
    account_assignment_creation_status: Option<StatusRecord>,
    account_assignment_deletion_status: Option<StatusRecord>,
}

impl AssignmentStatusOutput {
    fn into_status(self) -> Option<StatusRecord> {
        self.account_assignment_creation_status
            .or(self.account_assignment_deletion_status)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatusRecord {
    status: Option<String>,
    request_id: Option<String>,
    failure_reason: Option<String>,
}

#[async_trait]
impl DirectoryBackend for AwsCliBackend {
    async fn list_instances(&self, next_token: Option<String>) -> Result<Page<Instance>> {
        let out: ListInstancesOutput = self
            .call_paged("sso-admin", "list-instances", &[], next_token.as_deref())
            .await?;
        Ok(Page {
            items: out.instances.into_iter().map(Instance::from).collect(),
            next_token: non_empty(out.next_token),
        })
    }

    async fn list_groups(&self, store_id: &str, next_token: Option<String>) -> Result<Page<Group>> {
        let out: ListGroupsOutput = self
            .call_paged(
                "identitystore",
                "list-groups",
                &[("identity-store-id", store_id)],
                next_token.as_deref(),
            )
            .await?;
        Ok(Page {
            items: out
                .groups
                .into_iter()
                .map(|g| Group {
                    id: g.group_id,
                    display_name: g.display_name.unwrap_or_default(),
                    description: g.description.unwrap_or_default(),
                })
                .collect(),
            next_token: non_empty(out.next_token),
        })
    }

    async fn create_group(&self, store_id: &str, display_name: &str) -> Result<String> {
        let out: CreateGroupOutput = self
            .call(
                "identitystore",
                "create-group",
                &[("identity-store-id", store_id), ("display-name", display_name)],
            )
            .await?;
        out.group_id
            .ok_or_else(|| IdcError::Api("create-group returned no group id".into()))
    }

    async fn delete_group(&self, store_id: &str, group_id: &str) -> Result<()> {
        self.call_unit(
            "identitystore",
            "delete-group",
            &[("identity-store-id", store_id), ("group-id", group_id)],
        )
        .await
    }

    async fn list_group_memberships(
        &self,
        store_id: &str,
        group_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<Membership>> {
        let out: ListMembershipsOutput = self
            .call_paged(
                "identitystore",
                "list-group-memberships",
                &[("identity-store-id", store_id), ("group-id", group_id)],
                next_token.as_deref(),
            )
            .await?;
        Ok(Page {
            items: out
                .group_memberships
                .into_iter()
                .map(|m| Membership {
                    membership_id: m.membership_id,
                    user_id: m.member_id.and_then(|id| id.user_id),
                })
                .collect(),
            next_token: non_empty(out.next_token),
        })
    }

    async fn describe_user(&self, store_id: &str, user_id: &str) -> Result<User> {
        let record: UserRecord = self
            .call(
                "identitystore",
                "describe-user",
                &[("identity-store-id", store_id), ("user-id", user_id)],
            )
            .await?;
        Ok(record.into())
    }

    async fn list_users(&self, store_id: &str, next_token: Option<String>) -> Result<Page<User>> {
        let out: ListUsersOutput = self
            .call_paged(
                "identitystore",
                "list-users",
                &[("identity-store-id", store_id)],
                next_token.as_deref(),
            )
            .await?;
        Ok(Page {
            items: out.users.into_iter().map(User::from).collect(),
            next_token: non_empty(out.next_token),
        })
    }

    async fn create_group_membership(
        &self,
        store_id: &str,
        group_id: &str,
        user_id: &str,
    ) -> Result<String> {
        let member = format!("UserId={}", user_id);
        let out: CreateMembershipOutput = self
            .call(
                "identitystore",
                "create-group-membership",
                &[
                    ("identity-store-id", store_id),
                    ("group-id", group_id),
                    ("member-id", &member),
                ],
            )
            .await?;
        out.membership_id
            .ok_or_else(|| IdcError::Api("create-group-membership returned no membership id".into()))
    }

    async fn delete_group_membership(&self, store_id: &str, membership_id: &str) -> Result<()> {
        self.call_unit(
            "identitystore",
            "delete-group-membership",
            &[("identity-store-id", store_id), ("membership-id", membership_id)],
        )
        .await
    }

    async fn list_accounts(&self, next_token: Option<String>) -> Result<Page<Account>> {
        let out: ListAccountsOutput = self
            .call_paged("organizations", "list-accounts", &[], next_token.as_deref())
            .await?;
        Ok(Page {
            items: out
                .accounts
                .into_iter()
                .map(|a| Account {
                    id: a.id,
                    name: a.name.unwrap_or_default(),
                    email: a.email.unwrap_or_default(),
                })
                .collect(),
            next_token: non_empty(out.next_token),
        })
    }

    async fn list_permission_sets(
        &self,
        instance_arn: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>> {
        let out: ListPermissionSetsOutput = self
            .call_paged(
                "sso-admin",
                "list-permission-sets",
                &[("instance-arn", instance_arn)],
                next_token.as_deref(),
            )
            .await?;
        Ok(Page {
            items: out.permission_sets,
            next_token: non_empty(out.next_token),
        })
    }

    async fn describe_permission_set(
        &self,
        instance_arn: &str,
        permission_set_arn: &str,
    ) -> Result<Option<String>> {
        let out: DescribePermissionSetOutput = self
            .call(
                "sso-admin",
                "describe-permission-set",
                &[
                    ("instance-arn", instance_arn),
                    ("permission-set-arn", permission_set_arn),
                ],
            )
            .await?;
        Ok(out.permission_set.and_then(|p| p.name))
    }

    async fn list_account_assignments(
        &self,
        instance_arn: &str,
        account_id: &str,
        permission_set_arn: &str,
        next_token: Option<String>,
    ) -> Result<Page<AccountAssignment>> {
        let out: ListAccountAssignmentsOutput = self
            .call_paged(
                "sso-admin",
                "list-account-assignments",
                &[
                    ("instance-arn", instance_arn),
                    ("account-id", account_id),
                    ("permission-set-arn", permission_set_arn),
                ],
                next_token.as_deref(),
            )
            .await?;
        Ok(Page {
            items: out
                .account_assignments
                .into_iter()
                .map(|a| AccountAssignment {
                    principal_type: a.principal_type,
                    principal_id: a.principal_id,
                })
                .collect(),
            next_token: non_empty(out.next_token),
        })
    }

    async fn submit_assignment(
        &self,
        instance_arn: &str,
        operation: AssignmentOperation,
        target: &AssignmentTarget,
    ) -> Result<Option<String>> {
        let command = match operation {
            AssignmentOperation::Create => "create-account-assignment",
            AssignmentOperation::Delete => "delete-account-assignment",
        };
        let out: AssignmentStatusOutput = self
            .call(
                "sso-admin",
                command,
                &[
                    ("instance-arn", instance_arn),
                    ("target-id", &target.account_id),
                    ("target-type", "AWS_ACCOUNT"),
                    ("permission-set-arn", &target.permission_set_arn),
                    ("principal-type", PRINCIPAL_TYPE_GROUP),
                    ("principal-id", &target.group_id),
                ],
            )
            .await?;
        Ok(out.into_status().and_then(|s| s.request_id))
    }

    async fn assignment_status(
        &self,
        instance_arn: &str,
        operation: AssignmentOperation,
        request_id: &str,
    ) -> Result<Option<OperationStatus>> {
        let (command, flag) = match operation {
            AssignmentOperation::Create => (
                "describe-account-assignment-creation-status",
                "account-assignment-creation-request-id",
            ),
            AssignmentOperation::Delete => (
                "describe-account-assignment-deletion-status",
                "account-assignment-deletion-request-id",
            ),
        };
        let out: AssignmentStatusOutput = self
            .call(
                "sso-admin",
                command,
                &[("instance-arn", instance_arn), (flag, request_id)],
            )
            .await?;
        Ok(out.into_status().and_then(|record| {
            record.status.map(|status| OperationStatus {
                state: OperationState::parse(&status),
                failure_reason: record.failure_reason,
            })
        }))
    }
}

/// Connector that hands out [`AwsCliBackend`]s and shells out to
/// `aws sso login`
#[derive(Debug, Clone)]
pub struct AwsCliConnector {
    program: String,
}

impl AwsCliConnector {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Connector for AwsCliConnector {
    async fn connect(&self, profile: &str, region: &str) -> Result<Arc<dyn DirectoryBackend>> {
        let output = Command::new(&self.program)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(&self.program, e))?;
        debug!(
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            "aws cli available"
        );
        Ok(Arc::new(AwsCliBackend::new(&self.program, profile, region)))
    }

    async fn login(&self, profile: &str) -> Result<()> {
        info!(profile, "running aws sso login");
        let output = Command::new(&self.program)
            .args(["sso", "login", "--profile", profile])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(&self.program, e))?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(IdcError::Login(format!(
            "{}: {}",
            output.status,
            combined.trim()
        )))
    }
}
