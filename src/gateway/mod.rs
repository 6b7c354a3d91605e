//! Remote gateway for IAM Identity Center
//!
//! [`DirectoryBackend`] is the page-level seam to the remote services
//! (identity store, SSO admin, Organizations). [`Gateway`] layers the
//! behaviour the session relies on over it:
//! - transparent pagination (all pages or the first error, never partial data)
//! - member/user display-name resolution
//! - the accounts × permission-sets assignment discovery scan
//! - polling of asynchronous assignment requests
//!
//! Cancellation is cooperative and only checked between remote calls.

pub mod assignments;
pub mod aws_cli;
pub mod directory;
pub mod session;

#[cfg(test)]
pub(crate) mod fake;

use crate::config::Config;
use crate::error::{IdcError, Result};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use assignments::AccountListing;
pub use session::{Connector, establish};

/// One IAM Identity Center instance (directory endpoint pair)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Instance {
    pub arn: String,
    pub identity_store_id: String,
    pub display_name: String,
    pub owner_account_id: String,
}

impl Instance {
    /// Last `/`-separated segment of the instance ARN
    pub fn short_arn(&self) -> &str {
        short_arn(&self.arn)
    }

    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            self.short_arn()
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Group {
    pub id: String,
    pub display_name: String,
    pub description: String,
}

/// Raw membership row as listed by the identity store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub membership_id: String,
    /// `None` when the member is not a user (nested principals)
    pub user_id: Option<String>,
}

/// Group member with resolved display details
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupUser {
    pub membership_id: String,
    pub user_id: String,
    pub display_name: String,
    pub email: String,
}

/// Directory-wide user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub user_name: String,
    pub email: String,
}

impl User {
    /// Display name, then username, then the raw id
    pub fn resolved_name(&self) -> String {
        [&self.display_name, &self.user_name, &self.id]
            .into_iter()
            .find(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PermissionSet {
    pub arn: String,
    pub name: String,
}

/// Raw row of an account-assignment listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountAssignment {
    pub principal_type: String,
    pub principal_id: String,
}

pub const PRINCIPAL_TYPE_GROUP: &str = "GROUP";

/// A permission set granted to the current group on one account
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Assignment {
    pub account_id: String,
    pub account_name: String,
    pub permission_set_arn: String,
    pub permission_set_name: String,
}

/// Target of an assignment create/delete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentTarget {
    pub group_id: String,
    pub account_id: String,
    pub permission_set_arn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOperation {
    Create,
    Delete,
}

impl AssignmentOperation {
    pub fn label(self) -> &'static str {
        match self {
            AssignmentOperation::Create => "assignment creation",
            AssignmentOperation::Delete => "assignment deletion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    InProgress,
    Succeeded,
    Failed,
}

impl OperationState {
    pub fn parse(status: &str) -> Self {
        match status {
            "SUCCEEDED" => OperationState::Succeeded,
            "FAILED" => OperationState::Failed,
            _ => OperationState::InProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    pub state: OperationState,
    pub failure_reason: Option<String>,
}

/// One page of a listing plus its continuation token
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// Page-level operations against the identity store, SSO admin and
/// Organizations services. Implementations do not paginate or retry.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    async fn list_instances(&self, next_token: Option<String>) -> Result<Page<Instance>>;

    async fn list_groups(&self, store_id: &str, next_token: Option<String>)
    -> Result<Page<Group>>;

    /// Returns the new group id
    async fn create_group(&self, store_id: &str, display_name: &str) -> Result<String>;

    async fn delete_group(&self, store_id: &str, group_id: &str) -> Result<()>;

    async fn list_group_memberships(
        &self,
        store_id: &str,
        group_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<Membership>>;

    /// Raw user record; empty fields are left empty
    async fn describe_user(&self, store_id: &str, user_id: &str) -> Result<User>;

    async fn list_users(&self, store_id: &str, next_token: Option<String>) -> Result<Page<User>>;

    /// Returns the new membership id
    async fn create_group_membership(
        &self,
        store_id: &str,
        group_id: &str,
        user_id: &str,
    ) -> Result<String>;

    async fn delete_group_membership(&self, store_id: &str, membership_id: &str) -> Result<()>;

    async fn list_accounts(&self, next_token: Option<String>) -> Result<Page<Account>>;

    /// Permission set ARNs
    async fn list_permission_sets(
        &self,
        instance_arn: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>>;

    /// Permission set name, if the backend has one
    async fn describe_permission_set(
        &self,
        instance_arn: &str,
        permission_set_arn: &str,
    ) -> Result<Option<String>>;

    async fn list_account_assignments(
        &self,
        instance_arn: &str,
        account_id: &str,
        permission_set_arn: &str,
        next_token: Option<String>,
    ) -> Result<Page<AccountAssignment>>;

    /// Submits an async create/delete request and returns its request id
    async fn submit_assignment(
        &self,
        instance_arn: &str,
        operation: AssignmentOperation,
        target: &AssignmentTarget,
    ) -> Result<Option<String>>;

    /// Current status of a submitted request, `None` while unknown
    async fn assignment_status(
        &self,
        instance_arn: &str,
        operation: AssignmentOperation,
        request_id: &str,
    ) -> Result<Option<OperationStatus>>;
}

/// Tunables the gateway takes from the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    pub poll_interval: Duration,
    pub lookup_concurrency: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for GatewaySettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            lookup_concurrency: config.lookup_concurrency(),
        }
    }
}

/// Authenticated handle to one directory, optionally bound to an instance.
///
/// Cloning is cheap; every dispatched unit of work gets its own copy.
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn DirectoryBackend>,
    instance: Option<Instance>,
    settings: GatewaySettings,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("instance", &self.instance.as_ref().map(|i| i.arn.as_str()))
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(backend: Arc<dyn DirectoryBackend>, settings: GatewaySettings) -> Self {
        Self {
            backend,
            instance: None,
            settings,
        }
    }

    /// Copy of this gateway bound to `instance`
    pub fn bind_instance(&self, instance: Instance) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            instance: Some(instance),
            settings: self.settings,
        }
    }

    pub fn instance(&self) -> Option<&Instance> {
        self.instance.as_ref()
    }

    fn bound(&self) -> Result<&Instance> {
        self.instance
            .as_ref()
            .ok_or_else(|| IdcError::Config("no Identity Center instance selected".into()))
    }

    fn store_id(&self) -> Result<&str> {
        Ok(self.bound()?.identity_store_id.as_str())
    }

    fn instance_arn(&self) -> Result<&str> {
        Ok(self.bound()?.arn.as_str())
    }

    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        let backend = self.backend.as_ref();
        collect_pages(move |token| backend.list_instances(token)).await
    }
}

/// Follow continuation tokens until exhausted and concatenate every page.
///
/// The first failing page aborts the listing with its error; items already
/// collected are dropped.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = fetch(token.take()).await?;
        items.extend(page.items);

        match page.next_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => break,
        }
    }

    Ok(items)
}

pub fn short_arn(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}
