//! In-memory backend used by unit tests

use super::*;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Scripted failure for one backend operation
#[derive(Debug, Clone)]
pub struct Failure {
    pub op: &'static str,
    /// Page index to fail on, `None` for any call
    pub page: Option<usize>,
    pub message: String,
}

pub struct FakeState {
    pub page_size: usize,
    pub instances: Vec<Instance>,
    pub groups: Vec<Group>,
    pub memberships: HashMap<String, Vec<Membership>>,
    pub users: Vec<User>,
    pub accounts: Vec<Account>,
    pub permission_sets: Vec<PermissionSet>,
    /// (account id, permission set arn, row)
    pub assignments: Vec<(String, String, AccountAssignment)>,
    pub statuses: VecDeque<Option<OperationStatus>>,
    pub request_id: Option<String>,
    pub failures: Vec<Failure>,
    /// Cancel the token once this many assignment listings have been served
    pub cancel_after_listings: Option<(usize, CancellationToken)>,
    pub calls: Vec<String>,
    next_id: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            page_size: 2,
            instances: Vec::new(),
            groups: Vec::new(),
            memberships: HashMap::new(),
            users: Vec::new(),
            accounts: Vec::new(),
            permission_sets: Vec::new(),
            assignments: Vec::new(),
            statuses: VecDeque::new(),
            request_id: Some("req-1".into()),
            failures: Vec::new(),
            cancel_after_listings: None,
            calls: Vec::new(),
            next_id: 0,
        }
    }
}

#[derive(Default)]
pub struct FakeBackend {
    pub state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn with(configure: impl FnOnce(&mut FakeState)) -> Self {
        let backend = Self::default();
        configure(&mut backend.state.lock().unwrap());
        backend
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == op)
            .count()
    }

    fn begin(&self, op: &'static str, page: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(op.to_string());
        let position = state
            .failures
            .iter()
            .position(|f| f.op == op && f.page.is_none_or(|p| p == page));
        match position {
            Some(index) => {
                let failure = state.failures.remove(index);
                Err(IdcError::from_backend_message(failure.message))
            }
            None => Ok(()),
        }
    }

    fn paged<T: Clone>(
        &self,
        op: &'static str,
        token: Option<String>,
        items: impl FnOnce(&FakeState) -> Vec<T>,
    ) -> Result<Page<T>> {
        let index = token
            .as_deref()
            .and_then(|t| t.strip_prefix("page-"))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        self.begin(op, index)?;

        let state = self.state.lock().unwrap();
        let all = items(&state);
        let size = state.page_size.max(1);
        let start = (index * size).min(all.len());
        let end = (start + size).min(all.len());
        Ok(Page {
            items: all[start..end].to_vec(),
            next_token: (end < all.len()).then(|| format!("page-{}", index + 1)),
        })
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }
}

#[async_trait]
impl DirectoryBackend for FakeBackend {
    async fn list_instances(&self, next_token: Option<String>) -> Result<Page<Instance>> {
        self.paged("list_instances", next_token, |s| s.instances.clone())
    }

    async fn list_groups(&self, _store: &str, next_token: Option<String>) -> Result<Page<Group>> {
        self.paged("list_groups", next_token, |s| s.groups.clone())
    }

    async fn create_group(&self, _store: &str, display_name: &str) -> Result<String> {
        self.begin("create_group", 0)?;
        let id = self.fresh_id("g");
        self.state.lock().unwrap().groups.push(Group {
            id: id.clone(),
            display_name: display_name.to_string(),
            description: String::new(),
        });
        Ok(id)
    }

    async fn delete_group(&self, _store: &str, group_id: &str) -> Result<()> {
        self.begin("delete_group", 0)?;
        self.state.lock().unwrap().groups.retain(|g| g.id != group_id);
        Ok(())
    }

    async fn list_group_memberships(
        &self,
        _store: &str,
        group_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<Membership>> {
        self.paged("list_group_memberships", next_token, |s| {
            s.memberships.get(group_id).cloned().unwrap_or_default()
        })
    }

    async fn describe_user(&self, _store: &str, user_id: &str) -> Result<User> {
        self.begin("describe_user", 0)?;
        let state = self.state.lock().unwrap();
        state
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| IdcError::Api(format!("ResourceNotFoundException: {}", user_id)))
    }

    async fn list_users(&self, _store: &str, next_token: Option<String>) -> Result<Page<User>> {
        self.paged("list_users", next_token, |s| s.users.clone())
    }

    async fn create_group_membership(
        &self,
        _store: &str,
        group_id: &str,
        user_id: &str,
    ) -> Result<String> {
        self.begin("create_group_membership", 0)?;
        let id = self.fresh_id("m");
        self.state
            .lock()
            .unwrap()
            .memberships
            .entry(group_id.to_string())
            .or_default()
            .push(Membership {
                membership_id: id.clone(),
                user_id: Some(user_id.to_string()),
            });
        Ok(id)
    }

    async fn delete_group_membership(&self, _store: &str, membership_id: &str) -> Result<()> {
        self.begin("delete_group_membership", 0)?;
        for rows in self.state.lock().unwrap().memberships.values_mut() {
            rows.retain(|m| m.membership_id != membership_id);
        }
        Ok(())
    }

    async fn list_accounts(&self, next_token: Option<String>) -> Result<Page<Account>> {
        self.paged("list_accounts", next_token, |s| s.accounts.clone())
    }

    async fn list_permission_sets(
        &self,
        _instance: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>> {
        self.paged("list_permission_sets", next_token, |s| {
            s.permission_sets.iter().map(|p| p.arn.clone()).collect()
        })
    }

    async fn describe_permission_set(&self, _instance: &str, arn: &str) -> Result<Option<String>> {
        self.begin("describe_permission_set", 0)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .permission_sets
            .iter()
            .find(|p| p.arn == arn)
            .map(|p| p.name.clone())
            .filter(|name| !name.is_empty()))
    }

    async fn list_account_assignments(
        &self,
        _instance: &str,
        account_id: &str,
        permission_set_arn: &str,
        next_token: Option<String>,
    ) -> Result<Page<AccountAssignment>> {
        let page = self.paged("list_account_assignments", next_token, |s| {
            s.assignments
                .iter()
                .filter(|(a, p, _)| a == account_id && p == permission_set_arn)
                .map(|(_, _, row)| row.clone())
                .collect()
        })?;

        let state = self.state.lock().unwrap();
        if let Some((limit, token)) = &state.cancel_after_listings {
            let served = state
                .calls
                .iter()
                .filter(|c| c.as_str() == "list_account_assignments")
                .count();
            if served >= *limit {
                token.cancel();
            }
        }
        Ok(page)
    }

    async fn submit_assignment(
        &self,
        _instance: &str,
        operation: AssignmentOperation,
        target: &AssignmentTarget,
    ) -> Result<Option<String>> {
        let op = match operation {
            AssignmentOperation::Create => "create_assignment",
            AssignmentOperation::Delete => "delete_assignment",
        };
        self.begin(op, 0)?;
        let mut state = self.state.lock().unwrap();
        match operation {
            AssignmentOperation::Create => state.assignments.push((
                target.account_id.clone(),
                target.permission_set_arn.clone(),
                AccountAssignment {
                    principal_type: PRINCIPAL_TYPE_GROUP.into(),
                    principal_id: target.group_id.clone(),
                },
            )),
            AssignmentOperation::Delete => state.assignments.retain(|(a, p, row)| {
                !(a == &target.account_id
                    && p == &target.permission_set_arn
                    && row.principal_id == target.group_id)
            }),
        }
        Ok(state.request_id.clone())
    }

    async fn assignment_status(
        &self,
        _instance: &str,
        _operation: AssignmentOperation,
        _request_id: &str,
    ) -> Result<Option<OperationStatus>> {
        self.begin("assignment_status", 0)?;
        let mut state = self.state.lock().unwrap();
        Ok(state.statuses.pop_front().unwrap_or(Some(OperationStatus {
            state: OperationState::Succeeded,
            failure_reason: None,
        })))
    }
}

pub fn instance() -> Instance {
    Instance {
        arn: "arn:aws:sso:::instance/ssoins-test".into(),
        identity_store_id: "d-test".into(),
        display_name: String::new(),
        owner_account_id: "111111111111".into(),
    }
}

pub fn group(id: &str, name: &str) -> Group {
    Group {
        id: id.into(),
        display_name: name.into(),
        description: String::new(),
    }
}

pub fn account(id: &str, name: &str) -> Account {
    Account {
        id: id.into(),
        name: name.into(),
        email: format!("{}@example.com", name),
    }
}

pub fn permission_set(suffix: &str, name: &str) -> PermissionSet {
    PermissionSet {
        arn: format!("arn:aws:sso:::permissionSet/ssoins-test/{}", suffix),
        name: name.into(),
    }
}

pub fn group_row(group_id: &str) -> AccountAssignment {
    AccountAssignment {
        principal_type: PRINCIPAL_TYPE_GROUP.into(),
        principal_id: group_id.into(),
    }
}

pub fn user_row(user_id: &str) -> AccountAssignment {
    AccountAssignment {
        principal_type: "USER".into(),
        principal_id: user_id.into(),
    }
}

/// Gateway bound to the test instance, with a 2s poll interval
pub fn gateway(backend: Arc<FakeBackend>) -> Gateway {
    Gateway::new(
        backend,
        GatewaySettings {
            poll_interval: Duration::from_secs(2),
            lookup_concurrency: 4,
        },
    )
    .bind_instance(instance())
}
