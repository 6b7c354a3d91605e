//! Accounts, permission sets and group account assignments

use super::{
    Account, Assignment, AssignmentOperation, AssignmentTarget, Gateway, OperationState,
    PRINCIPAL_TYPE_GROUP, PermissionSet, collect_pages,
};
use crate::error::{IdcError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of listing organization accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountListing {
    Available(Vec<Account>),
    /// The caller may not list Organizations accounts
    Denied,
}

impl AccountListing {
    pub fn accounts(&self) -> &[Account] {
        match self {
            AccountListing::Available(accounts) => accounts,
            AccountListing::Denied => &[],
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, AccountListing::Denied)
    }
}

impl Gateway {
    /// Lists organization accounts. Access denial is a distinct outcome,
    /// not an error, so callers can degrade to manual account entry.
    pub async fn list_accounts(&self) -> Result<AccountListing> {
        let backend = self.backend.as_ref();
        match collect_pages(move |token| backend.list_accounts(token)).await {
            Ok(accounts) => Ok(AccountListing::Available(accounts)),
            Err(IdcError::AccessDenied(msg)) => {
                warn!(error = %msg, "organizations access denied");
                Ok(AccountListing::Denied)
            }
            Err(e) => Err(e),
        }
    }

    /// Permission sets of the bound instance with their names resolved.
    /// A set without a name is labelled by its ARN.
    pub async fn list_permission_sets(&self) -> Result<Vec<PermissionSet>> {
        let instance_arn = self.instance_arn()?;
        let backend = self.backend.as_ref();
        let arns =
            collect_pages(move |token| backend.list_permission_sets(instance_arn, token)).await?;

        let mut sets = Vec::with_capacity(arns.len());
        for arn in arns {
            let name = backend
                .describe_permission_set(instance_arn, &arn)
                .await?
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| arn.clone());
            sets.push(PermissionSet { arn, name });
        }
        Ok(sets)
    }

    /// Scans every (account, permission set) pair for assignments to `group_id`.
    ///
    /// Cancellation is checked before each pair; an in-flight listing is never
    /// interrupted. A canceled scan returns [`IdcError::Canceled`] and drops
    /// what it found so far. Order follows `accounts` then `permission_sets`.
    pub async fn discover_assignments(
        &self,
        group_id: &str,
        accounts: &[Account],
        permission_sets: &[PermissionSet],
        cancel: &CancellationToken,
    ) -> Result<Vec<Assignment>> {
        let instance_arn = self.instance_arn()?;
        let backend = self.backend.as_ref();
        let mut found = Vec::new();

        for account in accounts {
            for set in permission_sets {
                if cancel.is_cancelled() {
                    debug!(group_id, partial = found.len(), "assignment discovery canceled");
                    return Err(IdcError::Canceled);
                }

                let account_id = account.id.as_str();
                let set_arn = set.arn.as_str();
                let rows = collect_pages(move |token| {
                    backend.list_account_assignments(instance_arn, account_id, set_arn, token)
                })
                .await?;

                let assigned = rows.iter().any(|row| {
                    row.principal_type == PRINCIPAL_TYPE_GROUP && row.principal_id == group_id
                });
                if assigned {
                    found.push(Assignment {
                        account_id: account.id.clone(),
                        account_name: account.name.clone(),
                        permission_set_arn: set.arn.clone(),
                        permission_set_name: set.name.clone(),
                    });
                }
            }
        }

        debug!(group_id, count = found.len(), "assignment discovery finished");
        Ok(found)
    }

    /// Assigns the group to an account with a permission set and waits for
    /// the request to settle
    pub async fn create_assignment(
        &self,
        target: &AssignmentTarget,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.run_assignment(AssignmentOperation::Create, target, cancel)
            .await
    }

    pub async fn delete_assignment(
        &self,
        target: &AssignmentTarget,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.run_assignment(AssignmentOperation::Delete, target, cancel)
            .await
    }

    async fn run_assignment(
        &self,
        operation: AssignmentOperation,
        target: &AssignmentTarget,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let instance_arn = self.instance_arn()?;
        let request_id = self
            .backend
            .submit_assignment(instance_arn, operation, target)
            .await?
            .filter(|id| !id.is_empty())
            .ok_or_else(|| IdcError::Api(format!("missing {} request id", operation.label())))?;

        debug!(request_id = %request_id, operation = operation.label(), "submitted");
        self.await_assignment(operation, &request_id, cancel).await?;
        info!(
            account_id = %target.account_id,
            permission_set = %target.permission_set_arn,
            group_id = %target.group_id,
            "{} succeeded",
            operation.label()
        );
        Ok(())
    }

    /// Polls a submitted request at the configured interval until it succeeds,
    /// fails, or `cancel` fires. The first status check happens one interval
    /// after submission.
    pub async fn await_assignment(
        &self,
        operation: AssignmentOperation,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let instance_arn = self.instance_arn()?;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IdcError::Canceled),
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            let Some(status) = self
                .backend
                .assignment_status(instance_arn, operation, request_id)
                .await?
            else {
                continue;
            };

            match status.state {
                OperationState::Succeeded => return Ok(()),
                OperationState::Failed => {
                    return Err(IdcError::AsyncOperationFailed {
                        operation: operation.label().to_string(),
                        reason: status
                            .failure_reason
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "unknown failure".to_string()),
                    });
                }
                OperationState::InProgress => continue,
            }
        }
    }
}
