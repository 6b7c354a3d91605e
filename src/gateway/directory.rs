//! Groups, memberships and users in the bound identity store

use super::{Gateway, Group, GroupUser, Membership, User, collect_pages};
use crate::error::{IdcError, Result};
use futures::stream::{self, StreamExt};
use tracing::{debug, info};

impl Gateway {
    pub async fn list_groups(&self) -> Result<Vec<Group>> {
        let store_id = self.store_id()?;
        let backend = self.backend.as_ref();
        let groups = collect_pages(move |token| backend.list_groups(store_id, token)).await?;
        debug!(count = groups.len(), "listed groups");
        Ok(groups)
    }

    /// Creates a group and returns its id. Blank names are rejected before
    /// any remote call.
    pub async fn create_group(&self, display_name: &str) -> Result<String> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(IdcError::Config("Group name cannot be empty".into()));
        }
        let store_id = self.store_id()?;
        let id = self.backend.create_group(store_id, name).await?;
        info!(group_id = %id, name, "created group");
        Ok(id)
    }

    pub async fn delete_group(&self, group_id: &str) -> Result<()> {
        let store_id = self.store_id()?;
        self.backend.delete_group(store_id, group_id).await?;
        info!(group_id, "deleted group");
        Ok(())
    }

    /// Number of membership rows in the group, across all pages
    pub async fn membership_count(&self, group_id: &str) -> Result<usize> {
        Ok(self.memberships(group_id).await?.len())
    }

    async fn memberships(&self, group_id: &str) -> Result<Vec<Membership>> {
        let store_id = self.store_id()?;
        let backend = self.backend.as_ref();
        collect_pages(move |token| backend.list_group_memberships(store_id, group_id, token)).await
    }

    /// Members of a group with resolved display names.
    ///
    /// Lookups run with bounded concurrency and keep membership order. A failed
    /// lookup never fails the listing; the member falls back to its raw id.
    pub async fn list_group_users(&self, group_id: &str) -> Result<Vec<GroupUser>> {
        let store_id = self.store_id()?;
        let memberships = self.memberships(group_id).await?;
        let concurrency = self.settings.lookup_concurrency.max(1);

        let users = stream::iter(memberships)
            .map(|membership| self.resolve_member(store_id, membership))
            .buffered(concurrency)
            .collect::<Vec<_>>()
            .await;

        debug!(group_id, count = users.len(), "resolved group members");
        Ok(users)
    }

    async fn resolve_member(&self, store_id: &str, membership: Membership) -> GroupUser {
        let Some(user_id) = membership.user_id.filter(|id| !id.is_empty()) else {
            return GroupUser {
                membership_id: membership.membership_id,
                ..Default::default()
            };
        };

        match self.backend.describe_user(store_id, &user_id).await {
            Ok(user) => GroupUser {
                membership_id: membership.membership_id,
                display_name: User {
                    id: user_id.clone(),
                    ..user.clone()
                }
                .resolved_name(),
                email: user.email,
                user_id,
            },
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "user lookup failed, showing raw id");
                GroupUser {
                    membership_id: membership.membership_id,
                    display_name: user_id.clone(),
                    email: String::new(),
                    user_id,
                }
            }
        }
    }

    /// Every user in the directory with the display-name fallback applied
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let store_id = self.store_id()?;
        let backend = self.backend.as_ref();
        let users = collect_pages(move |token| backend.list_users(store_id, token)).await?;
        Ok(users
            .into_iter()
            .map(|user| User {
                display_name: user.resolved_name(),
                ..user
            })
            .collect())
    }

    /// Adds a user to the group and returns the membership id
    pub async fn add_membership(&self, group_id: &str, user_id: &str) -> Result<String> {
        let store_id = self.store_id()?;
        let id = self
            .backend
            .create_group_membership(store_id, group_id, user_id)
            .await?;
        info!(group_id, user_id, membership_id = %id, "added member");
        Ok(id)
    }

    pub async fn remove_membership(&self, membership_id: &str) -> Result<()> {
        let store_id = self.store_id()?;
        self.backend
            .delete_group_membership(store_id, membership_id)
            .await?;
        info!(membership_id, "removed member");
        Ok(())
    }
}
