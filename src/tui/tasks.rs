//! Async Task Dispatcher for the TUI
//!
//! Runs remote work without blocking input handling. Uses channels to
//! communicate between the async runtime and the TUI main loop.
//!
//! Architecture:
//! - TUI main loop runs on the main thread (synchronous) and owns [`App`](super::app::App)
//! - Commands run on a background tokio runtime, one spawned task each
//! - Every command produces exactly one [`Message`], sent back over a
//!   crossbeam channel that the TUI drains every tick

use crate::config::profiles;
use crate::error::Result;
use crate::gateway::session::{self, Connector, Session};
use crate::gateway::{
    AccountListing, Assignment, AssignmentTarget, Gateway, GatewaySettings, Group, GroupUser,
    PermissionSet, User,
};
use crossbeam_channel::{Receiver, unbounded};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Work requested by the state machine
#[derive(Debug)]
pub enum Command {
    LoadProfiles,
    Establish {
        profile: String,
        region: String,
    },
    LoadGroups {
        gateway: Gateway,
        epoch: u64,
    },
    LoadCount {
        gateway: Gateway,
        group_id: String,
        epoch: u64,
    },
    LoadUsers {
        gateway: Gateway,
        group_id: String,
    },
    /// Directory-wide users for the add-member picker
    LoadDirectoryUsers {
        gateway: Gateway,
    },
    /// Inventory refresh plus assignment discovery for one group
    Discover {
        gateway: Gateway,
        group_id: String,
        seq: u64,
        cancel: CancellationToken,
    },
    Mutate {
        gateway: Gateway,
        mutation: Mutation,
        cancel: CancellationToken,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::LoadProfiles => "load_profiles",
            Command::Establish { .. } => "establish",
            Command::LoadGroups { .. } => "load_groups",
            Command::LoadCount { .. } => "load_count",
            Command::LoadUsers { .. } => "load_users",
            Command::LoadDirectoryUsers { .. } => "load_directory_users",
            Command::Discover { .. } => "discover",
            Command::Mutate { mutation, .. } => mutation.name(),
        }
    }
}

/// Directory and assignment changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateGroup { name: String },
    DeleteGroup { group_id: String },
    AddMember { group_id: String, user_id: String },
    RemoveMember { membership_id: String },
    CreateAssignment { target: AssignmentTarget },
    DeleteAssignment { target: AssignmentTarget },
}

impl Mutation {
    /// Operator-facing label, used in status lines
    pub fn label(&self) -> &'static str {
        match self {
            Mutation::CreateGroup { .. } => "Create group",
            Mutation::DeleteGroup { .. } => "Delete group",
            Mutation::AddMember { .. } => "Add user",
            Mutation::RemoveMember { .. } => "Remove user",
            Mutation::CreateAssignment { .. } => "Create assignment",
            Mutation::DeleteAssignment { .. } => "Delete assignment",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Mutation::CreateGroup { .. } => "create_group",
            Mutation::DeleteGroup { .. } => "delete_group",
            Mutation::AddMember { .. } => "add_member",
            Mutation::RemoveMember { .. } => "remove_member",
            Mutation::CreateAssignment { .. } => "create_assignment",
            Mutation::DeleteAssignment { .. } => "delete_assignment",
        }
    }
}

/// Inventory gathered by one discovery cycle.
///
/// `assignments` fails independently so a canceled scan still delivers the
/// account and permission-set inventory.
#[derive(Debug)]
pub struct DiscoveryReport {
    pub accounts: AccountListing,
    pub permission_sets: Vec<PermissionSet>,
    pub assignments: Result<Vec<Assignment>>,
}

/// Completion of one [`Command`]
#[derive(Debug)]
pub enum Message {
    ProfilesLoaded(Result<Vec<String>>),
    Established(Result<Session>),
    GroupsLoaded {
        epoch: u64,
        result: Result<Vec<Group>>,
    },
    CountLoaded {
        epoch: u64,
        group_id: String,
        result: Result<usize>,
    },
    UsersLoaded {
        group_id: String,
        result: Result<Vec<GroupUser>>,
    },
    DirectoryUsersLoaded(Result<Vec<User>>),
    Discovered {
        seq: u64,
        group_id: String,
        result: Result<DiscoveryReport>,
    },
    Mutated {
        label: &'static str,
        result: Result<()>,
    },
}

/// Everything commands need besides their own payload
#[derive(Clone)]
pub struct TaskContext {
    pub connector: Arc<dyn Connector>,
    pub settings: GatewaySettings,
    pub profile_files: Vec<PathBuf>,
}

/// Handle for sending commands to the worker
pub struct TaskSender {
    tx: Option<mpsc::UnboundedSender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl TaskSender {
    pub fn send(&self, command: Command) -> std::result::Result<(), Box<Command>> {
        match &self.tx {
            Some(tx) => tx.send(command).map_err(|e| Box::new(e.0)),
            None => Err(Box::new(command)),
        }
    }

    /// Stops accepting commands and waits for the worker thread to exit.
    /// Tasks still in flight are dropped with the runtime.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("task worker panicked");
            }
        }
    }
}

impl Drop for TaskSender {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle for receiving completions from the worker
pub struct TaskReceiver {
    rx: Receiver<Message>,
}

impl TaskReceiver {
    /// Try to receive a completion without blocking
    pub fn try_recv(&self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Drain all available completions
    pub fn drain(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Block until the next completion arrives or `timeout` elapses
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<Message> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Spawn the background task worker
/// Returns handles for sending commands and receiving completions
pub fn spawn_task_worker(context: TaskContext) -> Result<(TaskSender, TaskReceiver)> {
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<Command>();
    let (message_tx, message_rx) = unbounded::<Message>();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let worker = thread::Builder::new()
        .name("idc-groups-tasks".into())
        .spawn(move || {
            runtime.block_on(async move {
                while let Some(command) = command_rx.recv().await {
                    debug!(command = command.name(), "dispatching");
                    let context = context.clone();
                    let message_tx = message_tx.clone();
                    tokio::spawn(async move {
                        let message = execute(command, &context).await;
                        if message_tx.send(message).is_err() {
                            debug!("completion dropped, TUI has exited");
                        }
                    });
                }
            });
        })?;

    Ok((
        TaskSender {
            tx: Some(command_tx),
            worker: Some(worker),
        },
        TaskReceiver { rx: message_rx },
    ))
}

// ============================================================================
// Command execution
// ============================================================================

async fn execute(command: Command, context: &TaskContext) -> Message {
    match command {
        Command::LoadProfiles => {
            Message::ProfilesLoaded(profiles::load_profiles_from(&context.profile_files))
        }
        Command::Establish { profile, region } => Message::Established(
            session::establish(
                context.connector.as_ref(),
                &profile,
                &region,
                context.settings,
            )
            .await,
        ),
        Command::LoadGroups { gateway, epoch } => Message::GroupsLoaded {
            epoch,
            result: gateway.list_groups().await,
        },
        Command::LoadCount {
            gateway,
            group_id,
            epoch,
        } => {
            let result = gateway.membership_count(&group_id).await;
            Message::CountLoaded {
                epoch,
                group_id,
                result,
            }
        }
        Command::LoadUsers { gateway, group_id } => {
            let result = gateway.list_group_users(&group_id).await;
            Message::UsersLoaded { group_id, result }
        }
        Command::LoadDirectoryUsers { gateway } => {
            Message::DirectoryUsersLoaded(gateway.list_users().await)
        }
        Command::Discover {
            gateway,
            group_id,
            seq,
            cancel,
        } => {
            let result = discover(&gateway, &group_id, &cancel).await;
            Message::Discovered {
                seq,
                group_id,
                result,
            }
        }
        Command::Mutate {
            gateway,
            mutation,
            cancel,
        } => {
            let label = mutation.label();
            let result = mutate(&gateway, mutation, &cancel).await;
            if let Err(e) = &result {
                warn!(operation = label, error = %e, "mutation failed");
            }
            Message::Mutated { label, result }
        }
    }
}

/// Re-fetches the account and permission-set inventory, then scans for the
/// group's assignments
async fn discover(
    gateway: &Gateway,
    group_id: &str,
    cancel: &CancellationToken,
) -> Result<DiscoveryReport> {
    let accounts = gateway.list_accounts().await?;
    let permission_sets = gateway.list_permission_sets().await?;
    let assignments = gateway
        .discover_assignments(group_id, accounts.accounts(), &permission_sets, cancel)
        .await;

    Ok(DiscoveryReport {
        accounts,
        permission_sets,
        assignments,
    })
}

async fn mutate(gateway: &Gateway, mutation: Mutation, cancel: &CancellationToken) -> Result<()> {
    match mutation {
        Mutation::CreateGroup { name } => gateway.create_group(&name).await.map(drop),
        Mutation::DeleteGroup { group_id } => gateway.delete_group(&group_id).await,
        Mutation::AddMember { group_id, user_id } => {
            gateway.add_membership(&group_id, &user_id).await.map(drop)
        }
        Mutation::RemoveMember { membership_id } => {
            gateway.remove_membership(&membership_id).await
        }
        Mutation::CreateAssignment { target } => gateway.create_assignment(&target, cancel).await,
        Mutation::DeleteAssignment { target } => gateway.delete_assignment(&target, cancel).await,
    }
}
