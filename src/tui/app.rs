//! Main TUI Application
//!
//! [`App`] is the session state machine. It is owned and mutated only by the
//! TUI thread:
//! - operator input arrives as [`Action`]s (see [`super::input`])
//! - finished background work arrives as [`Message`]s
//! - either may yield one [`Command`] for the dispatcher
//!
//! Screens: SelectRegion → SelectProfile → EstablishSession → SelectInstance
//! → GroupsList → GroupDetail (Users | Accounts). At most one [`Modal`] is
//! open at a time and it receives all navigation input while open.

use crate::config::Config;
use crate::config::profiles::{self, REGIONS};
use crate::error::{IdcError, Result};
use crate::gateway::aws_cli::AwsCliConnector;
use crate::gateway::{
    Account, Assignment, AssignmentTarget, Gateway, GatewaySettings, Group, GroupUser, Instance,
    PermissionSet, User,
};
use crate::tui::tasks::{
    Command, DiscoveryReport, Message, Mutation, TaskContext, TaskReceiver, TaskSender,
    spawn_task_worker,
};
use crate::tui::{input, render};
use chrono::{DateTime, Local};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Rows moved by PageUp/PageDown
const PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    SelectRegion,
    SelectProfile,
    EstablishSession,
    SelectInstance,
    GroupsList,
    GroupDetail,
}

impl Screen {
    pub fn title(self) -> &'static str {
        match self {
            Screen::SelectRegion => "Select region",
            Screen::SelectProfile => "Select profile",
            Screen::EstablishSession => "SSO session",
            Screen::SelectInstance => "Select Identity Center instance",
            Screen::GroupsList => "Groups",
            Screen::GroupDetail => "Group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Users,
    Accounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nav {
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
}

/// Operator intent, independent of the key that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Move(Nav),
    Confirm,
    Back,
    NextTab,
    PrevTab,
    ToggleSearch,
    Refresh,
    Help,
    ErrorDetails,
    Quit,
    CreateGroup,
    DeleteGroup,
    /// Add user or assignment, depending on the tab
    Add,
    /// Remove user or assignment, depending on the tab
    Remove,
    Char(char),
    Backspace,
}

/// One line of a list: a title and a dimmer detail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub title: String,
    pub detail: String,
}

impl Row {
    fn new(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            detail: detail.into(),
        }
    }

    fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle) || self.detail.to_lowercase().contains(needle)
    }
}

/// Indices of `rows` matching `query` (case-insensitive substring)
pub fn filter_rows(rows: &[Row], query: &str) -> Vec<usize> {
    let needle = query.trim().to_lowercase();
    rows.iter()
        .enumerate()
        .filter(|(_, row)| needle.is_empty() || row.matches(&needle))
        .map(|(i, _)| i)
        .collect()
}

/// Cursor over a (possibly filtered) list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selector {
    cursor: usize,
}

impl Selector {
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn apply(&mut self, nav: Nav, len: usize) {
        if len == 0 {
            self.cursor = 0;
            return;
        }
        let last = len - 1;
        self.cursor = match nav {
            Nav::Up => self.cursor.saturating_sub(1),
            Nav::Down => (self.cursor + 1).min(last),
            Nav::PageUp => self.cursor.saturating_sub(PAGE_SIZE),
            Nav::PageDown => (self.cursor + PAGE_SIZE).min(last),
            Nav::Home => 0,
            Nav::End => last,
        };
    }

    pub fn clamp(&mut self, len: usize) {
        self.cursor = self.cursor.min(len.saturating_sub(1));
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn select(&mut self, index: usize) {
        self.cursor = index;
    }
}

/// List modal state: cursor plus type-to-filter query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Picker {
    pub selector: Selector,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modal {
    Help,
    ErrorDetails,
    /// Fatal condition; only Enter dismisses it
    Blocking {
        title: String,
        message: String,
        remediation: String,
    },
    CreateGroup {
        name: String,
    },
    ConfirmDeleteGroup {
        group: Group,
    },
    ConfirmRemoveUser {
        user: GroupUser,
    },
    PickUser {
        users: Vec<User>,
        picker: Picker,
    },
    PickAccount {
        picker: Picker,
    },
    EnterAccountId {
        account_id: String,
    },
    PickPermissionSet {
        picker: Picker,
    },
    ConfirmCreateAssignment,
    ConfirmRemoveAssignment {
        assignment: Assignment,
    },
}

impl Modal {
    pub fn title(&self) -> &str {
        match self {
            Modal::Help => "Help",
            Modal::ErrorDetails => "Error Details",
            Modal::Blocking { title, .. } => title,
            Modal::CreateGroup { .. } => "Create Group",
            Modal::ConfirmDeleteGroup { .. } => "Delete Group",
            Modal::ConfirmRemoveUser { .. } => "Remove User",
            Modal::PickUser { .. } => "Select user to add",
            Modal::PickAccount { .. } => "Select account",
            Modal::EnterAccountId { .. } => "Manual Account ID",
            Modal::PickPermissionSet { .. } => "Select permission set",
            Modal::ConfirmCreateAssignment => "Create Assignment",
            Modal::ConfirmRemoveAssignment { .. } => "Remove Assignment",
        }
    }

    fn picker(&self) -> Option<&Picker> {
        match self {
            Modal::PickUser { picker, .. }
            | Modal::PickAccount { picker }
            | Modal::PickPermissionSet { picker } => Some(picker),
            _ => None,
        }
    }

    fn picker_mut(&mut self) -> Option<&mut Picker> {
        match self {
            Modal::PickUser { picker, .. }
            | Modal::PickAccount { picker }
            | Modal::PickPermissionSet { picker } => Some(picker),
            _ => None,
        }
    }

    fn text_mut(&mut self) -> Option<&mut String> {
        match self {
            Modal::CreateGroup { name } => Some(name),
            Modal::EnterAccountId { account_id } => Some(account_id),
            _ => None,
        }
    }
}

/// Account chosen in the first step of the create-assignment wizard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountChoice {
    Picked(Account),
    Manual(String),
}

impl AccountChoice {
    pub fn id(&self) -> &str {
        match self {
            AccountChoice::Picked(account) => &account.id,
            AccountChoice::Manual(id) => id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingAssignment {
    pub account: Option<AccountChoice>,
    pub permission_set: Option<PermissionSet>,
}

/// Context captured with an operation-level or blocking error
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub summary: String,
    pub error: String,
    pub hint: Option<String>,
    pub profile: Option<String>,
    pub region: Option<String>,
    pub instance: Option<String>,
    pub at: DateTime<Local>,
}

impl ErrorReport {
    pub fn lines(&self) -> Vec<String> {
        let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
        let mut lines = vec![
            self.summary.clone(),
            format!("error: {}", self.error),
            format!("profile: {}", or_dash(&self.profile)),
            format!("region: {}", or_dash(&self.region)),
            format!("instance: {}", or_dash(&self.instance)),
            format!("time: {}", self.at.format("%Y-%m-%d %H:%M:%S")),
        ];
        if let Some(hint) = &self.hint {
            lines.push(format!("hint: {}", hint));
        }
        lines
    }
}

#[derive(Debug)]
struct ActiveDiscovery {
    seq: u64,
    group_id: String,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Selectors {
    region: Selector,
    profile: Selector,
    instance: Selector,
    groups: Selector,
    users: Selector,
    assignments: Selector,
}

/// Is `value` exactly twelve ASCII digits
pub fn is_account_id(value: &str) -> bool {
    value.len() == 12 && value.bytes().all(|b| b.is_ascii_digit())
}

/// Application state
#[derive(Debug)]
pub struct App {
    pub screen: Screen,
    pub tab: Tab,
    pub modal: Option<Modal>,
    pub profile: Option<String>,
    pub region: Option<String>,
    pub profiles: Vec<String>,
    pub instances: Vec<Instance>,
    pub instance: Option<Instance>,
    /// Authenticated, unbound gateway from the last establishment
    gateway: Option<Gateway>,
    pub groups: Vec<Group>,
    /// Group shown on GroupDetail
    pub group: Option<Group>,
    /// Known membership counts; absent means unknown
    pub counts: HashMap<String, usize>,
    counts_pending: HashSet<String>,
    groups_epoch: u64,
    pub users: Vec<GroupUser>,
    pub accounts: Vec<Account>,
    pub permission_sets: Vec<PermissionSet>,
    pub organizations_denied: bool,
    pub assignments: Vec<Assignment>,
    pub pending: PendingAssignment,
    discovery: Option<ActiveDiscovery>,
    discovery_seq: u64,
    shutdown: CancellationToken,
    pub busy: bool,
    pub status: Option<(String, StatusLevel)>,
    pub last_error: Option<ErrorReport>,
    /// Main-list filter text
    pub filter: String,
    /// Keystrokes edit the filter
    pub filtering: bool,
    selectors: Selectors,
    /// Frames drawn, drives the busy spinner
    pub ticks: usize,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        profile: Option<String>,
        region: Option<String>,
        shutdown: CancellationToken,
    ) -> Self {
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            screen: Screen::SelectRegion,
            tab: Tab::Users,
            modal: None,
            profile: clean(profile),
            region: clean(region),
            profiles: Vec::new(),
            instances: Vec::new(),
            instance: None,
            gateway: None,
            groups: Vec::new(),
            group: None,
            counts: HashMap::new(),
            counts_pending: HashSet::new(),
            groups_epoch: 0,
            users: Vec::new(),
            accounts: Vec::new(),
            permission_sets: Vec::new(),
            organizations_denied: false,
            assignments: Vec::new(),
            pending: PendingAssignment::default(),
            discovery: None,
            discovery_seq: 0,
            shutdown,
            busy: false,
            status: None,
            last_error: None,
            filter: String::new(),
            filtering: false,
            selectors: Selectors::default(),
            ticks: 0,
            should_quit: false,
        }
    }

    /// Picks the initial screen from the known profile/region and returns
    /// the first command, if any
    pub fn start(&mut self) -> Option<Command> {
        match (&self.region, &self.profile) {
            (None, _) => {
                self.enter(Screen::SelectRegion);
                self.info("Select an AWS region");
                None
            }
            (Some(_), None) => self.enter_profiles(),
            (Some(_), Some(_)) => self.establish(),
        }
    }

    pub fn is_discovering(&self) -> bool {
        self.discovery.is_some()
    }

    pub fn tick(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
    }

    // ------------------------------------------------------------------
    // Status and errors
    // ------------------------------------------------------------------

    fn set_status(&mut self, text: impl Into<String>, level: StatusLevel) {
        self.status = Some((text.into(), level));
    }

    fn info(&mut self, text: impl Into<String>) {
        self.set_status(text, StatusLevel::Info);
    }

    fn warn(&mut self, text: impl Into<String>) {
        self.set_status(text, StatusLevel::Warning);
    }

    fn report(&mut self, summary: &str, error: String, hint: Option<&str>) {
        warn!(summary, error = %error, "operation failed");
        self.set_status(format!("{}: {}", summary, error), StatusLevel::Error);
        self.last_error = Some(ErrorReport {
            summary: summary.to_string(),
            error,
            hint: hint.map(String::from),
            profile: self.profile.clone(),
            region: self.region.clone(),
            instance: self.instance.as_ref().map(|i| i.arn.clone()),
            at: Local::now(),
        });
    }

    fn report_error(&mut self, summary: &str, error: &IdcError) {
        self.report(summary, error.to_string(), error.hint());
    }

    fn block(&mut self, title: &str, error: &IdcError, remediation: String) {
        self.report_error(title, error);
        self.set_status(title, StatusLevel::Error);
        self.modal = Some(Modal::Blocking {
            title: title.to_string(),
            message: error.to_string(),
            remediation,
        });
        self.busy = false;
    }

    /// Worker channel closed; nothing dispatched will ever complete
    pub fn dispatch_failed(&mut self, command: &Command) {
        self.busy = false;
        self.report(
            "Background worker unavailable",
            format!("could not dispatch {}", command.name()),
            None,
        );
    }

    // ------------------------------------------------------------------
    // Lists and selection
    // ------------------------------------------------------------------

    fn enter(&mut self, screen: Screen) {
        self.screen = screen;
        self.filter.clear();
        self.filtering = false;
    }

    fn selector(&self) -> &Selector {
        match (self.screen, self.tab) {
            (Screen::SelectRegion, _) => &self.selectors.region,
            (Screen::SelectProfile, _) | (Screen::EstablishSession, _) => &self.selectors.profile,
            (Screen::SelectInstance, _) => &self.selectors.instance,
            (Screen::GroupsList, _) => &self.selectors.groups,
            (Screen::GroupDetail, Tab::Users) => &self.selectors.users,
            (Screen::GroupDetail, Tab::Accounts) => &self.selectors.assignments,
        }
    }

    fn selector_mut(&mut self) -> &mut Selector {
        match (self.screen, self.tab) {
            (Screen::SelectRegion, _) => &mut self.selectors.region,
            (Screen::SelectProfile, _) | (Screen::EstablishSession, _) => {
                &mut self.selectors.profile
            }
            (Screen::SelectInstance, _) => &mut self.selectors.instance,
            (Screen::GroupsList, _) => &mut self.selectors.groups,
            (Screen::GroupDetail, Tab::Users) => &mut self.selectors.users,
            (Screen::GroupDetail, Tab::Accounts) => &mut self.selectors.assignments,
        }
    }

    fn count_label(&self, group_id: &str) -> String {
        match self.counts.get(group_id) {
            Some(count) => format!("Users: {}", count),
            None if self.counts_pending.contains(group_id) => "Users: loading...".into(),
            None => "Users: -".into(),
        }
    }

    /// All rows of the main list for the current screen/tab
    pub fn rows(&self) -> Vec<Row> {
        match (self.screen, self.tab) {
            (Screen::SelectRegion, _) => REGIONS
                .iter()
                .map(|r| Row::new(*r, "AWS region"))
                .collect(),
            (Screen::SelectProfile, _) => self
                .profiles
                .iter()
                .map(|p| Row::new(p.as_str(), "AWS profile"))
                .collect(),
            (Screen::EstablishSession, _) => Vec::new(),
            (Screen::SelectInstance, _) => self
                .instances
                .iter()
                .map(|i| Row::new(i.label(), i.identity_store_id.as_str()))
                .collect(),
            (Screen::GroupsList, _) => self
                .groups
                .iter()
                .map(|g| Row::new(g.display_name.as_str(), self.count_label(&g.id)))
                .collect(),
            (Screen::GroupDetail, Tab::Users) => self
                .users
                .iter()
                .map(|u| {
                    let detail = if u.email.is_empty() { &u.user_id } else { &u.email };
                    Row::new(u.display_name.as_str(), detail.as_str())
                })
                .collect(),
            (Screen::GroupDetail, Tab::Accounts) => self
                .assignments
                .iter()
                .map(|a| {
                    let name = if a.account_name.trim().is_empty() {
                        &a.account_id
                    } else {
                        &a.account_name
                    };
                    Row::new(
                        format!("{} ({})", name, a.account_id),
                        a.permission_set_name.as_str(),
                    )
                })
                .collect(),
        }
    }

    /// Rows after filtering, with their source indices, and the cursor
    /// position within them
    pub fn visible_rows(&self) -> (Vec<(usize, Row)>, usize) {
        let rows = self.rows();
        let visible: Vec<(usize, Row)> = filter_rows(&rows, &self.filter)
            .into_iter()
            .map(|i| (i, rows[i].clone()))
            .collect();
        let cursor = self.selector().cursor().min(visible.len().saturating_sub(1));
        (visible, cursor)
    }

    /// Source index of the highlighted main-list row
    pub fn selected_index(&self) -> Option<usize> {
        let rows = self.rows();
        filter_rows(&rows, &self.filter)
            .get(self.selector().cursor())
            .copied()
    }

    fn selected_group(&self) -> Option<&Group> {
        if self.screen != Screen::GroupsList {
            return None;
        }
        self.selected_index().and_then(|i| self.groups.get(i))
    }

    /// Rows of the open list modal
    pub fn modal_rows(&self) -> Vec<Row> {
        match &self.modal {
            Some(Modal::PickUser { users, .. }) => users
                .iter()
                .map(|u| {
                    let detail = if u.email.is_empty() { &u.user_name } else { &u.email };
                    Row::new(u.display_name.as_str(), detail.as_str())
                })
                .collect(),
            Some(Modal::PickAccount { .. }) => self
                .accounts
                .iter()
                .map(|a| Row::new(a.name.as_str(), a.id.as_str()))
                .collect(),
            Some(Modal::PickPermissionSet { .. }) => self
                .permission_sets
                .iter()
                .map(|p| Row::new(p.name.as_str(), p.arn.as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Filtered modal rows and the cursor within them
    pub fn visible_modal_rows(&self) -> (Vec<(usize, Row)>, usize) {
        let Some(picker) = self.modal.as_ref().and_then(Modal::picker) else {
            return (Vec::new(), 0);
        };
        let rows = self.modal_rows();
        let visible: Vec<(usize, Row)> = filter_rows(&rows, &picker.query)
            .into_iter()
            .map(|i| (i, rows[i].clone()))
            .collect();
        let cursor = picker.selector.cursor().min(visible.len().saturating_sub(1));
        (visible, cursor)
    }

    fn picked_index(&self) -> Option<usize> {
        let picker = self.modal.as_ref().and_then(Modal::picker)?;
        let rows = self.modal_rows();
        filter_rows(&rows, &picker.query)
            .get(picker.selector.cursor())
            .copied()
    }

    fn bound_gateway(&self) -> Option<Gateway> {
        let gateway = self.gateway.as_ref()?;
        let instance = self.instance.clone()?;
        Some(gateway.bind_instance(instance))
    }

    // ------------------------------------------------------------------
    // Operator input
    // ------------------------------------------------------------------

    pub fn update(&mut self, action: Action) -> Option<Command> {
        if action == Action::Quit {
            self.quit();
            return None;
        }

        if self.modal.is_some() {
            return self.update_modal(action);
        }

        if self.filtering {
            match action {
                Action::Char(c) => {
                    self.filter.push(c);
                    return self.filter_changed();
                }
                Action::Backspace => {
                    self.filter.pop();
                    return self.filter_changed();
                }
                Action::Back => {
                    self.filter.clear();
                    self.filtering = false;
                    return self.filter_changed();
                }
                Action::Confirm => self.filtering = false,
                _ => {}
            }
        }

        match action {
            Action::Move(nav) => self.move_cursor(nav),
            Action::Confirm => self.confirm(),
            Action::Back => self.back(),
            Action::NextTab | Action::PrevTab => self.switch_tab(),
            Action::ToggleSearch => {
                self.filtering = !self.filtering;
                self.info(if self.filtering {
                    "Type to filter, Esc clears"
                } else {
                    "Filter kept, Ctrl+F to edit"
                });
                None
            }
            Action::Refresh => self.refresh(),
            Action::Help => {
                self.modal = Some(Modal::Help);
                None
            }
            Action::ErrorDetails => {
                if self.last_error.is_some() {
                    self.modal = Some(Modal::ErrorDetails);
                }
                None
            }
            Action::CreateGroup => {
                self.open_create_group();
                None
            }
            Action::DeleteGroup => {
                self.open_delete_group();
                None
            }
            Action::Add => self.add(),
            Action::Remove => {
                self.open_remove();
                None
            }
            Action::Char(_) | Action::Backspace | Action::Quit => None,
        }
    }

    fn quit(&mut self) {
        if let Some(discovery) = self.discovery.take() {
            discovery.cancel.cancel();
        }
        self.shutdown.cancel();
        self.should_quit = true;
    }

    fn move_cursor(&mut self, nav: Nav) -> Option<Command> {
        let len = filter_rows(&self.rows(), &self.filter).len();
        self.selector_mut().apply(nav, len);
        if self.screen == Screen::GroupsList {
            self.follow_selection()
        } else {
            None
        }
    }

    /// Background count fetch for the highlighted group when its count is
    /// unknown and not already being fetched
    fn follow_selection(&mut self) -> Option<Command> {
        let group_id = self.selected_group()?.id.clone();
        if self.counts.contains_key(&group_id) || self.counts_pending.contains(&group_id) {
            return None;
        }
        let gateway = self.bound_gateway()?;
        self.counts_pending.insert(group_id.clone());
        Some(Command::LoadCount {
            gateway,
            group_id,
            epoch: self.groups_epoch,
        })
    }

    /// The cursor restarts on the first match, whose count is fetched when unknown
    fn filter_changed(&mut self) -> Option<Command> {
        self.selector_mut().reset();
        if self.screen == Screen::GroupsList {
            self.follow_selection()
        } else {
            None
        }
    }

    fn confirm(&mut self) -> Option<Command> {
        if self.busy {
            return None;
        }
        let index = self.selected_index();

        match self.screen {
            Screen::SelectRegion => {
                let region = REGIONS.get(index?)?;
                self.region = Some(region.to_string());
                if self.profile.is_none() {
                    self.enter_profiles()
                } else {
                    self.establish()
                }
            }
            Screen::SelectProfile => {
                let profile = self.profiles.get(index?)?.clone();
                self.profile = Some(profile);
                self.establish()
            }
            Screen::EstablishSession => None,
            Screen::SelectInstance => {
                let instance = self.instances.get(index?)?.clone();
                self.select_instance(instance)
            }
            Screen::GroupsList => {
                let index = index?;
                let group = self.groups.get(index)?.clone();
                // entering the detail screen drops the filter, so keep the source row
                self.selectors.groups.select(index);
                self.open_group(group)
            }
            Screen::GroupDetail => None,
        }
    }

    fn enter_profiles(&mut self) -> Option<Command> {
        self.enter(Screen::SelectProfile);
        self.busy = true;
        self.info("Loading profiles");
        Some(Command::LoadProfiles)
    }

    fn establish(&mut self) -> Option<Command> {
        let profile = self.profile.clone()?;
        let region = self.region.clone()?;
        self.enter(Screen::EstablishSession);
        self.gateway = None;
        self.instance = None;
        self.busy = true;
        self.info("Checking SSO session");
        Some(Command::Establish { profile, region })
    }

    fn select_instance(&mut self, instance: Instance) -> Option<Command> {
        info!(instance = %instance.arn, "instance selected");
        self.instance = Some(instance);
        self.groups.clear();
        self.counts.clear();
        self.counts_pending.clear();
        self.selectors.groups.reset();
        self.enter(Screen::GroupsList);
        self.load_groups()
    }

    fn load_groups(&mut self) -> Option<Command> {
        let gateway = self.bound_gateway()?;
        self.groups_epoch += 1;
        self.busy = true;
        Some(Command::LoadGroups {
            gateway,
            epoch: self.groups_epoch,
        })
    }

    fn open_group(&mut self, group: Group) -> Option<Command> {
        if let Some(discovery) = self.discovery.take() {
            discovery.cancel.cancel();
        }
        self.users.clear();
        self.assignments.clear();
        self.selectors.users.reset();
        self.selectors.assignments.reset();
        self.group = Some(group);
        self.tab = Tab::Users;
        self.enter(Screen::GroupDetail);
        self.load_users()
    }

    fn load_users(&mut self) -> Option<Command> {
        let gateway = self.bound_gateway()?;
        let group_id = self.group.as_ref()?.id.clone();
        self.busy = true;
        Some(Command::LoadUsers { gateway, group_id })
    }

    fn start_discovery(&mut self) -> Option<Command> {
        let gateway = self.bound_gateway()?;
        let group_id = self.group.as_ref()?.id.clone();
        if let Some(previous) = self.discovery.take() {
            previous.cancel.cancel();
        }
        self.discovery_seq += 1;
        let cancel = self.shutdown.child_token();
        self.discovery = Some(ActiveDiscovery {
            seq: self.discovery_seq,
            group_id: group_id.clone(),
            cancel: cancel.clone(),
        });
        self.busy = true;
        self.info("Discovering account assignments (Esc cancels)");
        Some(Command::Discover {
            gateway,
            group_id,
            seq: self.discovery_seq,
            cancel,
        })
    }

    fn back(&mut self) -> Option<Command> {
        match self.screen {
            Screen::GroupDetail => {
                if let Some(discovery) = self.discovery.take() {
                    debug!(seq = discovery.seq, "canceling assignment discovery");
                    discovery.cancel.cancel();
                    self.busy = false;
                    self.warn("Assignment discovery canceled");
                    return None;
                }
                self.enter(Screen::GroupsList);
                self.tab = Tab::Users;
                None
            }
            Screen::GroupsList => {
                if self.instances.len() > 1 {
                    self.instance = None;
                    self.enter(Screen::SelectInstance);
                }
                None
            }
            Screen::SelectInstance => self.leave_session(),
            Screen::EstablishSession => {
                if self.busy {
                    return None;
                }
                self.leave_session()
            }
            Screen::SelectProfile => {
                self.enter(Screen::SelectRegion);
                None
            }
            Screen::SelectRegion => None,
        }
    }

    /// Drops the gateway and returns to profile selection
    fn leave_session(&mut self) -> Option<Command> {
        self.gateway = None;
        self.instance = None;
        self.instances.clear();
        self.enter(Screen::SelectProfile);
        if self.profiles.is_empty() && !self.busy {
            return self.enter_profiles();
        }
        None
    }

    fn switch_tab(&mut self) -> Option<Command> {
        if self.screen != Screen::GroupDetail {
            return None;
        }
        self.filter.clear();
        self.filtering = false;
        match self.tab {
            Tab::Users => {
                self.tab = Tab::Accounts;
                if self.busy {
                    return None;
                }
                self.start_discovery()
            }
            Tab::Accounts => {
                self.tab = Tab::Users;
                None
            }
        }
    }

    fn refresh(&mut self) -> Option<Command> {
        if self.busy {
            return None;
        }
        match (self.screen, self.tab) {
            (Screen::SelectProfile, _) => self.enter_profiles(),
            (Screen::EstablishSession, _) => self.establish(),
            (Screen::GroupsList, _) => self.load_groups(),
            (Screen::GroupDetail, Tab::Users) => self.load_users(),
            (Screen::GroupDetail, Tab::Accounts) => self.start_discovery(),
            _ => None,
        }
    }

    fn mutation_allowed(&mut self) -> bool {
        if self.busy {
            self.warn("Wait for the current operation to finish");
            return false;
        }
        true
    }

    fn open_create_group(&mut self) {
        if self.screen != Screen::GroupsList || !self.mutation_allowed() {
            return;
        }
        self.modal = Some(Modal::CreateGroup {
            name: String::new(),
        });
    }

    fn open_delete_group(&mut self) {
        if self.screen != Screen::GroupsList {
            return;
        }
        let Some(group) = self.selected_group().cloned() else {
            return;
        };
        if self.mutation_allowed() {
            self.modal = Some(Modal::ConfirmDeleteGroup { group });
        }
    }

    fn add(&mut self) -> Option<Command> {
        if self.screen != Screen::GroupDetail || !self.mutation_allowed() {
            return None;
        }
        match self.tab {
            Tab::Users => {
                let gateway = self.bound_gateway()?;
                self.busy = true;
                self.info("Loading directory users");
                Some(Command::LoadDirectoryUsers { gateway })
            }
            Tab::Accounts => {
                if self.permission_sets.is_empty() {
                    self.report(
                        "Cannot add assignment",
                        "permission sets are not loaded".into(),
                        Some("Open the Accounts tab or refresh to load them"),
                    );
                    return None;
                }
                self.pending = PendingAssignment::default();
                self.modal = Some(if self.organizations_denied {
                    Modal::EnterAccountId {
                        account_id: String::new(),
                    }
                } else {
                    Modal::PickAccount {
                        picker: Picker::default(),
                    }
                });
                None
            }
        }
    }

    fn open_remove(&mut self) {
        if self.screen != Screen::GroupDetail {
            return;
        }
        let index = self.selected_index();
        let modal = match self.tab {
            Tab::Users => index
                .and_then(|i| self.users.get(i))
                .cloned()
                .map(|user| Modal::ConfirmRemoveUser { user }),
            Tab::Accounts => index
                .and_then(|i| self.assignments.get(i))
                .cloned()
                .map(|assignment| Modal::ConfirmRemoveAssignment { assignment }),
        };
        if let Some(modal) = modal {
            if self.mutation_allowed() {
                self.modal = Some(modal);
            }
        }
    }

    // ------------------------------------------------------------------
    // Modal input
    // ------------------------------------------------------------------

    fn update_modal(&mut self, action: Action) -> Option<Command> {
        let modal = self.modal.as_mut()?;

        if let Modal::Blocking { .. } = modal {
            if action == Action::Confirm {
                self.modal = None;
            }
            return None;
        }

        match action {
            Action::Back => {
                self.close_modal();
                return None;
            }
            Action::Char(c) => {
                if let Some(text) = modal.text_mut() {
                    text.push(c);
                } else if let Some(picker) = modal.picker_mut() {
                    picker.query.push(c);
                    picker.selector.reset();
                }
                return None;
            }
            Action::Backspace => {
                if let Some(text) = modal.text_mut() {
                    text.pop();
                } else if let Some(picker) = modal.picker_mut() {
                    picker.query.pop();
                    picker.selector.reset();
                }
                return None;
            }
            Action::Move(nav) => {
                let len = self.visible_modal_rows().0.len();
                if let Some(picker) = self.modal.as_mut().and_then(Modal::picker_mut) {
                    picker.selector.apply(nav, len);
                }
                return None;
            }
            Action::Confirm => {}
            _ => return None,
        }

        self.confirm_modal()
    }

    fn close_modal(&mut self) {
        if matches!(
            self.modal,
            Some(
                Modal::PickAccount { .. }
                    | Modal::EnterAccountId { .. }
                    | Modal::PickPermissionSet { .. }
                    | Modal::ConfirmCreateAssignment
            )
        ) {
            self.pending = PendingAssignment::default();
        }
        self.modal = None;
    }

    fn confirm_modal(&mut self) -> Option<Command> {
        let picked = self.picked_index();
        let modal = self.modal.take()?;

        match modal {
            Modal::Help | Modal::ErrorDetails | Modal::Blocking { .. } => None,
            Modal::CreateGroup { name } => {
                let trimmed = name.trim();
                if trimmed.is_empty() {
                    self.warn("Group name cannot be empty");
                    self.modal = Some(Modal::CreateGroup { name });
                    return None;
                }
                let name = trimmed.to_string();
                self.dispatch_mutation(Mutation::CreateGroup { name })
            }
            Modal::ConfirmDeleteGroup { group } => {
                self.dispatch_mutation(Mutation::DeleteGroup { group_id: group.id })
            }
            Modal::ConfirmRemoveUser { user } => self.dispatch_mutation(Mutation::RemoveMember {
                membership_id: user.membership_id,
            }),
            Modal::PickUser { users, picker } => {
                let Some(user) = picked.and_then(|i| users.get(i)).cloned() else {
                    self.modal = Some(Modal::PickUser { users, picker });
                    return None;
                };
                let group_id = self.group.as_ref()?.id.clone();
                self.dispatch_mutation(Mutation::AddMember {
                    group_id,
                    user_id: user.id,
                })
            }
            Modal::PickAccount { picker } => {
                let Some(account) = picked.and_then(|i| self.accounts.get(i)).cloned() else {
                    self.modal = Some(Modal::PickAccount { picker });
                    return None;
                };
                self.pending.account = Some(AccountChoice::Picked(account));
                self.modal = Some(Modal::PickPermissionSet {
                    picker: Picker::default(),
                });
                None
            }
            Modal::EnterAccountId { account_id } => {
                let value = account_id.trim().to_string();
                if !is_account_id(&value) {
                    self.warn("Account ID must be 12 digits");
                    self.modal = Some(Modal::EnterAccountId { account_id });
                    return None;
                }
                self.pending.account = Some(AccountChoice::Manual(value));
                self.modal = Some(Modal::PickPermissionSet {
                    picker: Picker::default(),
                });
                None
            }
            Modal::PickPermissionSet { picker } => {
                let Some(set) = picked.and_then(|i| self.permission_sets.get(i)).cloned() else {
                    self.modal = Some(Modal::PickPermissionSet { picker });
                    return None;
                };
                self.pending.permission_set = Some(set);
                self.modal = Some(Modal::ConfirmCreateAssignment);
                None
            }
            Modal::ConfirmCreateAssignment => {
                let pending = std::mem::take(&mut self.pending);
                let (Some(account), Some(set)) = (pending.account, pending.permission_set) else {
                    self.warn("Select account first");
                    return None;
                };
                let group_id = self.group.as_ref()?.id.clone();
                self.dispatch_mutation(Mutation::CreateAssignment {
                    target: AssignmentTarget {
                        group_id,
                        account_id: account.id().to_string(),
                        permission_set_arn: set.arn,
                    },
                })
            }
            Modal::ConfirmRemoveAssignment { assignment } => {
                let group_id = self.group.as_ref()?.id.clone();
                self.dispatch_mutation(Mutation::DeleteAssignment {
                    target: AssignmentTarget {
                        group_id,
                        account_id: assignment.account_id,
                        permission_set_arn: assignment.permission_set_arn,
                    },
                })
            }
        }
    }

    fn dispatch_mutation(&mut self, mutation: Mutation) -> Option<Command> {
        let gateway = self.bound_gateway()?;
        self.busy = true;
        self.info(format!("{}...", mutation.label()));
        Some(Command::Mutate {
            gateway,
            mutation,
            cancel: self.shutdown.child_token(),
        })
    }

    // ------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------

    pub fn handle_message(&mut self, message: Message) -> Option<Command> {
        match message {
            Message::ProfilesLoaded(result) => {
                self.busy = false;
                match result {
                    Ok(profiles) => {
                        self.profiles = profiles;
                        self.selectors.profile.clamp(self.profiles.len());
                        if self.profiles.is_empty() {
                            self.warn("No profiles found in ~/.aws/config or ~/.aws/credentials");
                        } else {
                            self.info("Select an AWS profile");
                        }
                    }
                    Err(e) => self.block(
                        "Failed loading profiles",
                        &e,
                        "Check ~/.aws/config and ~/.aws/credentials".into(),
                    ),
                }
                None
            }
            Message::Established(result) => {
                self.busy = false;
                if self.screen != Screen::EstablishSession {
                    return None;
                }
                match result {
                    Ok(session) => self.session_established(session.gateway, session.instances),
                    Err(IdcError::NoInstances) => {
                        self.block(
                            "No Identity Center instances found",
                            &IdcError::NoInstances,
                            "Verify account/region and IAM Identity Center setup".into(),
                        );
                        None
                    }
                    Err(e) => {
                        let remediation = format!(
                            "Run `aws sso login --profile {}` and retry",
                            self.profile.as_deref().unwrap_or("<profile>")
                        );
                        self.block("Unable to establish SSO session", &e, remediation);
                        None
                    }
                }
            }
            Message::GroupsLoaded { epoch, result } => {
                self.busy = false;
                if epoch != self.groups_epoch {
                    debug!(epoch, current = self.groups_epoch, "stale groups listing");
                    return None;
                }
                match result {
                    Ok(groups) => {
                        self.groups = groups;
                        self.counts.clear();
                        self.counts_pending.clear();
                        self.selectors.groups.clamp(self.groups.len());
                        self.info(format!("Loaded {} groups", self.groups.len()));
                        self.follow_selection()
                    }
                    Err(e) => {
                        self.report_error("Failed to load groups", &e);
                        None
                    }
                }
            }
            Message::CountLoaded {
                epoch,
                group_id,
                result,
            } => {
                if epoch != self.groups_epoch {
                    return None;
                }
                self.counts_pending.remove(&group_id);
                match result {
                    Ok(count) => {
                        self.counts.insert(group_id, count);
                    }
                    Err(e) => self.report_error("Failed loading group user count", &e),
                }
                None
            }
            Message::UsersLoaded { group_id, result } => {
                self.busy = false;
                if self.group.as_ref().map(|g| g.id.as_str()) != Some(group_id.as_str()) {
                    return None;
                }
                match result {
                    Ok(users) => {
                        self.users = users;
                        self.selectors.users.clamp(self.users.len());
                        self.info(format!("Loaded {} users", self.users.len()));
                    }
                    Err(e) => self.report_error("Failed to load group users", &e),
                }
                None
            }
            Message::DirectoryUsersLoaded(result) => {
                self.busy = false;
                match result {
                    Ok(users) => {
                        if self.screen == Screen::GroupDetail && self.modal.is_none() {
                            self.modal = Some(Modal::PickUser {
                                users,
                                picker: Picker::default(),
                            });
                            self.info("Choose a user and press Enter");
                        }
                    }
                    Err(e) => self.report_error("Failed to load users", &e),
                }
                None
            }
            Message::Discovered {
                seq,
                group_id,
                result,
            } => {
                self.discovered(seq, &group_id, result);
                None
            }
            Message::Mutated { label, result } => {
                self.busy = false;
                match result {
                    Ok(()) => {
                        self.set_status(format!("{} complete", label), StatusLevel::Success);
                        self.refresh()
                    }
                    Err(IdcError::Canceled) => {
                        self.warn(format!("{} canceled", label));
                        None
                    }
                    Err(e) => {
                        self.report_error(&format!("{} failed", label), &e);
                        None
                    }
                }
            }
        }
    }

    fn session_established(
        &mut self,
        gateway: Gateway,
        instances: Vec<Instance>,
    ) -> Option<Command> {
        self.gateway = Some(gateway);
        self.instances = instances;
        self.selectors.instance.clamp(self.instances.len());

        if let [only] = self.instances.as_slice() {
            let instance = only.clone();
            let command = self.select_instance(instance);
            self.info("Loaded Identity Center instance");
            return command;
        }

        self.enter(Screen::SelectInstance);
        self.info("Select an instance");
        None
    }

    fn discovered(&mut self, seq: u64, group_id: &str, result: Result<DiscoveryReport>) {
        let current = self
            .discovery
            .as_ref()
            .is_some_and(|d| d.seq == seq && d.group_id == group_id);

        let assignments = match result {
            Ok(report) => {
                self.organizations_denied = report.accounts.is_denied();
                self.accounts = report.accounts.accounts().to_vec();
                self.permission_sets = report.permission_sets;
                Ok(report.assignments)
            }
            Err(e) => Err(e),
        };

        if !current {
            debug!(seq, group_id, "ignoring stale discovery");
            return;
        }
        self.discovery = None;
        self.busy = false;

        match assignments {
            Ok(Ok(found)) => {
                self.assignments = found;
                self.selectors.assignments.clamp(self.assignments.len());
                if self.organizations_denied {
                    self.warn(
                        "Organizations access denied; use manual account ID for new assignments",
                    );
                } else {
                    self.info(format!("Loaded {} assignments", self.assignments.len()));
                }
            }
            Ok(Err(IdcError::Canceled)) | Err(IdcError::Canceled) => {
                self.warn("Assignment discovery canceled");
            }
            Ok(Err(e)) => self.report_error("Failed to load assignments", &e),
            Err(e) => self.report_error("Failed to load accounts/assignments", &e),
        }
    }
}

// ============================================================================
// Terminal loop
// ============================================================================

/// Startup options for the interactive session
#[derive(Debug, Clone, Default)]
pub struct TuiOptions {
    pub profile: Option<String>,
    pub region: Option<String>,
    pub config: Config,
}

/// Run the TUI application
pub fn run_tui(options: TuiOptions) -> Result<()> {
    let shutdown = CancellationToken::new();
    let context = TaskContext {
        connector: Arc::new(AwsCliConnector::new(options.config.aws_cli.clone())),
        settings: GatewaySettings::from(&options.config),
        profile_files: profiles::default_profile_files()?,
    };
    let (mut sender, receiver) = spawn_task_worker(context)?;

    let profile = options.profile.or(options.config.default_profile.clone());
    let region = options.region.or(options.config.default_region.clone());
    let mut app = App::new(profile, region, shutdown.clone());

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app, &sender, &receiver);

    shutdown.cancel();
    sender.shutdown();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res?;
    info!("session ended");
    Ok(())
}

fn dispatch(app: &mut App, sender: &TaskSender, command: Option<Command>) {
    if let Some(command) = command {
        if let Err(rejected) = sender.send(command) {
            app.dispatch_failed(&rejected);
        }
    }
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    sender: &TaskSender,
    receiver: &TaskReceiver,
) -> io::Result<()> {
    let first = app.start();
    dispatch(app, sender, first);

    loop {
        // Apply finished work before drawing (non-blocking)
        for message in receiver.drain() {
            let next = app.handle_message(message);
            dispatch(app, sender, next);
        }

        app.tick();
        terminal.draw(|f| render::ui(f, app))?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(action) = input::map_key(key) {
                        let next = app.update(action);
                        dispatch(app, sender, next);
                    }
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::{self, FakeBackend};
    use crate::gateway::session::Session;
    use crate::gateway::{AccountListing, GatewaySettings};

    fn gateway() -> Gateway {
        Gateway::new(Arc::new(FakeBackend::default()), GatewaySettings::default())
    }

    fn instance(suffix: &str) -> Instance {
        Instance {
            arn: format!("arn:aws:sso:::instance/ssoins-{}", suffix),
            identity_store_id: format!("d-{}", suffix),
            display_name: String::new(),
            owner_account_id: "111111111111".into(),
        }
    }

    fn groups(n: usize) -> Vec<Group> {
        (0..n)
            .map(|i| fake::group(&format!("g-{}", i), &format!("group-{}", i)))
            .collect()
    }

    fn expect_epoch(command: Option<Command>) -> u64 {
        match command {
            Some(Command::LoadGroups { epoch, .. }) => epoch,
            other => panic!("expected groups load, got {:?}", other),
        }
    }

    /// App on GroupsList with `n` groups loaded and no counts known
    fn on_groups(n: usize) -> App {
        let mut app = App::new(Some("admin".into()), Some("us-east-1".into()), CancellationToken::new());
        assert!(matches!(app.start(), Some(Command::Establish { .. })));
        let epoch = expect_epoch(app.handle_message(Message::Established(Ok(Session {
            gateway: gateway(),
            instances: vec![instance("1")],
        }))));
        let count = app.handle_message(Message::GroupsLoaded {
            epoch,
            result: Ok(groups(n)),
        });
        match count {
            Some(Command::LoadCount { group_id, .. }) => assert_eq!(group_id, "g-0"),
            None if n == 0 => {}
            other => panic!("expected count fetch, got {:?}", other),
        }
        app
    }

    /// App on GroupDetail for the second group, Users tab loaded
    fn on_detail() -> App {
        let mut app = on_groups(3);
        app.update(Action::Move(Nav::Down));
        match app.update(Action::Confirm) {
            Some(Command::LoadUsers { group_id, .. }) => assert_eq!(group_id, "g-1"),
            other => panic!("expected users load, got {:?}", other),
        }
        app.handle_message(Message::UsersLoaded {
            group_id: "g-1".into(),
            result: Ok(vec![GroupUser {
                membership_id: "m-1".into(),
                user_id: "u-1".into(),
                display_name: "Jane".into(),
                email: "jane@example.com".into(),
            }]),
        });
        app
    }

    fn discover(app: &mut App) -> (u64, CancellationToken) {
        match app.update(Action::NextTab) {
            Some(Command::Discover { seq, cancel, group_id, .. }) => {
                assert_eq!(group_id, "g-1");
                (seq, cancel)
            }
            other => panic!("expected discovery, got {:?}", other),
        }
    }

    fn report(accounts: AccountListing, assignments: Result<Vec<Assignment>>) -> Result<DiscoveryReport> {
        Ok(DiscoveryReport {
            accounts,
            permission_sets: vec![fake::permission_set("ps-1", "Admin")],
            assignments,
        })
    }

    fn assignment() -> Assignment {
        Assignment {
            account_id: "123456789012".into(),
            account_name: "prod".into(),
            permission_set_arn: fake::permission_set("ps-1", "Admin").arn,
            permission_set_name: "Admin".into(),
        }
    }

    #[test]
    fn test_initial_screen_depends_on_known_values() {
        let mut app = App::new(None, None, CancellationToken::new());
        assert!(app.start().is_none());
        assert_eq!(app.screen, Screen::SelectRegion);

        let mut app = App::new(None, Some("eu-west-1".into()), CancellationToken::new());
        assert!(matches!(app.start(), Some(Command::LoadProfiles)));
        assert_eq!(app.screen, Screen::SelectProfile);
        assert!(app.busy);

        let mut app = App::new(Some("admin".into()), Some(" ".into()), CancellationToken::new());
        assert!(app.start().is_none());
        assert_eq!(app.screen, Screen::SelectRegion);
    }

    #[test]
    fn test_region_then_profile_then_establish() {
        let mut app = App::new(None, None, CancellationToken::new());
        app.start();
        app.update(Action::Move(Nav::End));
        assert!(matches!(app.update(Action::Confirm), Some(Command::LoadProfiles)));
        assert_eq!(app.region.as_deref(), REGIONS.last().copied());

        app.handle_message(Message::ProfilesLoaded(Ok(vec!["admin".into(), "ops".into()])));
        assert!(!app.busy);
        app.update(Action::Move(Nav::Down));
        match app.update(Action::Confirm) {
            Some(Command::Establish { profile, region }) => {
                assert_eq!(profile, "ops");
                assert_eq!(Some(region.as_str()), REGIONS.last().copied());
            }
            other => panic!("expected establish, got {:?}", other),
        }
        assert_eq!(app.screen, Screen::EstablishSession);
    }

    #[test]
    fn test_confirm_ignored_while_busy() {
        let mut app = App::new(None, Some("us-east-1".into()), CancellationToken::new());
        app.start();
        assert!(app.busy);
        assert!(app.update(Action::Confirm).is_none());
    }

    #[test]
    fn test_single_instance_skips_instance_screen() {
        let app = on_groups(2);
        assert_eq!(app.screen, Screen::GroupsList);
        assert_eq!(app.instance.as_ref().map(|i| i.label()), Some("ssoins-1"));
        assert_eq!(app.groups.len(), 2);
    }

    #[test]
    fn test_multiple_instances_prompt_and_back_navigation() {
        let mut app = App::new(Some("admin".into()), Some("us-east-1".into()), CancellationToken::new());
        app.start();
        let next = app.handle_message(Message::Established(Ok(Session {
            gateway: gateway(),
            instances: vec![instance("1"), instance("2")],
        })));
        assert!(next.is_none());
        assert_eq!(app.screen, Screen::SelectInstance);

        app.update(Action::Move(Nav::Down));
        expect_epoch(app.update(Action::Confirm));
        assert_eq!(app.instance.as_ref().map(|i| i.label()), Some("ssoins-2"));

        app.handle_message(Message::GroupsLoaded { epoch: 1, result: Ok(Vec::new()) });
        app.update(Action::Back);
        assert_eq!(app.screen, Screen::SelectInstance);
        assert!(app.instance.is_none());

        // profiles were never loaded because the profile came from the CLI
        assert!(matches!(app.update(Action::Back), Some(Command::LoadProfiles)));
        assert_eq!(app.screen, Screen::SelectProfile);
    }

    #[test]
    fn test_groups_back_is_noop_with_single_instance() {
        let mut app = on_groups(1);
        assert!(app.update(Action::Back).is_none());
        assert_eq!(app.screen, Screen::GroupsList);
    }

    #[test]
    fn test_establish_failure_blocks_until_enter() {
        let mut app = App::new(Some("admin".into()), Some("us-east-1".into()), CancellationToken::new());
        app.start();
        app.handle_message(Message::Established(Err(IdcError::Login("denied".into()))));

        match &app.modal {
            Some(Modal::Blocking { title, remediation, .. }) => {
                assert_eq!(title, "Unable to establish SSO session");
                assert_eq!(remediation, "Run `aws sso login --profile admin` and retry");
            }
            other => panic!("expected blocking modal, got {:?}", other),
        }
        assert!(!app.busy);
        assert!(app.last_error.is_some());

        for action in [Action::Back, Action::Refresh, Action::Help, Action::Move(Nav::Down)] {
            assert!(app.update(action).is_none());
            assert!(matches!(app.modal, Some(Modal::Blocking { .. })));
        }
        app.update(Action::Confirm);
        assert!(app.modal.is_none());
        assert!(matches!(app.update(Action::Refresh), Some(Command::Establish { .. })));
    }

    #[test]
    fn test_zero_instances_remediation() {
        let mut app = App::new(Some("admin".into()), Some("us-east-1".into()), CancellationToken::new());
        app.start();
        app.handle_message(Message::Established(Err(IdcError::NoInstances)));
        match &app.modal {
            Some(Modal::Blocking { title, remediation, .. }) => {
                assert_eq!(title, "No Identity Center instances found");
                assert_eq!(remediation, "Verify account/region and IAM Identity Center setup");
            }
            other => panic!("expected blocking modal, got {:?}", other),
        }
    }

    #[test]
    fn test_count_cache_not_refetched_on_reselect() {
        let mut app = on_groups(3);
        let epoch = app.groups_epoch;
        app.handle_message(Message::CountLoaded {
            epoch,
            group_id: "g-0".into(),
            result: Ok(4),
        });

        match app.update(Action::Move(Nav::Down)) {
            Some(Command::LoadCount { group_id, .. }) => assert_eq!(group_id, "g-1"),
            other => panic!("expected count fetch, got {:?}", other),
        }
        // g-1 is in flight; moving away and back does not fetch it again
        app.update(Action::Move(Nav::Up));
        assert!(app.update(Action::Move(Nav::Down)).is_none());

        app.handle_message(Message::CountLoaded {
            epoch,
            group_id: "g-1".into(),
            result: Ok(0),
        });
        assert!(app.update(Action::Move(Nav::Up)).is_none());
        assert!(app.update(Action::Move(Nav::Down)).is_none());
        assert_eq!(app.counts.get("g-1"), Some(&0));
        assert_eq!(app.rows()[0].detail, "Users: 4");
        assert_eq!(app.rows()[1].detail, "Users: 0");
        assert_eq!(app.rows()[2].detail, "Users: -");
    }

    #[test]
    fn test_groups_reload_resets_counts_and_fetches_selected_only() {
        let mut app = on_groups(3);
        let old_epoch = app.groups_epoch;
        app.handle_message(Message::CountLoaded {
            epoch: old_epoch,
            group_id: "g-0".into(),
            result: Ok(4),
        });
        app.update(Action::Move(Nav::Down));
        app.update(Action::Move(Nav::Down));

        let epoch = expect_epoch(app.update(Action::Refresh));
        assert!(epoch > old_epoch);

        // a count from the superseded listing is dropped
        app.handle_message(Message::CountLoaded {
            epoch: old_epoch,
            group_id: "g-1".into(),
            result: Ok(9),
        });
        assert!(!app.counts.contains_key("g-1"));

        match app.handle_message(Message::GroupsLoaded { epoch, result: Ok(groups(3)) }) {
            Some(Command::LoadCount { group_id, epoch: e, .. }) => {
                assert_eq!(group_id, "g-2");
                assert_eq!(e, epoch);
            }
            other => panic!("expected one count fetch, got {:?}", other),
        }
        assert!(app.counts.is_empty());
        assert_eq!(app.rows()[0].detail, "Users: -");
        assert_eq!(app.rows()[2].detail, "Users: loading...");
    }

    #[test]
    fn test_escape_cancels_discovery_and_stays() {
        let mut app = on_detail();
        let (_, cancel) = discover(&mut app);
        assert!(app.busy);

        assert!(app.update(Action::Back).is_none());
        assert!(cancel.is_cancelled());
        assert_eq!(app.screen, Screen::GroupDetail);
        assert_eq!(app.tab, Tab::Accounts);
        assert!(!app.busy);
        assert_eq!(
            app.status,
            Some(("Assignment discovery canceled".into(), StatusLevel::Warning))
        );
        assert!(app.last_error.is_none());
    }

    #[test]
    fn test_canceled_discovery_completion_is_noop_on_visible_state() {
        let mut app = on_detail();
        let (seq, _) = discover(&mut app);
        app.update(Action::Back);
        let status = app.status.clone();

        app.handle_message(Message::Discovered {
            seq,
            group_id: "g-1".into(),
            result: report(
                AccountListing::Available(vec![fake::account("123456789012", "prod")]),
                Err(IdcError::Canceled),
            ),
        });

        assert!(app.assignments.is_empty());
        assert_eq!(app.status, status);
        // inventory cache still updated
        assert_eq!(app.accounts.len(), 1);
        assert_eq!(app.permission_sets.len(), 1);
    }

    #[test]
    fn test_escape_when_idle_returns_with_selection_intact() {
        let mut app = on_detail();
        app.update(Action::Back);
        assert_eq!(app.screen, Screen::GroupsList);
        assert_eq!(app.selected_index(), Some(1));
        assert_eq!(app.groups.len(), 3);
    }

    #[test]
    fn test_discovery_result_applied_when_current() {
        let mut app = on_detail();
        let (seq, _) = discover(&mut app);
        app.handle_message(Message::Discovered {
            seq,
            group_id: "g-1".into(),
            result: report(
                AccountListing::Available(vec![fake::account("123456789012", "prod")]),
                Ok(vec![assignment()]),
            ),
        });

        assert!(!app.busy);
        assert_eq!(app.assignments, vec![assignment()]);
        assert_eq!(app.status, Some(("Loaded 1 assignments".into(), StatusLevel::Info)));
        assert_eq!(app.rows()[0].title, "prod (123456789012)");
    }

    #[test]
    fn test_stale_discovery_sequence_ignored() {
        let mut app = on_detail();
        let (first, _) = discover(&mut app);
        app.update(Action::NextTab);
        app.update(Action::Back);
        let (second, _) = discover(&mut app);
        assert!(second > first);

        app.handle_message(Message::Discovered {
            seq: first,
            group_id: "g-1".into(),
            result: report(AccountListing::Available(Vec::new()), Ok(vec![assignment()])),
        });
        assert!(app.assignments.is_empty());
        assert!(app.busy);
    }

    #[test]
    fn test_organizations_denied_is_not_an_error() {
        let mut app = on_detail();
        let (seq, _) = discover(&mut app);
        app.handle_message(Message::Discovered {
            seq,
            group_id: "g-1".into(),
            result: report(AccountListing::Denied, Ok(Vec::new())),
        });

        assert!(app.organizations_denied);
        assert!(app.accounts.is_empty());
        assert!(app.last_error.is_none());
        assert_eq!(
            app.status,
            Some((
                "Organizations access denied; use manual account ID for new assignments".into(),
                StatusLevel::Warning
            ))
        );

        app.update(Action::Add);
        assert!(matches!(app.modal, Some(Modal::EnterAccountId { .. })));
    }

    #[test]
    fn test_manual_account_id_validation() {
        let mut app = on_detail();
        let (seq, _) = discover(&mut app);
        app.handle_message(Message::Discovered {
            seq,
            group_id: "g-1".into(),
            result: report(AccountListing::Denied, Ok(Vec::new())),
        });

        for rejected in ["12345", "12345678901a"] {
            app.update(Action::Add);
            for c in rejected.chars() {
                app.update(Action::Char(c));
            }
            assert!(app.update(Action::Confirm).is_none());
            assert!(matches!(app.modal, Some(Modal::EnterAccountId { .. })));
            assert_eq!(
                app.status,
                Some(("Account ID must be 12 digits".into(), StatusLevel::Warning))
            );
            app.update(Action::Back);
            assert!(app.modal.is_none());
            assert_eq!(app.pending, PendingAssignment::default());
        }

        app.update(Action::Add);
        for c in "123456789012".chars() {
            app.update(Action::Char(c));
        }
        app.update(Action::Confirm);
        assert!(matches!(app.modal, Some(Modal::PickPermissionSet { .. })));
        app.update(Action::Confirm);
        assert!(matches!(app.modal, Some(Modal::ConfirmCreateAssignment)));

        match app.update(Action::Confirm) {
            Some(Command::Mutate {
                mutation: Mutation::CreateAssignment { target },
                ..
            }) => {
                assert_eq!(target.account_id, "123456789012");
                assert_eq!(target.group_id, "g-1");
                assert_eq!(target.permission_set_arn, fake::permission_set("ps-1", "Admin").arn);
            }
            other => panic!("expected create assignment, got {:?}", other),
        }
        assert!(app.busy);
        assert!(app.modal.is_none());
        assert_eq!(app.pending, PendingAssignment::default());
    }

    #[test]
    fn test_account_id_check() {
        assert!(is_account_id("123456789012"));
        assert!(!is_account_id("12345"));
        assert!(!is_account_id("12345678901a"));
        assert!(!is_account_id("1234567890123"));
        assert!(!is_account_id("１２３４５６７８９０１２"));
    }

    #[test]
    fn test_assignment_wizard_with_account_picker() {
        let mut app = on_detail();
        let (seq, _) = discover(&mut app);
        app.handle_message(Message::Discovered {
            seq,
            group_id: "g-1".into(),
            result: report(
                AccountListing::Available(vec![
                    fake::account("111111111111", "dev"),
                    fake::account("222222222222", "prod"),
                ]),
                Ok(Vec::new()),
            ),
        });

        app.update(Action::Add);
        assert!(matches!(app.modal, Some(Modal::PickAccount { .. })));
        // type-to-filter narrows the picker
        for c in "prod".chars() {
            app.update(Action::Char(c));
        }
        assert_eq!(app.visible_modal_rows().0.len(), 1);
        app.update(Action::Confirm);
        assert_eq!(
            app.pending.account.as_ref().map(AccountChoice::id),
            Some("222222222222")
        );
        app.update(Action::Confirm);
        match app.update(Action::Confirm) {
            Some(Command::Mutate {
                mutation: Mutation::CreateAssignment { target },
                ..
            }) => assert_eq!(target.account_id, "222222222222"),
            other => panic!("expected create assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_add_assignment_requires_permission_sets() {
        let mut app = on_detail();
        app.update(Action::NextTab);
        app.update(Action::Back);
        assert!(app.update(Action::Add).is_none());
        assert!(app.modal.is_none());
        assert_eq!(
            app.status,
            Some((
                "Cannot add assignment: permission sets are not loaded".into(),
                StatusLevel::Error
            ))
        );
    }

    #[test]
    fn test_switch_to_users_uses_cache() {
        let mut app = on_detail();
        discover(&mut app);
        assert!(app.update(Action::PrevTab).is_none());
        assert_eq!(app.tab, Tab::Users);
        assert_eq!(app.users.len(), 1);
        // busy discovery blocks a second launch when switching back
        assert!(app.update(Action::NextTab).is_none());
        assert_eq!(app.tab, Tab::Accounts);
    }

    #[test]
    fn test_create_group_flow_and_reload() {
        let mut app = on_groups(1);
        app.update(Action::CreateGroup);
        app.update(Action::Confirm);
        assert_eq!(
            app.status,
            Some(("Group name cannot be empty".into(), StatusLevel::Warning))
        );
        assert!(matches!(app.modal, Some(Modal::CreateGroup { .. })));

        for c in "  ops ".chars() {
            app.update(Action::Char(c));
        }
        match app.update(Action::Confirm) {
            Some(Command::Mutate {
                mutation: Mutation::CreateGroup { name },
                ..
            }) => assert_eq!(name, "ops"),
            other => panic!("expected create group, got {:?}", other),
        }
        assert!(app.modal.is_none());
        assert!(app.busy);

        let reload = app.handle_message(Message::Mutated {
            label: "Create group",
            result: Ok(()),
        });
        expect_epoch(reload);
        assert_eq!(
            app.status,
            Some(("Create group complete".into(), StatusLevel::Success))
        );
    }

    #[test]
    fn test_mutation_failure_records_error_report() {
        let mut app = on_groups(2);
        app.update(Action::DeleteGroup);
        match &app.modal {
            Some(Modal::ConfirmDeleteGroup { group }) => assert_eq!(group.id, "g-0"),
            other => panic!("expected delete confirmation, got {:?}", other),
        }
        assert!(matches!(
            app.update(Action::Confirm),
            Some(Command::Mutate { mutation: Mutation::DeleteGroup { .. }, .. })
        ));

        let next = app.handle_message(Message::Mutated {
            label: "Delete group",
            result: Err(IdcError::Api("ConflictException: in use".into())),
        });
        assert!(next.is_none());
        assert!(!app.busy);
        let report = app.last_error.as_ref().unwrap();
        assert_eq!(report.summary, "Delete group failed");
        assert_eq!(report.profile.as_deref(), Some("admin"));
        assert!(report.lines().iter().any(|l| l.starts_with("hint: ")));

        app.update(Action::ErrorDetails);
        assert_eq!(app.modal, Some(Modal::ErrorDetails));
        app.update(Action::Confirm);
        assert!(app.modal.is_none());
        assert_eq!(app.screen, Screen::GroupsList);
    }

    #[test]
    fn test_remove_user_and_add_user_picker() {
        let mut app = on_detail();
        app.update(Action::Remove);
        match &app.modal {
            Some(Modal::ConfirmRemoveUser { user }) => assert_eq!(user.membership_id, "m-1"),
            other => panic!("expected remove confirmation, got {:?}", other),
        }
        app.update(Action::Back);

        assert!(matches!(app.update(Action::Add), Some(Command::LoadDirectoryUsers { .. })));
        app.handle_message(Message::DirectoryUsersLoaded(Ok(vec![User {
            id: "u-2".into(),
            display_name: "Raj".into(),
            user_name: "raj".into(),
            email: String::new(),
        }])));
        assert!(matches!(app.modal, Some(Modal::PickUser { .. })));
        match app.update(Action::Confirm) {
            Some(Command::Mutate {
                mutation: Mutation::AddMember { group_id, user_id },
                ..
            }) => {
                assert_eq!(group_id, "g-1");
                assert_eq!(user_id, "u-2");
            }
            other => panic!("expected add member, got {:?}", other),
        }
    }

    #[test]
    fn test_help_and_error_details_open_only_without_modal() {
        let mut app = on_groups(1);
        app.update(Action::ErrorDetails);
        assert!(app.modal.is_none(), "no error recorded yet");

        app.update(Action::Help);
        assert_eq!(app.modal, Some(Modal::Help));
        app.update(Action::Move(Nav::Down));
        assert_eq!(app.selected_index(), Some(0));
        app.update(Action::Back);
        assert!(app.modal.is_none());
        assert_eq!(app.screen, Screen::GroupsList);
    }

    #[test]
    fn test_filter_typing_narrows_and_back_clears() {
        let mut app = on_groups(12);
        app.update(Action::ToggleSearch);
        assert!(app.filtering);
        for c in "UP-1".chars() {
            app.update(Action::Char(c));
        }
        // group-1, group-10, group-11
        assert_eq!(app.visible_rows().0.len(), 3);
        app.update(Action::Move(Nav::End));
        assert_eq!(app.selected_index(), Some(11));

        app.update(Action::Back);
        assert!(!app.filtering);
        assert!(app.filter.is_empty());
        assert_eq!(app.visible_rows().0.len(), 12);
        assert_eq!(app.screen, Screen::GroupsList);
    }

    #[test]
    fn test_filter_edits_fetch_count_for_first_match() {
        let mut app = on_groups(3);
        app.update(Action::ToggleSearch);
        for c in "group-".chars() {
            // every group still matches; g-0 is already pending
            assert!(app.update(Action::Char(c)).is_none());
        }
        match app.update(Action::Char('2')) {
            Some(Command::LoadCount { group_id, .. }) => assert_eq!(group_id, "g-2"),
            other => panic!("expected count fetch, got {:?}", other),
        }
        assert_eq!(app.selected_group().map(|g| g.id.as_str()), Some("g-2"));

        assert!(app.update(Action::Backspace).is_none());
        assert_eq!(app.selected_group().map(|g| g.id.as_str()), Some("g-0"));
    }

    #[test]
    fn test_escape_after_filtered_open_restores_source_selection() {
        let mut app = on_groups(3);
        app.update(Action::ToggleSearch);
        for c in "group-2".chars() {
            app.update(Action::Char(c));
        }
        match app.update(Action::Confirm) {
            Some(Command::LoadUsers { group_id, .. }) => assert_eq!(group_id, "g-2"),
            other => panic!("expected users load, got {:?}", other),
        }
        app.handle_message(Message::UsersLoaded {
            group_id: "g-2".into(),
            result: Ok(Vec::new()),
        });

        assert!(app.update(Action::Back).is_none());
        assert_eq!(app.screen, Screen::GroupsList);
        assert!(app.filter.is_empty());
        assert_eq!(app.selected_index(), Some(2));
        assert_eq!(app.selected_group().map(|g| g.id.as_str()), Some("g-2"));
    }

    #[test]
    fn test_footer_offers_cancel_while_discovering() {
        let mut app = on_detail();
        assert!(render::footer_items(&app).contains(&"Esc Back"));

        discover(&mut app);
        assert!(app.is_discovering());
        let items = render::footer_items(&app);
        assert!(items.contains(&"Esc Cancel"));
        assert!(!items.contains(&"Esc Back"));

        app.update(Action::Back);
        assert!(!app.is_discovering());
        assert!(render::footer_items(&app).contains(&"Esc Back"));
    }

    #[test]
    fn test_quit_cancels_in_flight_work() {
        let shutdown = CancellationToken::new();
        let mut app = on_detail();
        app.shutdown = shutdown.clone();
        let (_, cancel) = discover(&mut app);

        app.update(Action::Quit);
        assert!(app.should_quit);
        assert!(cancel.is_cancelled());
        assert!(shutdown.is_cancelled());
    }

    #[test]
    fn test_page_navigation_clamps() {
        let mut selector = Selector::default();
        selector.apply(Nav::PageDown, 25);
        assert_eq!(selector.cursor(), 10);
        selector.apply(Nav::End, 25);
        assert_eq!(selector.cursor(), 24);
        selector.apply(Nav::PageDown, 25);
        assert_eq!(selector.cursor(), 24);
        selector.apply(Nav::Home, 25);
        selector.apply(Nav::Up, 25);
        assert_eq!(selector.cursor(), 0);
        selector.apply(Nav::Down, 0);
        assert_eq!(selector.cursor(), 0);
    }
}
