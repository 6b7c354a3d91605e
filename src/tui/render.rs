//! Drawing
//!
//! Pure functions of [`App`]: header, main list (with tabs on the group
//! screen), status bar with footer hints, and modal overlays on top.

use crate::tui::app::{AccountChoice, App, Modal, Row, Screen, StatusLevel, Tab};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Tabs, Wrap},
};

const SPINNER: [&str; 8] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧"];

pub fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(10),   // Main content
            Constraint::Length(3), // Status bar
        ])
        .split(f.area());

    render_header(f, app, chunks[0]);
    render_main(f, app, chunks[1]);
    render_status_bar(f, app, chunks[2]);

    if let Some(modal) = &app.modal {
        render_modal(f, app, modal);
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let dash = |v: Option<&str>| v.unwrap_or("-").to_string();
    let context = format!(
        "profile: {} | region: {} | instance: {}",
        dash(app.profile.as_deref()),
        dash(app.region.as_deref()),
        app.instance
            .as_ref()
            .map(|i| i.short_arn().to_string())
            .unwrap_or_else(|| "-".into()),
    );

    let breadcrumb = match (app.screen, &app.group) {
        (Screen::GroupDetail, Some(group)) => format!("Groups > {}", group.display_name),
        (screen, _) => screen.title().to_string(),
    };

    let header = Paragraph::new(vec![
        Line::from(vec![
            Span::styled(
                " IDC ",
                Style::default()
                    .bg(Color::Rgb(255, 153, 0))
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                " idc-groups ",
                Style::default()
                    .fg(Color::Rgb(255, 153, 0))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" | ", Style::default().fg(Color::DarkGray)),
            Span::styled(breadcrumb, Style::default().fg(Color::Gray)),
        ]),
        Line::from(Span::styled(
            format!(" {}", context),
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .block(
        Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(Color::Rgb(50, 50, 50))),
    );

    f.render_widget(header, area);
}

fn render_main(f: &mut Frame, app: &App, area: Rect) {
    if app.screen == Screen::EstablishSession {
        render_establishing(f, app, area);
        return;
    }

    if app.screen != Screen::GroupDetail {
        render_list(f, app, area);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(5)])
        .split(area);

    let selected = match app.tab {
        Tab::Users => 0,
        Tab::Accounts => 1,
    };
    let tabs = Tabs::new(vec![" Users ", " Accounts "])
        .select(selected)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        );
    f.render_widget(tabs, chunks[0]);
    render_list(f, app, chunks[1]);
}

fn render_establishing(f: &mut Frame, app: &App, area: Rect) {
    let text = if app.busy {
        format!(
            "{} Checking SSO session for profile {}...",
            spinner(app),
            app.profile.as_deref().unwrap_or("-")
        )
    } else {
        "Press Ctrl+R to retry or Esc to pick another profile".to_string()
    };
    let body = Paragraph::new(text).block(
        Block::default()
            .title(" SSO session ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(body, area);
}

fn list_title(app: &App) -> String {
    let base = match (app.screen, app.tab) {
        (Screen::GroupDetail, Tab::Users) => "Members",
        (Screen::GroupDetail, Tab::Accounts) => "Account assignments",
        (screen, _) => screen.title(),
    };
    if app.filtering {
        format!(" {}  /{}_ ", base, app.filter)
    } else if !app.filter.is_empty() {
        format!(" {}  /{} ", base, app.filter)
    } else {
        format!(" {} ", base)
    }
}

fn row_items(rows: &[(usize, Row)]) -> Vec<ListItem<'static>> {
    rows.iter()
        .map(|(_, row)| {
            ListItem::new(Line::from(vec![
                Span::raw(row.title.clone()),
                Span::styled(
                    format!("  {}", row.detail),
                    Style::default().fg(Color::DarkGray),
                ),
            ]))
        })
        .collect()
}

fn highlighted(list: List<'static>) -> List<'static> {
    list.highlight_style(
        Style::default()
            .bg(Color::Cyan)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("► ")
}

fn render_list(f: &mut Frame, app: &App, area: Rect) {
    let (rows, cursor) = app.visible_rows();
    let block = Block::default()
        .title(list_title(app))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    if rows.is_empty() {
        let empty = if app.busy {
            format!("{} Loading...", spinner(app))
        } else if !app.filter.is_empty() {
            "No matches".to_string()
        } else {
            "Nothing here yet (Ctrl+R to refresh)".to_string()
        };
        f.render_widget(
            Paragraph::new(empty)
                .style(Style::default().fg(Color::DarkGray))
                .block(block),
            area,
        );
        return;
    }

    let list = highlighted(List::new(row_items(&rows)).block(block));
    let mut state = ListState::default().with_selected(Some(cursor));
    f.render_stateful_widget(list, area, &mut state);
}

fn spinner(app: &App) -> &'static str {
    SPINNER[(app.ticks / 2) % SPINNER.len()]
}

/// Footer shortcut hints for the current screen
pub fn footer_items(app: &App) -> Vec<&'static str> {
    let mut items = Vec::new();
    if app.last_error.is_some() {
        items.push("^E Error");
    }
    items.extend(["^G Help", "^R Refresh", "^F Search"]);
    match (app.screen, app.tab) {
        (Screen::GroupsList, _) => items.extend(["^N New", "^D Delete"]),
        (Screen::GroupDetail, Tab::Users) => {
            items.extend(["Tab Accounts", "^A Add user", "^X Remove user"])
        }
        (Screen::GroupDetail, Tab::Accounts) => {
            items.extend(["Tab Users", "^A Add assignment", "^X Remove assignment"])
        }
        _ => {}
    }
    let escape = if app.is_discovering() {
        "Esc Cancel"
    } else {
        "Esc Back"
    };
    items.extend(["Enter Select", escape, "^C Quit"]);
    items
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let (msg, style) = match &app.status {
        Some((msg, StatusLevel::Success)) => (msg.clone(), Style::default().fg(Color::Green)),
        Some((msg, StatusLevel::Warning)) => (msg.clone(), Style::default().fg(Color::Yellow)),
        Some((msg, StatusLevel::Error)) => (msg.clone(), Style::default().fg(Color::Red)),
        Some((msg, StatusLevel::Info)) => (msg.clone(), Style::default().fg(Color::Cyan)),
        None => (String::new(), Style::default()),
    };
    let prefix = if app.busy {
        format!("{} ", spinner(app))
    } else {
        String::new()
    };

    let status = Paragraph::new(vec![
        Line::from(Span::styled(format!("{}{}", prefix, msg), style)),
        Line::from(Span::styled(
            footer_items(app).join(" │ "),
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .block(
        Block::default()
            .borders(Borders::TOP)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    f.render_widget(status, area);
}

fn render_modal(f: &mut Frame, app: &App, modal: &Modal) {
    match modal {
        Modal::PickUser { picker, .. }
        | Modal::PickAccount { picker }
        | Modal::PickPermissionSet { picker } => {
            render_picker(f, app, modal.title(), &picker.query);
            return;
        }
        _ => {}
    }

    let (lines, border) = modal_text(app, modal);
    let (width, height) = match modal {
        Modal::Help | Modal::ErrorDetails => (70, 60),
        _ => (60, 35),
    };
    let area = centered_rect(width, height, f.area());
    f.render_widget(Clear, area);

    let body = Paragraph::new(lines)
        .block(
            Block::default()
                .title(format!(" {} ", modal.title()))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border)),
        )
        .style(Style::default().fg(Color::White))
        .wrap(Wrap { trim: false });
    f.render_widget(body, area);
}

fn input_line(value: &str, placeholder: &str) -> Line<'static> {
    if value.is_empty() {
        Line::from(vec![
            Span::raw("> "),
            Span::styled(placeholder.to_string(), Style::default().fg(Color::DarkGray)),
            Span::raw("_"),
        ])
    } else {
        Line::from(format!("> {}_", value))
    }
}

fn hint(text: &str) -> Line<'static> {
    Line::from(Span::styled(
        text.to_string(),
        Style::default().fg(Color::DarkGray),
    ))
}

/// Body lines and border color of a non-list modal
fn modal_text(app: &App, modal: &Modal) -> (Vec<Line<'static>>, Color) {
    let group_name = app
        .group
        .as_ref()
        .map(|g| g.display_name.clone())
        .unwrap_or_default();

    match modal {
        Modal::Help => (
            vec![
                Line::from("Navigation: arrows, Enter, Esc, Tab/Shift+Tab"),
                Line::from("Actions: Ctrl-only shortcuts shown in footer"),
                Line::from(""),
                Line::from("  Ctrl+F   Filter the current list"),
                Line::from("  Ctrl+R   Reload the current screen"),
                Line::from("  Ctrl+N   Create group (groups list)"),
                Line::from("  Ctrl+D   Delete group (groups list)"),
                Line::from("  Ctrl+A   Add user or assignment"),
                Line::from("  Ctrl+X   Remove user or assignment"),
                Line::from("  Ctrl+E   Last error details"),
                Line::from("  Esc      Back, or cancel assignment discovery"),
                Line::from("  Ctrl+C   Quit"),
            ],
            Color::Cyan,
        ),
        Modal::ErrorDetails => {
            let lines = app
                .last_error
                .as_ref()
                .map(|report| report.lines().into_iter().map(Line::from).collect())
                .unwrap_or_else(|| vec![Line::from("No errors recorded")]);
            (lines, Color::Red)
        }
        Modal::Blocking {
            message,
            remediation,
            ..
        } => (
            vec![
                Line::from(Span::styled(
                    message.clone(),
                    Style::default().fg(Color::LightRed),
                )),
                Line::from(""),
                Line::from(remediation.clone()),
                Line::from(""),
                hint("Press Enter to dismiss"),
            ],
            Color::Red,
        ),
        Modal::CreateGroup { name } => (
            vec![
                Line::from("Group name"),
                input_line(name, "engineering"),
                Line::from(""),
                hint("Enter create │ Esc cancel"),
            ],
            Color::Cyan,
        ),
        Modal::ConfirmDeleteGroup { group } => (
            vec![
                Line::from(format!("Delete group {}?", group.display_name)),
                Line::from(""),
                hint("Enter confirm │ Esc cancel"),
            ],
            Color::Yellow,
        ),
        Modal::ConfirmRemoveUser { user } => (
            vec![
                Line::from(format!("Remove {} from {}?", user.display_name, group_name)),
                Line::from(""),
                hint("Enter confirm │ Esc cancel"),
            ],
            Color::Yellow,
        ),
        Modal::EnterAccountId { account_id } => (
            vec![
                Line::from("Organizations access is unavailable. Enter account ID directly."),
                Line::from(""),
                input_line(account_id, "12-digit account ID"),
                Line::from(""),
                hint("Enter next │ Esc cancel"),
            ],
            Color::Cyan,
        ),
        Modal::ConfirmCreateAssignment => {
            let account = match &app.pending.account {
                Some(AccountChoice::Picked(account)) => {
                    format!("{} ({})", account.name, account.id)
                }
                Some(AccountChoice::Manual(id)) => id.clone(),
                None => "-".into(),
            };
            let set = app
                .pending
                .permission_set
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "-".into());
            (
                vec![
                    Line::from(format!("Account: {}", account)),
                    Line::from(format!("Permission set: {}", set)),
                    Line::from(""),
                    hint("Enter create │ Esc cancel"),
                ],
                Color::Yellow,
            )
        }
        Modal::ConfirmRemoveAssignment { assignment } => {
            let account = if assignment.account_name.trim().is_empty() {
                assignment.account_id.clone()
            } else {
                assignment.account_name.clone()
            };
            (
                vec![
                    Line::from(format!(
                        "Remove {} on {}?",
                        assignment.permission_set_name, account
                    )),
                    Line::from(""),
                    hint("Enter confirm │ Esc cancel"),
                ],
                Color::Yellow,
            )
        }
        Modal::PickUser { .. } | Modal::PickAccount { .. } | Modal::PickPermissionSet { .. } => {
            (Vec::new(), Color::Cyan)
        }
    }
}

fn render_picker(f: &mut Frame, app: &App, title: &str, query: &str) {
    let area = centered_rect(60, 70, f.area());
    f.render_widget(Clear, area);

    let block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(2), Constraint::Min(3)])
        .split(inner);

    f.render_widget(Paragraph::new(input_line(query, "type to filter")), chunks[0]);

    let (rows, cursor) = app.visible_modal_rows();
    if rows.is_empty() {
        f.render_widget(
            Paragraph::new("No matches").style(Style::default().fg(Color::DarkGray)),
            chunks[1],
        );
        return;
    }
    let list = highlighted(List::new(row_items(&rows)));
    let mut state = ListState::default().with_selected(Some(cursor));
    f.render_stateful_widget(list, chunks[1], &mut state);
}

/// Helper to create a centered rect
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
