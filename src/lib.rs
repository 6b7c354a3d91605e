//! idc-groups: manage IAM Identity Center groups, memberships and account
//! assignments from a terminal UI.
//!
//! The binary is a thin clap front end over these modules. The library
//! exists so the state machine and the gateway can be driven from
//! integration tests without a terminal.

pub mod cmd;
pub mod config;
pub mod error;
pub mod gateway;
pub mod tui;
