#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[cfg(target_family = "unix")]
#[macro_use]
extern crate tracing;

#[cfg(target_family = "unix")]
pub mod authz;
#[cfg(target_family = "unix")]
pub mod command;
#[cfg(target_family = "unix")]
pub mod credential;
#[cfg(target_family = "unix")]
pub mod daemon;
#[cfg(target_family = "unix")]
pub mod diagnostics;
#[cfg(target_family = "unix")]
pub mod disco;
#[cfg(target_family = "unix")]
pub mod ini;
#[cfg(target_family = "unix")]
pub mod kinit;
#[cfg(target_family = "unix")]
pub mod login;
#[cfg(target_family = "unix")]
pub mod membership;
#[cfg(target_family = "unix")]
pub mod packages;
#[cfg(target_family = "unix")]
pub mod pipeline;
#[cfg(target_family = "unix")]
pub mod provider;
#[cfg(target_family = "unix")]
pub mod realm;
#[cfg(target_family = "unix")]
pub mod registry;
#[cfg(target_family = "unix")]
pub mod server;
#[cfg(target_family = "unix")]
pub mod services;
#[cfg(target_family = "unix")]
pub mod tools;
