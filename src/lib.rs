//! nsbox: a minimal process isolation launcher
//! New namespaces, a memory control group, a chroot with fresh /proc and a veth pair

pub mod bootstrap;
pub mod cgroup;
pub mod cli;
pub mod config;
pub mod filesystem;
pub mod launcher;
pub mod logs;
pub mod namespace;
pub mod network;
pub mod preflight;
pub mod signals;
pub mod types;
