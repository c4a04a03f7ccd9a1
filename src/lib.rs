//! Multi-user MP/M II emulator: a Z80/8080 interpreter over bank-switched
//! memory, an XIOS dispatch layer, and an SSH/SFTP/HTTP front end onto the
//! guest's consoles and file system. See `DESIGN.md` for how each module
//! here maps onto the component table this crate implements.

pub mod access_log;
pub mod boot;
pub mod bridge;
pub mod config;
pub mod console;
pub mod context;
pub mod cpu;
pub mod disk;
pub mod error;
pub mod host;
pub mod memory;
pub mod runner;
pub mod xios;
