//! Tunnel Officer command-line front end
//!
//! Configuration file handling, the interactive console and its rendering.
//! The supervision itself lives in `officer-core`.

pub mod console;
pub mod render;
pub mod tunnel_store;
