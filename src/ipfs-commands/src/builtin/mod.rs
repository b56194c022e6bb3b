//! Commands of the node.
//!
//! One module per top-level command. Each exposes a `command()` (or, for
//! `routing_cmd`, one constructor per tree) returning the fully described
//! [`Command`](ipfs_cmds::Command); [`crate::root`] assembles them.

pub mod add_cmd;
pub mod cat_cmd;
pub mod commands_cmd;
pub mod completion_cmd;
pub mod config_cmd;
pub mod pin_cmd;
pub mod routing_cmd;
pub mod swarm_cmd;
pub mod update_cmd;
pub mod version_cmd;

pub use add_cmd::AddEvent;
pub use config_cmd::ConfigField;
pub use pin_cmd::{PinLsEntry, PinOutput};
pub use version_cmd::VersionOutput;
