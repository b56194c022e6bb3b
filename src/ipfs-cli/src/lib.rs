//! IPFS command line driver and API server.
//!
//! - [`driver`] - the `ipfs` binary: request building, help, remote
//!   dispatch to a daemon and in-process execution
//! - [`daemon`] - the `ipfs-api-server` binary: repository ownership, the
//!   `api` file and the command route
//! - [`logging`] - subscriber setup shared by both binaries

pub mod daemon;
pub mod driver;
pub mod logging;

pub use daemon::run_daemon;
pub use driver::Driver;
