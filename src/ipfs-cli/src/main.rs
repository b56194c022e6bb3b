//! `ipfs` - command line client of the IPFS node.

use std::io::IsTerminal;
use std::process::ExitCode;

use ipfs_cli::Driver;
use ipfs_cli::driver::global_flag;
use ipfs_cli::logging::init_cli_logging;
use ipfs_cmds::{BoxReader, CancelCause, RequestContext};
use ipfs_commands::root::DEBUG_OPTION;
use tracing::debug;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    init_cli_logging(global_flag(&args, DEBUG_OPTION, "D"));

    let ctx = RequestContext::new();
    tokio::spawn({
        let ctx = ctx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupted");
                ctx.cancel_with(CancelCause::Interrupt);
            }
        }
    });

    let stdin: Option<BoxReader> = if std::io::stdin().is_terminal() {
        None
    } else {
        Some(Box::pin(tokio::io::stdin()))
    };

    let code = Driver::default()
        .run(args, stdin, ctx, &mut tokio::io::stdout(), &mut tokio::io::stderr())
        .await;
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
