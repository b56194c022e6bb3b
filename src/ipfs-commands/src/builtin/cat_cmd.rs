//! `ipfs cat`.

use std::io::Cursor;

use bytes::{Bytes, BytesMut};
use ipfs_cmds::{ArgumentDef, CmdError, Command, HelpText, OptionDef, names};

use crate::env::NodeEnv;
use crate::node::{Cid, read_leaves};

const LENGTH: &str = "length";

pub fn command() -> Command {
    Command::new()
        .help(
            HelpText::new("Show IPFS object data.")
                .short("Displays the data contained by an IPFS object.")
                .long(
                    "Displays the data of the objects at <ipfs-path>, concatenated.\n\
                     --offset and --length select a byte range of the result.",
                ),
        )
        .argument(
            ArgumentDef::string("ipfs-path", true, true, "The path to the IPFS object(s) to be outputted.")
                .enable_stdin(),
        )
        .option(OptionDef::int64(names::OFFSET, "Byte offset to begin reading from.").alias("o"))
        .option(OptionDef::int64(LENGTH, "Maximum number of bytes to read.").alias("l"))
        .run_fn(|req, emitter| async move {
            let env = NodeEnv::from_request(&req)?;
            let offset = req.option::<i64>(names::OFFSET)?.unwrap_or(0);
            if offset < 0 {
                return Err(CmdError::client("cannot specify negative offset"));
            }
            let length = match req.option::<i64>(LENGTH)? {
                Some(n) if n < 0 => return Err(CmdError::client("cannot specify negative length")),
                Some(n) => Some(n as usize),
                None => None,
            };

            let mut data = BytesMut::new();
            for path in req.all_arguments().await? {
                req.context().check()?;
                let cid: Cid = path.parse()?;
                for leaf in read_leaves(env.blocks(), &cid).await? {
                    data.extend_from_slice(&leaf);
                }
            }

            emitter.emit_reader(Cursor::new(select_range(data.freeze(), offset as usize, length))).await
        })
}

fn select_range(data: Bytes, offset: usize, length: Option<usize>) -> Bytes {
    let start = offset.min(data.len());
    let end = match length {
        Some(n) => start.saturating_add(n).min(data.len()),
        None => data.len(),
    };
    data.slice(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_range() {
        let data = Bytes::from_static(b"0123456789");
        assert_eq!(select_range(data.clone(), 0, None), data);
        assert_eq!(&select_range(data.clone(), 3, Some(4))[..], b"3456");
        assert_eq!(&select_range(data.clone(), 8, Some(10))[..], b"89");
        assert!(select_range(data, 20, None).is_empty());
    }
}
