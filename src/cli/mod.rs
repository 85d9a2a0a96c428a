//! The lone command line: input assembly and the run entry point.
//!
//! Syntax: `<lone> [framework-flags] <verb> [getopt-flags] [pk[/sub/path]]
//! [--- <yaml>]`. Successful parsing always exits 0, errors included — the
//! error travels as an `_error` YAML document; only bootstrap failures exit
//! non-zero.

mod cmdline;
mod io;
mod local;
mod run;

pub use cmdline::{
    expand_path, get_cmdline, parse_framework_opts, parse_pk_path, CmdLine, FrameworkOptions,
    UsageError,
};
pub use io::read_stdin;
pub use local::{get_path_for_request, is_body_required, local_handler, validate_requests};
pub use run::{make_requests, run};
