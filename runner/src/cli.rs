use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{ArgGroup, Parser};
use thiserror::Error;

use crate::attr_payload::AttrPayloadKind;
use crate::metadata_ops::Operation;
use crate::sandbox::SandboxSource;

pub const DEFAULT_CHMOD_MODE: u32 = 0o640;

pub fn print_usage() {
    eprintln!(
        "\
usage:
  metadata-runner (--sbpl <profile.sb> | --blob <profile.sb.bin>) --op <file-read-metadata|file-write*> --path <target>
                  [--syscall <name>] [--attr-payload <cmn|cmn-name|cmn-times|file-size>] [--chmod-mode <octal>]

notes:
  - file-read-metadata syscalls: lstat (default), fstat, getattrlist, setattrlist
  - file-write* syscalls: chmod (default), fchmod, utimes, futimes, lutimes, lchown, fchown, fchownat
  - --chmod-mode defaults to 0640
  - the result is printed as JSON on stdout; exit status is 0 whenever JSON is printed"
    );
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("help requested")]
    Help,
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Parser)]
#[command(
    name = "metadata-runner",
    disable_version_flag = true,
    args_override_self = true,
    group(ArgGroup::new("profile").required(true).multiple(true).args(["sbpl", "blob"]))
)]
struct Args {
    #[arg(long, value_name = "PROFILE.sb")]
    sbpl: Option<PathBuf>,

    #[arg(long, value_name = "PROFILE.sb.bin")]
    blob: Option<PathBuf>,

    #[arg(long, value_enum)]
    op: Operation,

    #[arg(long)]
    path: String,

    #[arg(long)]
    syscall: Option<String>,

    #[arg(long, value_enum)]
    attr_payload: Option<AttrPayloadKind>,

    #[arg(long, value_parser = parse_octal_mode)]
    chmod_mode: Option<u32>,
}

/// A validated request for one run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub source: SandboxSource,
    pub op: Operation,
    pub path: String,
    pub syscall: String,
    pub attr_payload: Option<AttrPayloadKind>,
    pub chmod_mode: u32,
}

fn parse_octal_mode(value: &str) -> Result<u32, String> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| format!("invalid octal mode {value:?}"))?;
    if mode > 0o7777 {
        return Err(format!("mode {value:?} out of range (max 7777)"));
    }
    Ok(mode)
}

pub fn parse_invocation<I, T>(argv: I) -> Result<Invocation, UsageError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::try_parse_from(argv).map_err(|err| match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            UsageError::Help
        }
        _ => {
            let text = err.to_string();
            let first = text.lines().next().unwrap_or("invalid arguments");
            UsageError::Invalid(first.trim_start_matches("error: ").to_string())
        }
    })?;

    // Text profiles win when both sources are given.
    let source = match (args.sbpl, args.blob) {
        (Some(sbpl), _) => SandboxSource::Sbpl(sbpl),
        (None, Some(blob)) => SandboxSource::Blob(blob),
        (None, None) => {
            return Err(UsageError::Invalid(
                "one of --sbpl or --blob is required".to_string(),
            ));
        }
    };

    let syscall = args
        .syscall
        .unwrap_or_else(|| args.op.default_syscall().to_string());

    Ok(Invocation {
        source,
        op: args.op,
        path: args.path,
        syscall,
        attr_payload: args.attr_payload,
        chmod_mode: args.chmod_mode.unwrap_or(DEFAULT_CHMOD_MODE),
    })
}
