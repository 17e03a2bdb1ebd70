mod attr_payload;
mod cli;
mod dylib;
mod errno_names;
mod json_contract;
mod logging;
mod metadata_ops;
mod sandbox;

use std::env;
use std::path::Path;

use attr_payload::{AttrPayload, AttrPayloadKind};
use json_contract::{RunResult, RunTarget};
use metadata_ops::{MetadataCall, OpContext, OpOutcome};
use sandbox::SandboxApplier;

// EX_USAGE from sysexits.h.
const EX_USAGE: i32 = 64;

/// Applies the sandbox, then runs at most one metadata call.
fn run(invocation: &cli::Invocation, applier: &dyn SandboxApplier) -> RunResult {
    let target = RunTarget {
        op: invocation.op.as_str(),
        path: &invocation.path,
        syscall: &invocation.syscall,
        attr_payload: invocation.attr_payload.map(AttrPayloadKind::as_str),
    };
    let ctx = OpContext {
        chmod_mode: invocation.chmod_mode as libc::mode_t,
        attr_payload: AttrPayload::build(invocation.attr_payload.unwrap_or(AttrPayloadKind::Cmn)),
    };

    let apply = applier.apply(Some(&invocation.source));
    if !apply.applied() {
        tracing::debug!(rc = apply.rc, mode = ?apply.mode, "sandbox apply failed; skipping operation");
        return RunResult::apply_failed(&target, &apply);
    }

    let outcome = match MetadataCall::resolve(invocation.op, &invocation.syscall) {
        Some(call) => metadata_ops::perform(call, Path::new(&invocation.path), &ctx),
        None => {
            tracing::debug!(op = invocation.op.as_str(), syscall = %invocation.syscall, "unsupported combination");
            OpOutcome::invalid(invocation.op, &invocation.syscall)
        }
    };
    RunResult::completed(&target, &apply, outcome)
}

fn main() {
    logging::init();

    let invocation = match cli::parse_invocation(env::args_os()) {
        Ok(invocation) => invocation,
        Err(cli::UsageError::Help) => {
            cli::print_usage();
            return;
        }
        Err(err) => {
            eprintln!("{err}\n");
            cli::print_usage();
            std::process::exit(EX_USAGE);
        }
    };

    let result = run(&invocation, &sandbox::SystemSandbox);
    if let Err(err) = json_contract::print_result(&result) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
