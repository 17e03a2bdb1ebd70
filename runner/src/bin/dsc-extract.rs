#[path = "../dsc_extractor.rs"]
mod dsc_extractor;
#[path = "../dylib.rs"]
#[allow(dead_code)]
mod dylib;
#[path = "../logging.rs"]
mod logging;

use std::env;
use std::ffi::OsString;

fn main() {
    logging::init();

    let args: Vec<OsString> = env::args_os().skip(1).collect();
    let candidates = dsc_extractor::candidate_bundles();
    let code = dsc_extractor::run(&args, &candidates, dsc_extractor::load_bundle);
    std::process::exit(code);
}
