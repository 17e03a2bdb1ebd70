use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::dylib::DylibError;

pub const BUNDLE_ENV: &str = "DSC_EXTRACTOR_BUNDLE";
pub const EXTRACT_SYMBOL: &str = "dyld_shared_cache_extract_dylibs_progress";

const DEFAULT_BUNDLE_CANDIDATES: [&str; 2] = [
    "/usr/lib/dsc_extractor.bundle",
    "/Applications/Xcode.app/Contents/Developer/Platforms/MacOSX.platform/usr/lib/dsc_extractor.bundle",
];

pub const EXIT_USAGE: i32 = 2;
pub const EXIT_UNAVAILABLE: i32 = 1;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("dsc_extractor.bundle not found. Install Xcode if needed.")]
    BundleNotFound,
    #[error("dlopen failed: {0}")]
    Load(#[source] DylibError),
    #[error("symbol not found in bundle: {0}")]
    MissingSymbol(#[source] DylibError),
    #[error("dsc_extractor.bundle cannot be loaded on this platform")]
    Unsupported,
    #[error("path contains NUL byte: {0}")]
    InvalidPath(String),
}

/// Receives (current, total) as the routine works through the cache.
pub type ProgressSink = fn(u32, u32);

pub fn report_progress(current: u32, total: u32) {
    if total > 0 {
        eprint!("\rExtracting {current}/{total}");
    }
}

/// Unpacks a shared cache into a directory and returns the routine's status code.
pub trait CacheExtractor {
    fn extract(&self, cache: &Path, output: &Path, progress: ProgressSink) -> Result<i32, ExtractError>;
}

pub fn candidate_bundles() -> Vec<PathBuf> {
    match std::env::var_os(BUNDLE_ENV) {
        Some(path) if !path.is_empty() => vec![PathBuf::from(path)],
        _ => DEFAULT_BUNDLE_CANDIDATES.iter().map(PathBuf::from).collect(),
    }
}

pub fn locate_bundle(candidates: &[PathBuf]) -> Option<&Path> {
    candidates
        .iter()
        .find(|candidate| candidate.exists())
        .map(PathBuf::as_path)
}

fn print_usage() {
    eprintln!("usage: dsc-extract <path-to-dyld_shared_cache> <output-dir>");
}

/// Drives one extraction and returns the process exit code.
pub fn run<L>(args: &[OsString], candidates: &[PathBuf], load: L) -> i32
where
    L: FnOnce(&Path) -> Result<Box<dyn CacheExtractor>, ExtractError>,
{
    let [cache, output] = args else {
        print_usage();
        return EXIT_USAGE;
    };

    let Some(bundle) = locate_bundle(candidates) else {
        eprintln!("{}", ExtractError::BundleNotFound);
        return EXIT_UNAVAILABLE;
    };
    tracing::info!(bundle = %bundle.display(), "using extractor bundle");

    let extractor = match load(bundle) {
        Ok(extractor) => extractor,
        Err(err) => {
            eprintln!("{err}");
            return EXIT_UNAVAILABLE;
        }
    };

    let rc = match extractor.extract(Path::new(cache), Path::new(output), report_progress) {
        Ok(rc) => rc,
        Err(err) => {
            eprintln!("{err}");
            return EXIT_UNAVAILABLE;
        }
    };
    eprintln!();
    if rc != 0 {
        eprintln!("extraction failed rc={rc}");
    }
    rc
}

#[cfg(target_os = "macos")]
pub use bundle::load_bundle;

#[cfg(not(target_os = "macos"))]
pub fn load_bundle(_path: &Path) -> Result<Box<dyn CacheExtractor>, ExtractError> {
    Err(ExtractError::Unsupported)
}

#[cfg(target_os = "macos")]
mod bundle {
    use std::ffi::CString;
    use std::os::raw::{c_char, c_int, c_ulong, c_void};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    use super::{CacheExtractor, EXTRACT_SYMBOL, ExtractError, ProgressSink};
    use crate::dylib::Library;

    type ExtractFn =
        unsafe extern "C" fn(cache: *const c_char, output: *const c_char, progress: *const c_void) -> c_int;

    #[link(name = "System")]
    unsafe extern "C" {
        static _NSConcreteStackBlock: [*const c_void; 32];
    }

    #[repr(C)]
    struct BlockDescriptor {
        reserved: c_ulong,
        size: c_ulong,
    }

    /// Block literal for `void (^)(unsigned, unsigned)` capturing one fn pointer.
    #[repr(C)]
    struct ProgressBlock {
        isa: *const c_void,
        flags: c_int,
        reserved: c_int,
        invoke: unsafe extern "C" fn(*const ProgressBlock, u32, u32),
        descriptor: *const BlockDescriptor,
        sink: ProgressSink,
    }

    static PROGRESS_DESCRIPTOR: BlockDescriptor = BlockDescriptor {
        reserved: 0,
        size: std::mem::size_of::<ProgressBlock>() as c_ulong,
    };

    unsafe extern "C" fn invoke_progress(block: *const ProgressBlock, current: u32, total: u32) {
        let sink = unsafe { (*block).sink };
        sink(current, total);
    }

    impl ProgressBlock {
        fn new(sink: ProgressSink) -> Self {
            ProgressBlock {
                isa: unsafe { (&raw const _NSConcreteStackBlock).cast::<c_void>() },
                flags: 0,
                reserved: 0,
                invoke: invoke_progress,
                descriptor: &PROGRESS_DESCRIPTOR,
                sink,
            }
        }
    }

    pub struct BundleExtractor {
        // Keeps `entry` mapped.
        _library: Library,
        entry: ExtractFn,
    }

    fn c_path(path: &Path) -> Result<CString, ExtractError> {
        CString::new(path.as_os_str().as_bytes())
            .map_err(|_| ExtractError::InvalidPath(path.display().to_string()))
    }

    impl CacheExtractor for BundleExtractor {
        fn extract(&self, cache: &Path, output: &Path, progress: ProgressSink) -> Result<i32, ExtractError> {
            let cache = c_path(cache)?;
            let output = c_path(output)?;
            let block = ProgressBlock::new(progress);
            let rc = unsafe {
                (self.entry)(
                    cache.as_ptr(),
                    output.as_ptr(),
                    (&block as *const ProgressBlock).cast::<c_void>(),
                )
            };
            Ok(rc)
        }
    }

    pub fn load_bundle(path: &Path) -> Result<Box<dyn CacheExtractor>, ExtractError> {
        let library = Library::open(path, libc::RTLD_NOW).map_err(ExtractError::Load)?;
        let symbol = library
            .symbol(EXTRACT_SYMBOL)
            .map_err(ExtractError::MissingSymbol)?;
        tracing::debug!(bundle = library.path(), symbol = EXTRACT_SYMBOL, "resolved entry point");
        let entry = unsafe { std::mem::transmute::<*mut c_void, ExtractFn>(symbol) };
        Ok(Box::new(BundleExtractor {
            _library: library,
            entry,
        }))
    }
}
