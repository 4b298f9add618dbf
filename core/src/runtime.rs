use rayon::ThreadPoolBuilder;
use std::env;
use std::sync::OnceLock;

pub const THREADS_ENV_VAR: &str = "MOSAIC_CPU_THREADS";

static THREAD_POOL_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize the global Rayon thread pool used by the feature pre-pass and
/// the compositor.
///
/// Priority:
/// 1. `num_threads` argument
/// 2. `MOSAIC_CPU_THREADS` environment variable
/// 3. Rayon default
///
/// Repeated calls return the first initialization result.
pub fn init_global_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    let res = THREAD_POOL_INIT.get_or_init(|| {
        let configured_threads = match num_threads {
            Some(n) => Some(n),
            None => read_cpu_threads_from_env()?,
        };

        let mut builder = ThreadPoolBuilder::new();
        if let Some(n) = configured_threads {
            if n == 0 {
                return Err(format!("{THREADS_ENV_VAR} must be >= 1"));
            }
            builder = builder.num_threads(n);
        }

        builder.build_global().map_err(|e| e.to_string())
    });
    res.clone()
}

fn read_cpu_threads_from_env() -> Result<Option<usize>, String> {
    let raw = match env::var(THREADS_ENV_VAR) {
        Ok(v) => v,
        Err(env::VarError::NotPresent) => return Ok(None),
        Err(e) => return Err(format!("failed to read {THREADS_ENV_VAR}: {e}")),
    };

    let parsed: usize = raw
        .parse()
        .map_err(|_| format!("{THREADS_ENV_VAR} must be a positive integer, got '{raw}'"))?;
    if parsed == 0 {
        return Err(format!("{THREADS_ENV_VAR} must be >= 1"));
    }
    Ok(Some(parsed))
}
