use std::num::NonZeroUsize;

/// Default worker count: one thread per core, minus one for the caller,
/// never less than one.
pub(crate) fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    cores.saturating_sub(1).max(1)
}
