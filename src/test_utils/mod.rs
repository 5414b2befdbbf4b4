use std::time::{Duration, Instant};

/// Spin-waits until `predicate` holds, panicking after `timeout`.
///
/// Timing-sensitive tests use generous timeouts and assert on ordering
/// facts, not on wall-clock precision.
pub(crate) fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    while !predicate() {
        assert!(
            Instant::now() < deadline,
            "condition not reached within {:?}",
            timeout
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}
