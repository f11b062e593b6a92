use std::sync::Once;

pub static INIT_TEST_ONCE: Once = Once::new();

/// Initialize process-wide test infrastructure exactly once.
///
/// Tests call this through the `setup_test!` macro; repeated invocations are
/// no-ops so tests can run in any order and in parallel.
#[macro_export]
macro_rules! setup_test {
    () => {{
        $crate::test_utils::INIT_TEST_ONCE.call_once(|| {
            $crate::env::load_optional_env_files();
            $crate::logging::configure_logging().unwrap();
        });
    }};
}

pub use setup_test;
