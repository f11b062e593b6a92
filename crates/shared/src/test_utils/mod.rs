pub mod helpers;

pub use helpers::INIT_TEST_ONCE;
