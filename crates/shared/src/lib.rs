pub mod env;
pub mod error;
pub mod logging;
pub mod port;
pub mod test_utils;
