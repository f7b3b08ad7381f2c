/// Logging macros
#[macro_use]
pub mod macro_logger;
/// Errors
#[macro_use]
pub mod error;
/// Cryptographic utilities
pub mod crypto_utils;
/// Debug printing of byte material
pub mod debug_utils;
/// Transaction weight and fee utilities
pub mod transaction_utils;
