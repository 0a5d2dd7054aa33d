pub mod layout;
pub(crate) mod lock;
pub mod options;

mod core;
pub use core::Runtime;
pub use options::RuntimeOptions;
