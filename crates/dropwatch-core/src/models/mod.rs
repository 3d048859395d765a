pub mod lock;
pub mod release;

pub use lock::*;
pub use release::*;
