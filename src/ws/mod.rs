pub mod observers;
pub mod session;

pub use observers::{ObserverId, ValueCallback, ValueObservers};
pub use session::*;
