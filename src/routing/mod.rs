//! Request routing and hot reload of the route table.

pub mod reload;
pub mod router;

pub use reload::HotReloader;
pub use router::{Route, Router};
