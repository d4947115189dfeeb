// Invalidation protocol: the command codec and the controller that speaks it
pub mod controller;
pub mod messages;

pub use controller::ClusterController;
pub use messages::{CacheKey, Command};
