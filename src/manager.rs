pub mod group;
pub mod plugins;

pub use group::group_manager;
pub use plugins::plugins_manager;
