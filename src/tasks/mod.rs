pub mod flush;
pub mod graph_persist;
pub mod heartbeat;
pub mod rotate;
