pub mod delivery;
pub mod dispatch;
pub mod locks;
pub mod queue;
pub mod selection;
