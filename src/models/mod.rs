pub mod assignment;
pub mod courier;
pub mod earning;
pub mod event;
pub mod order;
pub mod payout;
