pub mod aggregator;
pub mod disburser;
pub mod provider;
pub mod settlement;
