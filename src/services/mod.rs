pub mod candidates;
pub mod diversity;
pub mod interactions;
pub mod metrics;
pub mod profile;
pub mod recommendations;
pub mod scoring;
pub mod search;
pub mod vector;
pub mod view_counts;
