pub mod bidding;
pub mod detector;
pub mod health;
pub mod jobs;
pub mod lifecycle;
pub mod manager;
pub mod notify;
pub mod preferences;
pub mod reliability;
pub mod scheduler;
pub mod scoring;
