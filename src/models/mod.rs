pub mod assignment;
pub mod bid;
pub mod driver;
pub mod history;
pub mod notification;
pub mod preferences;
pub mod route;
pub mod shift;
