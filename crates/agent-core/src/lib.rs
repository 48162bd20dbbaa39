pub mod agent;
pub mod database;
pub mod logging;
