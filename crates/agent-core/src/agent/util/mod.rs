pub mod directories;
pub mod error;
pub mod glob;
pub mod path;
pub mod providers;
pub mod request_channel;
