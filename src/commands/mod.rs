pub mod db;
pub mod scheduler;
pub mod sessions;
pub mod settings;
pub mod source;
pub mod stats;
