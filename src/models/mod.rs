pub mod badge;
pub mod query;
pub mod rank;
pub mod session;
pub mod snapshot;
pub mod user;
