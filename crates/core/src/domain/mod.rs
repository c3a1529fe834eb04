pub mod flow;
pub mod job;
pub mod shift;
pub mod status;
pub mod user;
