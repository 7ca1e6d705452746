pub mod client;
pub mod decode;
pub mod limits;
pub mod report;
pub mod runner;
pub mod schema;
pub mod types;
