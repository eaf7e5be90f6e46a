pub mod angple;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod percentiles;
pub mod report;
pub mod runner;
pub mod selector;
pub mod stats;
pub mod task;
pub mod user;
pub mod user_class;
pub mod utils;
pub mod wait_time;
pub mod yaml_config;
