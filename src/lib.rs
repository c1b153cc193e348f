pub mod auth;
pub mod compactor;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod seed;
pub mod sql;
pub mod timefmt;
pub mod tls;
pub mod wal;
pub mod wire;
