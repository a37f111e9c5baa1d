pub mod api;
pub mod completion;
pub mod config;
pub mod exercise;
pub mod fill_blank;
pub mod media;
pub mod models;
pub mod navigation;
pub mod quiz;
pub mod routes;
pub mod session;
pub mod shell;
pub mod speech;
