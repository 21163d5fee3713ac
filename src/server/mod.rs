pub mod auth;
pub mod config;
pub mod connection;
pub mod database;
pub mod error;
pub mod messages;
pub mod notifications;
pub mod presence;
pub mod threads;
pub mod users;
pub mod websocket;
