// Shared between the server and the operator tools
pub mod models;
pub mod protocol;
