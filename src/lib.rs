// Rental Client - request pipeline for the rental management backend

pub mod auth;
pub mod cancel;
pub mod config;
pub mod error;
pub mod http_client;
pub mod retry;
pub mod storage;
pub mod utils;
