//! Agora - backend for a social marketplace
//!
//! This library provides accounts, sessions and the account directory
//! behind the Agora REST API.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
