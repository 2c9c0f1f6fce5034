//! Core library for wallet-login-broker
pub mod config;
pub mod db;
pub mod models;
pub mod auth;
pub mod bus;
pub mod schedule;
