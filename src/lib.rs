//! Core library for ai-playlist-spotify-transfer
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod store;
pub mod api;
pub mod tokens;
pub mod matcher;
pub mod reconciler;
pub mod generator;
pub mod library;
pub mod callback;
