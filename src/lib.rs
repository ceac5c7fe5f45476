pub mod admin;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod gate;
pub mod homework;
pub mod lbapi;
pub mod lbbot;
pub mod lbdb;
pub mod lessons;
pub mod models;
pub mod pacing;
pub mod state;
pub mod support;
pub mod transport;
