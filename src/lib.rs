//! Mermaid render gateway: turns diagram text into images, documents and
//! pages through a shared headless Chromium.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
