//! Inbox triage: fetch unread mail over IMAP and classify it with a language model.

pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod pipeline;
pub mod server;
