//! Exercise generation core for the Parlare language-learning assistant.
//!
//! A [`controller::TurnController`] drives a tool-augmented dialogue with a
//! completion service until it produces the structured exercise the session's
//! difficulty requires; the [`dispatcher::OutputDispatcher`] then attaches
//! generated media through the [`assets::AssetPipeline`].

pub mod assets;
pub mod controller;
pub mod dispatcher;
pub mod exercise;
pub mod llm_client;
pub mod prompts;
pub mod session;
pub mod storage;
pub mod synthesizer;
pub mod tools;
pub mod vector_store;
pub mod web_search;
