//! Request handlers.
//!
//! `comfyui` forwards requests to the backend unchanged; `upscale` runs
//! whole upscale jobs through the orchestrator.

pub mod comfyui;
pub mod upscale;
