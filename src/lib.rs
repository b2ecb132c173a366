pub mod camera;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod pose;
pub mod render;
pub mod rig;
