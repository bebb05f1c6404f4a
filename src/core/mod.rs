pub mod config;
pub mod options;
pub mod pipeline;
pub mod renderer;
pub mod reputation;
pub mod template;
