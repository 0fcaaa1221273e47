pub mod calibrate;
pub mod characterize;
pub mod config;
pub mod master;
pub mod pipeline;
pub mod quality;
pub mod register;
pub mod screen;
pub mod session;
pub mod stack;
pub mod validate;
