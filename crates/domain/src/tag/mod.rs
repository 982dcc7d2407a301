mod config;
pub mod diff;
mod entity;

pub use config::{TagConfig, TagDirection};
pub use entity::{Tag, TagState};
