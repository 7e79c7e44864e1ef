mod client;
mod types;

pub use client::{ControlPlaneApi, HttpControlPlane};
pub use types::*;
