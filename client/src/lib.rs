//! Assistant front end: camera, speech and the three assistant modes.

pub mod app;
pub mod camera;
pub mod console;
pub mod model;
pub mod remote;
pub mod speech;
