#![deny(unsafe_code)]

//! Console front end for the invoice desk.

/// Line-oriented presentation stand-in driving the session controllers.
pub mod console;
/// Still-image camera source.
pub mod device;
/// Settings persistence and layering.
pub mod settings;
