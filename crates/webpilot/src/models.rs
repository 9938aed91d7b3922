//! These models represent the objects exchanged with the language model
//!
//! The inference operations build messages and tools in these internal structs and the
//! providers convert them to and from each vendor's wire format using to/from helpers.
//! Because several providers share them, the internal models are not an exact match to
//! any single API.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
