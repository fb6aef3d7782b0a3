//! Client core for a photo gallery with AI captioning: capture or upload an
//! image, have it described and tagged remotely, search the gallery by tag,
//! like images, and chat about the most recent one.

pub mod backend;
pub mod camera;
pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod gallery;
pub mod likes;
pub mod media;
pub mod records;
pub mod remote;
pub mod session;
pub mod store;
pub mod upload;

pub use config::Config;
pub use error::{Error, ErrorKind, Result, RowsOp};
pub use session::SessionContext;
