pub mod cache;
pub mod dom;
pub mod error;
pub mod forms;
pub mod http;
pub mod script;
pub mod serialize;
pub mod session;
pub mod submit;
pub mod text;

pub use error::{BrowseError, Result};
pub use session::{Action, Page, Session, SessionConfig};
