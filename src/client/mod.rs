//! Client-side session manager for applications talking to the auth server.

mod api;
mod error;
mod session;

pub use api::{AuthClient, DEFAULT_REFRESH_TIMEOUT};
pub use error::ClientError;
pub use session::{
    FileSessionStore, MemorySessionStore, Session, SessionEvent, SessionState, SessionStore,
};
