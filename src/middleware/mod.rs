pub mod auth;

pub use auth::{BearerIdentity, CookieIdentity};
