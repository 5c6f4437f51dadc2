pub mod auth;

pub use auth::{AdminUser, AuthLayer, AuthRejection, AuthenticatedUser, CurrentUser, OptionalUser};
