pub mod auth;
pub mod request;
pub mod response;
pub mod task;

pub use auth::*;
pub use request::*;
pub use response::*;
pub use task::*;
