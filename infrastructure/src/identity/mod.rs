pub mod session;

pub use session::SessionIdentity;
