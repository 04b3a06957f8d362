mod contact;
mod location;
mod session;

pub use contact::*;
pub use location::*;
pub use session::*;
