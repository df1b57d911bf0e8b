pub mod account;
pub mod events;

pub use account::*;
pub use events::*;
