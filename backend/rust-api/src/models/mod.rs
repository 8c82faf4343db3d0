pub mod case;
pub mod events;
pub mod session;
