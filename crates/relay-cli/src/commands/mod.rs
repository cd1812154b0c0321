pub mod card;
pub mod send;
pub mod session;
