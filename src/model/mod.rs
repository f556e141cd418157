pub mod session;
pub mod signal;
pub mod symbol;
pub mod tick;
