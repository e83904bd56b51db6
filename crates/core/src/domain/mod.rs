pub mod content;
pub mod deferral;
pub mod signature;
pub mod user;
