pub mod health;
pub mod internal;
pub mod tracking;
pub mod ws;
