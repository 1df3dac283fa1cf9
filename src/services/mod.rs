pub mod access;
pub mod geocode;
pub mod insertion;
pub mod store;
