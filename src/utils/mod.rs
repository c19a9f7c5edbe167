pub mod cache;
pub mod hash;
pub mod keyed_mutex;
pub mod naming;
pub mod validation;
