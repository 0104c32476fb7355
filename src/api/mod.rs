pub mod errors;
pub mod v1;
