mod auxiliary;

pub use auxiliary::*;
