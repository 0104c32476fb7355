mod subscribe;
mod token;

pub use subscribe::*;
pub use token::*;
