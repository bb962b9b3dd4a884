//! Bearer credential verification.

pub mod token;

pub use token::TokenAuthenticator;
