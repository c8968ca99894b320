pub mod currency;
pub mod password;
pub mod sanitize;
pub mod token;
