pub mod algorithm;
pub mod hash;
pub mod hmac;
