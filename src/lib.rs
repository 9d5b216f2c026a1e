pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod resume;

#[cfg(test)]
pub(crate) mod test_util;
