pub mod fasih_client;

pub use fasih_client::{FasihApi, FasihClient};
