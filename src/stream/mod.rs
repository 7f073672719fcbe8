pub mod user_data;

pub use user_data::{StreamState, UserDataEvent, UserDataHandler, UserDataStream};
