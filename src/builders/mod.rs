mod query;

pub use query::{Builder, Fetched};
