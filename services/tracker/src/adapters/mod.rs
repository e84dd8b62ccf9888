pub mod lrs;

pub use lrs::{LrsCredentials, XapiRecordStore};
