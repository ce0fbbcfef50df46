mod connection;

pub use connection::{attach, BrowserAttachment};
