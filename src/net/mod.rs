mod mac;

pub use self::mac::{MacAddr, MacParseError};
