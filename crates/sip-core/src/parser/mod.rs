pub mod headers;
pub mod message;
pub mod uri;

pub use message::{find_header_end, is_ping_body, parse_message};
