pub mod endpoint;
pub mod header;
pub mod header_name;
pub mod message;
pub mod method;
pub mod param;
pub mod status;
pub mod uri;
pub mod via;

pub use endpoint::{ChannelId, ConnectionId, Protocol, SipEndpoint};
pub use header::{CSeq, Header, NameAddr};
pub use header_name::HeaderName;
pub use message::{BodyEncoding, Message, Request, Response};
pub use method::Method;
pub use param::Param;
pub use status::StatusCode;
pub use uri::{Host, Scheme, Uri};
pub use via::Via;
