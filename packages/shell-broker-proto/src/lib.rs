//! Wire protocol shared by `shell-broker` and `shell-broker-client` so the
//! two binaries can never drift on framing or command shape.

pub mod codec;
pub mod protocol;

pub use codec::{FrameError, JsonFrameCodec};
pub use protocol::{BrokerRequest, BrokerResponse, Envelope, PopResult, ResponseStatus};
