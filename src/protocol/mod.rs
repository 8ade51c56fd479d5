//! RPC wire protocol.
//!
//! # Data Flow
//! ```text
//! Outbound:
//!     RpcMeta + payload
//!         → compression.rs (apply codec)
//!         → frame.rs (8-byte length header + bincode meta + body)
//!         → socket
//!
//! Inbound:
//!     socket bytes
//!         → decoder.rs (HTTP head, then length-prefixed packets)
//!         → frame.rs (split meta / body)
//!         → compression.rs (undo codec)
//! ```
//!
//! # Design Decisions
//! - Frames ride inside the body of a single long-lived HTTP/1.1 response;
//!   the handshake in http.rs opens it once per socket
//! - Request and response metadata are one tagged type sharing the header

pub mod compression;
pub mod decoder;
pub mod frame;
pub mod http;
pub mod meta;

pub use compression::CompressType;
pub use decoder::{BodyDetector, FrameDecoder, FrameSink, RpcPacketDetector};
pub use frame::{Envelope, FRAME_HEADER_LEN};
pub use http::{handshake_request, parse_response_head, ResponseHead};
pub use meta::{MetaKind, RpcMeta};
