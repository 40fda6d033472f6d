pub mod error;
pub mod media;
pub mod receiver;
pub mod sdp;
pub mod sender;
pub mod sink;
pub mod transport;

pub use error::{Result, RtpError};
pub use media::Packetizer;
pub use media::access_unit::AccessUnit;
pub use media::h265::{DropCounters, H265Depacketizer, H265Packetizer, PacketizerConfig};
pub use media::nal::{NalHeader, NalUnit, NalUnitType};
pub use media::sequence::SequenceTracker;
pub use receiver::{Receiver, ReceiverConfig, ReceiverStats};
pub use sender::{SendReport, StreamSender};
pub use sink::{AccessUnitQueue, AccessUnitSink, Backpressure, FnSink};
pub use transport::{UdpTransport, receive_loop};
