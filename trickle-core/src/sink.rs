//! Collaborator interfaces on either side of the demuxer.
//!
//! The core never decodes. Packets leave through a [`PacketSink`] (the
//! codec side); [`MuxSink`] is the write direction, turning packets back
//! into container bytes.

use bytes::Bytes;

use crate::error::Result;
use crate::metadata::Metadata;
use crate::packet::Packet;
use crate::stream::Stream;

/// Receives packets as a session produces them.
pub trait PacketSink {
    fn send(&mut self, stream: &Stream, packet: Packet);
}

impl PacketSink for Vec<Packet> {
    fn send(&mut self, _stream: &Stream, packet: Packet) {
        self.push(packet);
    }
}

impl<F> PacketSink for F
where
    F: FnMut(&Stream, Packet),
{
    fn send(&mut self, stream: &Stream, packet: Packet) {
        self(stream, packet)
    }
}

/// Serializes streams and packets into a container byte stream.
pub trait MuxSink {
    fn write_header(&mut self, streams: &[Stream], metadata: &Metadata) -> Result<Bytes>;

    fn write_packet(&mut self, stream: &Stream, packet: &Packet) -> Result<Bytes>;

    fn write_trailer(&mut self) -> Result<Bytes> {
        Ok(Bytes::new())
    }
}
