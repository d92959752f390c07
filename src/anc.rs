//! Ancillary data hand-off at the consumer.

use serde::{Deserialize, Serialize};

use crate::format::RasterLayout;

/// SMPTE 291 data identifier pair of CEA-708 caption distribution packets.
pub const CEA708_DID: u8 = 0x61;
pub const CEA708_SDID: u8 = 0x01;
/// SMPTE 291 data identifier pair of CEA-608 caption packets.
pub const CEA608_DID: u8 = 0x61;
pub const CEA608_SDID: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AncKind {
    Cea708,
    Cea608,
    Other { did: u8, sdid: u8 },
}

impl AncKind {
    pub fn from_ids(did: u8, sdid: u8) -> Self {
        match (did, sdid) {
            (CEA708_DID, CEA708_SDID) => AncKind::Cea708,
            (CEA608_DID, CEA608_SDID) => AncKind::Cea608,
            (did, sdid) => AncKind::Other { did, sdid },
        }
    }
}

/// One decoded ancillary packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncPacket {
    pub kind: AncKind,
    /// Video line the packet was carried on, when known
    pub line: Option<u16>,
    pub payload: Vec<u8>,
}

/// Decodes ancillary packets out of captured data.
pub trait AncillaryDecoder: Send + Sync {
    /// Packets from the ancillary side-channel buffers (VANC off).
    fn decode_side_channel(&self, field1: &[u8], field2: Option<&[u8]>) -> Vec<AncPacket>;

    /// Packets from the VANC lines at the top of a tall frame buffer.
    fn decode_vanc(&self, vanc: &[u8], layout: &RasterLayout) -> Vec<AncPacket>;
}

/// Decoder for buffers holding packed 8-bit packets `[did, sdid, count, data..]`.
///
/// A zero DID or a truncated packet ends the stream. In tall rasters every
/// VANC line is decoded as its own stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketDecoder;

impl PacketDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_stream(data: &[u8], line: Option<u16>, out: &mut Vec<AncPacket>) {
        let mut rest = data;
        while let [did, sdid, count, tail @ ..] = rest {
            let count = *count as usize;
            if *did == 0 || tail.len() < count {
                break;
            }
            out.push(AncPacket {
                kind: AncKind::from_ids(*did, *sdid),
                line,
                payload: tail[..count].to_vec(),
            });
            rest = &tail[count..];
        }
    }
}

impl AncillaryDecoder for PacketDecoder {
    fn decode_side_channel(&self, field1: &[u8], field2: Option<&[u8]>) -> Vec<AncPacket> {
        let mut packets = Vec::new();
        Self::decode_stream(field1, None, &mut packets);
        if let Some(field2) = field2 {
            Self::decode_stream(field2, None, &mut packets);
        }
        packets
    }

    fn decode_vanc(&self, vanc: &[u8], layout: &RasterLayout) -> Vec<AncPacket> {
        let mut packets = Vec::new();
        if layout.line_stride == 0 {
            return packets;
        }
        for (index, line) in vanc.chunks(layout.line_stride).enumerate() {
            Self::decode_stream(line, Some(index as u16 + 1), &mut packets);
        }
        packets
    }
}

/// First CEA-708 payload among `packets`.
pub fn find_captions(packets: &[AncPacket]) -> Option<Vec<u8>> {
    packets
        .iter()
        .find(|packet| packet.kind == AncKind::Cea708)
        .map(|packet| packet.payload.clone())
}
