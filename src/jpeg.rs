// Copyright (c) the rpiraw Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Consumes the cosmetic JPEG image the ISP wraps around a raw capture and
//! forwards only the bytes after its End-Of-Image marker. The wrapper is
//! parsed structurally, marker by marker, without decoding any image data.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::{
    error::{Error, Result},
    pipeline::{Forwarder, PipelineStage},
    util::tracing::*,
};

const MARKER_PREFIX: u8 = 0xff;
const STUFFED_ZERO: u8 = 0x00;

/// Marker types the camera firmware's encoder emits. The wrapper always
/// comes from this one encoder, so the set is closed; any other marker means
/// the stream is corrupt or the chain is out of sync.
#[derive(FromPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
enum Marker {
    BaselineDct = 0xc0,
    HuffmanTable = 0xc4,
    StartOfImage = 0xd8,
    EndOfImage = 0xd9,
    StartOfScan = 0xda,
    QuantTable = 0xdb,
    App0 = 0xe0,
    App1 = 0xe1,
}

impl Marker {
    /// Segments whose body is followed by entropy-coded data instead of the
    /// next marker.
    fn entropy_data_follows(self) -> bool {
        matches!(
            self,
            Marker::StartOfScan | Marker::BaselineDct | Marker::HuffmanTable
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    WantMarkerPrefix,
    WantMarkerType,
    WantLengthHigh { marker: Marker },
    WantLengthLow { marker: Marker, high: u8 },
    SkipBody { marker: Marker, remaining: u16 },
    ScanEntropy,
    SawEscapePrefix,
    Done,
    Failed,
}

/// Stage that discards a baseline-JPEG byte stream and forwards everything
/// after it, unmodified.
pub struct JpegSkipper {
    state: State,
    pos: usize,
}

impl JpegSkipper {
    pub fn new() -> Self {
        JpegSkipper {
            state: State::WantMarkerPrefix,
            pos: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    fn after_body(marker: Marker) -> State {
        if marker.entropy_data_follows() {
            State::ScanEntropy
        } else {
            State::WantMarkerPrefix
        }
    }

    fn enter_marker(&mut self, byte: u8, pos: usize) -> Result<()> {
        let Some(marker) = Marker::from_u8(byte) else {
            self.state = State::Failed;
            return Err(Error::UnknownMarker(byte, pos));
        };
        match marker {
            Marker::StartOfImage => self.state = State::WantMarkerPrefix,
            Marker::EndOfImage => {
                debug!("JPEG wrapper ended after {} bytes", pos + 1);
                self.state = State::Done;
            }
            _ => self.state = State::WantLengthHigh { marker },
        }
        Ok(())
    }
}

impl Default for JpegSkipper {
    fn default() -> Self {
        JpegSkipper::new()
    }
}

impl PipelineStage for JpegSkipper {
    fn name(&self) -> &'static str {
        "jpeg-skipper"
    }

    fn accept_byte(&mut self, byte: u8, fwd: &mut Forwarder) -> Result<()> {
        let pos = self.pos;
        self.pos += 1;
        match self.state {
            State::Done => fwd.forward(byte),
            State::Failed => return Err(Error::Poisoned(self.name())),
            State::WantMarkerPrefix => {
                if byte != MARKER_PREFIX {
                    self.state = State::Failed;
                    return Err(Error::BadMarkerPrefix(byte, pos));
                }
                self.state = State::WantMarkerType;
            }
            State::WantMarkerType => self.enter_marker(byte, pos)?,
            State::WantLengthHigh { marker } => {
                self.state = State::WantLengthLow { marker, high: byte };
            }
            State::WantLengthLow { marker, high } => {
                // Big-endian, and the length field counts itself.
                let length = u16::from_be_bytes([high, byte]);
                if length < 2 {
                    self.state = State::Failed;
                    return Err(Error::BadSegmentLength(length, marker as u8, pos));
                }
                trace!("segment {:?}, {} content bytes", marker, length - 2);
                self.state = if length == 2 {
                    Self::after_body(marker)
                } else {
                    State::SkipBody {
                        marker,
                        remaining: length - 2,
                    }
                };
            }
            State::SkipBody { marker, remaining } => {
                self.state = if remaining == 1 {
                    Self::after_body(marker)
                } else {
                    State::SkipBody {
                        marker,
                        remaining: remaining - 1,
                    }
                };
            }
            State::ScanEntropy => {
                if byte == MARKER_PREFIX {
                    self.state = State::SawEscapePrefix;
                }
            }
            State::SawEscapePrefix => match byte {
                // A stuffed escape: the 0xff was data, keep scanning.
                STUFFED_ZERO => self.state = State::ScanEntropy,
                // Fill byte, stay armed for the marker type.
                MARKER_PREFIX => {}
                _ => self.enter_marker(byte, pos)?,
            },
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state = State::WantMarkerPrefix;
        self.pos = 0;
    }
}
