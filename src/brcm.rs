// Copyright (c) the rpiraw Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! The vendor trailer the ISP appends after the JPEG wrapper: a magic tag,
//! a fixed-layout record describing the raw data that follows, and padding
//! up to a fixed total size. Only the record is interpreted; everything else
//! in the header block is discarded and the raw payload is forwarded.

use std::{cell::RefCell, rc::Rc};

use byteorder::{ByteOrder, LittleEndian};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::{
    error::{Error, Result},
    mode::CameraMode,
    pipeline::{Forwarder, PipelineStage},
    util::tracing::*,
};

/// ASCII tag opening the vendor trailer.
pub const HEADER_MAGIC: &[u8; 5] = b"@BRCM";
/// Size of the fixed-layout record following the magic.
pub const RECORD_SIZE: usize = 160;
/// The firmware pads the whole trailer header to this size no matter what
/// the record contains; raw pixel data starts right after.
pub const HEADER_SIZE: usize = 32768;

const NAME_SIZE: usize = 128;
const RESERVED_SIZE: usize = 14;

/// Color filter layout of the first two scanlines.
#[derive(FromPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BayerOrder {
    Bggr = 0,
    Gbrg = 1,
    Grbg = 2,
    Rggb = 3,
}

/// The parsed trailer record. Fields the decode chain does not interpret
/// are stored verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawHeader {
    /// NUL-padded ASCII mode name, kept opaque.
    pub name: [u8; NAME_SIZE],
    pub width: u16,
    pub height: u16,
    pub padding_right: u16,
    pub padding_down: u16,
    /// Packed bytes per raw scanline as transmitted, padding included.
    pub raw_stride: u32,
    pub transform: u16,
    pub format: u16,
    pub bayer_order: u8,
    pub bits_per_sample: u8,
    pub reserved: [u8; RESERVED_SIZE],
}

impl RawHeader {
    fn parse(record: &[u8; RECORD_SIZE]) -> Self {
        let mut name = [0u8; NAME_SIZE];
        name.copy_from_slice(&record[..NAME_SIZE]);
        let mut reserved = [0u8; RESERVED_SIZE];
        reserved.copy_from_slice(&record[RECORD_SIZE - RESERVED_SIZE..]);
        RawHeader {
            name,
            width: LittleEndian::read_u16(&record[128..]),
            height: LittleEndian::read_u16(&record[130..]),
            padding_right: LittleEndian::read_u16(&record[132..]),
            padding_down: LittleEndian::read_u16(&record[134..]),
            raw_stride: LittleEndian::read_u32(&record[136..]),
            transform: LittleEndian::read_u16(&record[140..]),
            format: LittleEndian::read_u16(&record[142..]),
            bayer_order: record[144],
            bits_per_sample: record[145],
            reserved,
        }
    }

    /// The mode name with its NUL padding trimmed.
    pub fn mode_name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn bayer_order(&self) -> Option<BayerOrder> {
        BayerOrder::from_u8(self.bayer_order)
    }
}

/// Handle through which consumers observe the header parsed by
/// [`BrcmHeaderStage`]. Clones are cheap and all observe the same slot;
/// only the parsing stage writes it.
#[derive(Clone, Debug, Default)]
pub struct SharedHeader(Rc<RefCell<Option<RawHeader>>>);

impl SharedHeader {
    pub fn get(&self) -> Option<RawHeader> {
        self.0.borrow().clone()
    }

    fn publish(&self, header: RawHeader) {
        *self.0.borrow_mut() = Some(header);
    }

    fn clear(&self) {
        *self.0.borrow_mut() = None;
    }

    /// A slot pre-filled without running the parsing stage, for driving the
    /// unpackers standalone.
    #[cfg(test)]
    pub(crate) fn preset(header: RawHeader) -> Self {
        let slot = SharedHeader::default();
        slot.publish(header);
        slot
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Magic { matched: usize },
    Record { filled: usize },
    Discard { remaining: usize },
    Forward,
    Failed,
}

/// Stage that parses the vendor trailer header, cross-checks it against the
/// configured mode, publishes it, and forwards the raw payload.
pub struct BrcmHeaderStage {
    mode: CameraMode,
    shared: SharedHeader,
    record: [u8; RECORD_SIZE],
    state: State,
    pos: usize,
}

impl BrcmHeaderStage {
    pub fn new(mode: CameraMode) -> Self {
        BrcmHeaderStage {
            mode,
            shared: SharedHeader::default(),
            record: [0; RECORD_SIZE],
            state: State::Magic { matched: 0 },
            pos: 0,
        }
    }

    /// The slot this stage publishes into; hand it to the unpacker.
    pub fn shared_header(&self) -> SharedHeader {
        self.shared.clone()
    }

    /// The embedded header must agree with the statically configured
    /// expectation; a mismatch means the capture was set up for a different
    /// mode and the frame cannot be decoded.
    fn check_against_mode(header: &RawHeader, mode: &CameraMode) -> Result<()> {
        if header.raw_stride != mode.raw_stride {
            return Err(Error::StrideMismatch(header.raw_stride, mode.raw_stride));
        }
        if u32::from(header.width) != mode.sensor_width
            || u32::from(header.height) != mode.sensor_height
        {
            return Err(Error::SensorSizeMismatch(
                header.width,
                header.height,
                mode.sensor_width,
                mode.sensor_height,
            ));
        }
        if header.bits_per_sample != mode.format.bits_per_sample() {
            return Err(Error::BitDepthMismatch(
                header.bits_per_sample,
                mode.format.bits_per_sample(),
            ));
        }
        Ok(())
    }
}

impl PipelineStage for BrcmHeaderStage {
    fn name(&self) -> &'static str {
        "brcm-header"
    }

    fn accept_byte(&mut self, byte: u8, fwd: &mut Forwarder) -> Result<()> {
        let pos = self.pos;
        self.pos += 1;
        match self.state {
            State::Magic { matched } => {
                if byte != HEADER_MAGIC[matched] {
                    self.state = State::Failed;
                    return Err(Error::BadHeaderMagic(HEADER_MAGIC[matched], byte, pos));
                }
                self.state = if matched + 1 == HEADER_MAGIC.len() {
                    State::Record { filled: 0 }
                } else {
                    State::Magic {
                        matched: matched + 1,
                    }
                };
            }
            State::Record { filled } => {
                self.record[filled] = byte;
                if filled + 1 == RECORD_SIZE {
                    let header = RawHeader::parse(&self.record);
                    if let Err(e) = Self::check_against_mode(&header, &self.mode) {
                        self.state = State::Failed;
                        return Err(e);
                    }
                    debug!(
                        "raw header: mode {:?}, {}x{}, stride {}",
                        header.mode_name(),
                        header.width,
                        header.height,
                        header.raw_stride
                    );
                    self.shared.publish(header);
                    self.state = State::Discard {
                        remaining: HEADER_SIZE - HEADER_MAGIC.len() - RECORD_SIZE,
                    };
                } else {
                    self.state = State::Record { filled: filled + 1 };
                }
            }
            State::Discard { remaining } => {
                self.state = if remaining == 1 {
                    State::Forward
                } else {
                    State::Discard {
                        remaining: remaining - 1,
                    }
                };
            }
            State::Forward => fwd.forward(byte),
            State::Failed => return Err(Error::Poisoned(self.name())),
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.shared.clear();
        self.state = State::Magic { matched: 0 };
        self.pos = 0;
    }
}
