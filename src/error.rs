// Copyright (c) the rpiraw Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use thiserror::Error;

use crate::mode::RawFormat;

#[derive(Error, Debug)]
pub enum Error {
    // JPEG wrapper structure errors. Offsets count bytes fed into the
    // skipper since the last reset.
    #[error("Expected JPEG marker prefix 0xff, found {0:#04x} at byte {1}")]
    BadMarkerPrefix(u8, usize),
    #[error("Unknown JPEG marker type {0:#04x} at byte {1}")]
    UnknownMarker(u8, usize),
    #[error("Invalid length {0} for JPEG segment {1:#04x} at byte {2}")]
    BadSegmentLength(u16, u8, usize),
    #[error("Stage {0} received input after a fatal error")]
    Poisoned(&'static str),
    // Vendor trailer errors. Offsets count bytes past the JPEG wrapper.
    #[error("Bad raw header magic: expected {0:#04x}, found {1:#04x} at trailer byte {2}")]
    BadHeaderMagic(u8, u8, usize),
    #[error("Raw unpacker received data before the raw header was parsed")]
    HeaderNotParsed,
    #[error("Header reports raw stride {0}, configured mode expects {1}")]
    StrideMismatch(u32, u32),
    #[error("Header reports sensor size {0}x{1}, configured mode expects {2}x{3}")]
    SensorSizeMismatch(u16, u16, u32, u32),
    #[error("Header reports {0} bits per sample, configured mode uses {1}")]
    BitDepthMismatch(u8, u8),
    // Capture geometry errors, raised when a mode or a chain is put together.
    #[error("Raw stride of {0} bytes cannot hold {1} packed {2:?} samples per line")]
    StrideTooSmall(u32, u32, RawFormat),
    #[error("Crop {0}x{1}+{2}+{3} does not fit the {4}x{5} sensor")]
    CropOutOfBounds(usize, usize, usize, usize, u32, u32),
    #[error("{0} unpacker constructed for a {1:?} mode")]
    FormatMismatch(&'static str, RawFormat),
    #[error("Destination size {0}x{1} does not match the capture crop {2}x{3}")]
    DestinationSizeMismatch(usize, usize, usize, usize),
    #[error("Frame buffer holds {0} samples, {1}x{2} needs {3}")]
    BadFrameBufferSize(usize, usize, usize, usize),
    // Chain construction errors.
    #[error("Byte pushed into an empty pipeline")]
    EmptyPipeline,
    #[error("Stage {0} forwarded a byte past the end of the pipeline")]
    ForwardPastEnd(&'static str),
    #[error("Stage {0} forwarded more than {1} bytes for one input byte")]
    ForwardOverflow(&'static str, usize),
    #[error("Tee I/O error: {0}")]
    TeeIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
