// Copyright (c) the rpiraw Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Assembly of the production decode chain. The stage order is fixed by the
//! capture format itself: the JPEG wrapper comes first in the stream, the
//! vendor header next, the raw payload last, and the unpacker needs the
//! header stage's parse result. Building the chain here keeps that ordering
//! and the geometry checks in one place.

use crate::{
    brcm::BrcmHeaderStage,
    error::Result,
    frame::FrameSink,
    jpeg::JpegSkipper,
    mode::{CameraMode, RawFormat},
    pipeline::Pipeline,
    raw::{Raw10ToBayer16, Raw12ToBayer16},
    util::tracing::*,
};

/// Builds the decode chain for `mode`: JPEG skipper, vendor header
/// extractor, then the unpacker matching the mode's packing, with the
/// parsed-header slot wired from the extractor into the unpacker.
pub fn capture_pipeline<'a, S: FrameSink + 'a>(mode: CameraMode, sink: S) -> Result<Pipeline<'a>> {
    mode.validate()?;
    let header_stage = BrcmHeaderStage::new(mode);
    let shared = header_stage.shared_header();
    let pipeline = Pipeline::new()
        .daisy_chain(JpegSkipper::new())
        .daisy_chain(header_stage);
    let pipeline = match mode.format {
        RawFormat::Raw12 => pipeline.daisy_chain(Raw12ToBayer16::new(shared, mode, sink)?),
        RawFormat::Raw10 => pipeline.daisy_chain(Raw10ToBayer16::new(shared, mode, sink)?),
    };
    debug!("capture pipeline assembled: {:?}", pipeline.stage_names());
    Ok(pipeline)
}

/// One-shot decode of a complete capture buffer into `sink`. The caller is
/// responsible for delivering exactly the bytes of one capture; aborted
/// captures need a fresh pipeline (or a reset) instead.
pub fn decode_capture<S: FrameSink>(data: &[u8], mode: CameraMode, sink: S) -> Result<()> {
    let mut pipeline = capture_pipeline(mode, sink)?;
    pipeline.accept(data)
}
