// Copyright (c) the rpiraw Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Diagnostic pass-through stage. Records every byte it accepts to a side
//! writer and forwards it unchanged, so it can be spliced anywhere in a
//! chain to capture the stream at that point for offline inspection. Not
//! part of the decode contract.

use std::io::Write;

use crate::{
    error::Result,
    pipeline::{Forwarder, PipelineStage},
};

pub struct PipeTee<W: Write> {
    sink: W,
}

impl<W: Write> PipeTee<W> {
    /// Hand in a buffered writer; the tee writes one byte at a time.
    pub fn new(sink: W) -> Self {
        PipeTee { sink }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> PipelineStage for PipeTee<W> {
    fn name(&self) -> &'static str {
        "pipe-tee"
    }

    fn accept_byte(&mut self, byte: u8, fwd: &mut Forwarder) -> Result<()> {
        self.sink.write_all(&[byte])?;
        fwd.forward(byte);
        Ok(())
    }

    // The side channel is append-only across frames; only the stream
    // position restarts.
    fn reset(&mut self) {}
}
