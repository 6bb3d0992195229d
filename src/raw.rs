// Copyright (c) the rpiraw Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Unpacking of the sensor's bit-packed raw stream into 16-bit Bayer
//! samples. The pure group codecs are separated from the streaming stages
//! so the bit arithmetic can be tested on its own.

use crate::{
    brcm::SharedHeader,
    error::{Error, Result},
    frame::FrameSink,
    mode::{CameraMode, RawFormat},
    pipeline::{Forwarder, PipelineStage},
};

/// Decodes one RAW12 group: three bytes carrying two samples. The first
/// byte's low nibble holds the top 4 bits of sample A and its high nibble
/// the top 4 bits of sample B; the second and third bytes hold the low 8
/// bits of A and B. Each sample is shifted so its 12 significant bits sit
/// in the top of the 16-bit slot.
///
/// ```
/// assert_eq!(rpiraw::raw::unpack_raw12([0x21, 0xab, 0xcd]), [0x1ab0, 0x2cd0]);
/// ```
pub fn unpack_raw12(group: [u8; 3]) -> [u16; 2] {
    let a = (u16::from(group[0] & 0x0f) << 12) | (u16::from(group[1]) << 4);
    let b = (u16::from(group[0] & 0xf0) << 8) | (u16::from(group[2]) << 4);
    [a, b]
}

/// Exact inverse of [`unpack_raw12`] for samples whose low 4 bits are zero.
pub fn pack_raw12(samples: [u16; 2]) -> [u8; 3] {
    let a = samples[0] >> 4;
    let b = samples[1] >> 4;
    [
        ((a >> 8) as u8 & 0x0f) | (((b >> 8) as u8 & 0x0f) << 4),
        (a & 0xff) as u8,
        (b & 0xff) as u8,
    ]
}

/// Decodes one RAW10 group: five bytes carrying four samples. Bytes 0..3
/// hold the top 8 bits of samples 0..3; the fifth byte holds the remaining
/// 2 low-order bits of each sample, two bits per sample, sample `i` in bits
/// `2i..=2i+1`. The 10 significant bits sit in the top of the 16-bit slot.
///
/// ```
/// assert_eq!(
///     rpiraw::raw::unpack_raw10([0x12, 0x34, 0x56, 0x78, 0b1110_0100]),
///     [0x1200, 0x3440, 0x5680, 0x78c0]
/// );
/// ```
pub fn unpack_raw10(group: [u8; 5]) -> [u16; 4] {
    array_init::array_init(|i| {
        let low = u16::from((group[4] >> (2 * i)) & 0x03);
        (u16::from(group[i]) << 8) | (low << 6)
    })
}

/// Exact inverse of [`unpack_raw10`] for samples whose low 6 bits are zero.
pub fn pack_raw10(samples: [u16; 4]) -> [u8; 5] {
    let mut out = [0u8; 5];
    for (i, &sample) in samples.iter().enumerate() {
        let value = sample >> 6;
        out[i] = (value >> 2) as u8;
        out[4] |= ((value & 0x03) as u8) << (2 * i);
    }
    out
}

/// Position of the unpacker within the raw stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RasterCursor {
    /// Sample column within the current raw line, padding included.
    pub col: usize,
    /// Raw line index from the top of the frame.
    pub row: usize,
    /// Bytes consumed within the current raw line.
    pub line_byte: usize,
}

/// Streaming bookkeeping shared by the two unpacker variants: the cursor,
/// the crop mapping, and the stride learned from the parsed header.
struct BayerWriter<S: FrameSink> {
    shared: SharedHeader,
    mode: CameraMode,
    sink: S,
    cursor: RasterCursor,
    stride: Option<usize>,
}

impl<S: FrameSink> BayerWriter<S> {
    fn new(
        variant: &'static str,
        format: RawFormat,
        shared: SharedHeader,
        mode: CameraMode,
        sink: S,
    ) -> Result<Self> {
        mode.validate()?;
        if mode.format != format {
            return Err(Error::FormatMismatch(variant, mode.format));
        }
        if (sink.width(), sink.height()) != (mode.crop.width, mode.crop.height) {
            return Err(Error::DestinationSizeMismatch(
                sink.width(),
                sink.height(),
                mode.crop.width,
                mode.crop.height,
            ));
        }
        Ok(BayerWriter {
            shared,
            mode,
            sink,
            cursor: RasterCursor::default(),
            stride: None,
        })
    }

    /// Raw line stride in bytes, from the header the brcm stage parsed.
    /// Fetched on the first byte of a frame; data arriving while the slot
    /// is still empty means the chain was assembled out of order.
    fn stride(&mut self) -> Result<usize> {
        if let Some(stride) = self.stride {
            return Ok(stride);
        }
        let header = self.shared.get().ok_or(Error::HeaderNotParsed)?;
        let stride = header.raw_stride as usize;
        self.stride = Some(stride);
        Ok(stride)
    }

    /// Writes one decoded group at the cursor. Samples falling outside the
    /// crop window or the destination (stride padding, sub-frame borders)
    /// are consumed without being written.
    fn write_samples(&mut self, samples: &[u16]) {
        let crop = self.mode.crop;
        let row = self.cursor.row;
        if row >= crop.y && row - crop.y < self.sink.height() {
            let y = row - crop.y;
            for (i, &value) in samples.iter().enumerate() {
                let col = self.cursor.col + i;
                if col >= crop.x && col - crop.x < self.sink.width() {
                    self.sink.put(col - crop.x, y, value);
                }
            }
        }
        self.cursor.col += samples.len();
    }

    /// Accounts for one consumed byte; true when it ends the raw line.
    fn consume_byte(&mut self, stride: usize) -> bool {
        self.cursor.line_byte += 1;
        if self.cursor.line_byte == stride {
            self.cursor.col = 0;
            self.cursor.row += 1;
            self.cursor.line_byte = 0;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.cursor = RasterCursor::default();
        self.stride = None;
    }
}

/// Accumulator for one 3-byte RAW12 group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Raw12Group {
    #[default]
    Empty,
    One(u8),
    Two(u8, u8),
}

impl Raw12Group {
    fn push(&mut self, byte: u8) -> Option<[u16; 2]> {
        match *self {
            Raw12Group::Empty => {
                *self = Raw12Group::One(byte);
                None
            }
            Raw12Group::One(b0) => {
                *self = Raw12Group::Two(b0, byte);
                None
            }
            Raw12Group::Two(b0, b1) => {
                *self = Raw12Group::Empty;
                Some(unpack_raw12([b0, b1, byte]))
            }
        }
    }
}

/// Accumulator for one 5-byte RAW10 group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Raw10Group {
    bytes: [u8; 4],
    len: usize,
}

impl Raw10Group {
    fn push(&mut self, byte: u8) -> Option<[u16; 4]> {
        if self.len < 4 {
            self.bytes[self.len] = byte;
            self.len += 1;
            None
        } else {
            self.len = 0;
            Some(unpack_raw10([
                self.bytes[0],
                self.bytes[1],
                self.bytes[2],
                self.bytes[3],
                byte,
            ]))
        }
    }

    fn clear(&mut self) {
        self.len = 0;
    }
}

/// Chain tail that unpacks a RAW12 stream into the destination frame.
pub struct Raw12ToBayer16<S: FrameSink> {
    writer: BayerWriter<S>,
    group: Raw12Group,
}

impl<S: FrameSink> Raw12ToBayer16<S> {
    /// `header` must come from the brcm stage placed earlier in the same
    /// chain; the destination must match the mode's crop size.
    pub fn new(header: SharedHeader, mode: CameraMode, sink: S) -> Result<Self> {
        Ok(Raw12ToBayer16 {
            writer: BayerWriter::new("RAW12", RawFormat::Raw12, header, mode, sink)?,
            group: Raw12Group::Empty,
        })
    }

    pub fn cursor(&self) -> RasterCursor {
        self.writer.cursor
    }

    pub fn sink(&self) -> &S {
        &self.writer.sink
    }
}

impl<S: FrameSink> PipelineStage for Raw12ToBayer16<S> {
    fn name(&self) -> &'static str {
        "raw12-to-bayer16"
    }

    fn accept_byte(&mut self, byte: u8, _fwd: &mut Forwarder) -> Result<()> {
        let stride = self.writer.stride()?;
        if let Some(samples) = self.group.push(byte) {
            self.writer.write_samples(&samples);
        }
        if self.writer.consume_byte(stride) {
            // Strides are not group-aligned; a trailing partial group
            // belongs to the line padding and is dropped.
            self.group = Raw12Group::Empty;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.writer.reset();
        self.group = Raw12Group::Empty;
    }
}

/// Chain tail that unpacks a RAW10 stream into the destination frame.
pub struct Raw10ToBayer16<S: FrameSink> {
    writer: BayerWriter<S>,
    group: Raw10Group,
}

impl<S: FrameSink> Raw10ToBayer16<S> {
    /// `header` must come from the brcm stage placed earlier in the same
    /// chain; the destination must match the mode's crop size.
    pub fn new(header: SharedHeader, mode: CameraMode, sink: S) -> Result<Self> {
        Ok(Raw10ToBayer16 {
            writer: BayerWriter::new("RAW10", RawFormat::Raw10, header, mode, sink)?,
            group: Raw10Group::default(),
        })
    }

    pub fn cursor(&self) -> RasterCursor {
        self.writer.cursor
    }

    pub fn sink(&self) -> &S {
        &self.writer.sink
    }
}

impl<S: FrameSink> PipelineStage for Raw10ToBayer16<S> {
    fn name(&self) -> &'static str {
        "raw10-to-bayer16"
    }

    fn accept_byte(&mut self, byte: u8, _fwd: &mut Forwarder) -> Result<()> {
        let stride = self.writer.stride()?;
        if let Some(samples) = self.group.push(byte) {
            self.writer.write_samples(&samples);
        }
        if self.writer.consume_byte(stride) {
            self.group.clear();
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.writer.reset();
        self.group.clear();
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::brcm::RawHeader;

    /// Sink that checks the stage's own bounds discipline: any write the
    /// stage lets through must be inside the destination, and each position
    /// is counted.
    struct CountingSink {
        width: usize,
        height: usize,
        samples: Vec<u16>,
        counts: Vec<u32>,
    }

    impl CountingSink {
        fn new(width: usize, height: usize) -> Self {
            CountingSink {
                width,
                height,
                samples: vec![0; width * height],
                counts: vec![0; width * height],
            }
        }
    }

    impl FrameSink for CountingSink {
        fn width(&self) -> usize {
            self.width
        }

        fn height(&self) -> usize {
            self.height
        }

        fn samples_mut(&mut self) -> &mut [u16] {
            &mut self.samples
        }

        fn put(&mut self, x: usize, y: usize, value: u16) {
            assert!(
                x < self.width && y < self.height,
                "write outside destination: ({x}, {y})"
            );
            self.counts[y * self.width + x] += 1;
            self.samples[y * self.width + x] = value;
        }
    }

    fn header_for(mode: &CameraMode) -> RawHeader {
        RawHeader {
            name: [0; 128],
            width: mode.sensor_width as u16,
            height: mode.sensor_height as u16,
            padding_right: 0,
            padding_down: 0,
            raw_stride: mode.raw_stride,
            transform: 0,
            format: 0,
            bayer_order: 0,
            bits_per_sample: mode.format.bits_per_sample(),
            reserved: [0; 14],
        }
    }

    fn feed<S: PipelineStage>(stage: &mut S, data: &[u8]) -> Result<()> {
        let mut fwd = Forwarder::new();
        for &byte in data {
            stage.accept_byte(byte, &mut fwd)?;
        }
        Ok(())
    }

    /// Packs one raw line of 12-bit samples (values already shifted into
    /// the high bits) and pads it to `stride` bytes.
    fn raw12_line(samples: &[u16], stride: usize) -> Vec<u8> {
        let mut line = Vec::with_capacity(stride);
        for pair in samples.chunks(2) {
            line.extend(pack_raw12([pair[0], pair[1]]));
        }
        line.resize(stride, 0xee);
        line
    }

    fn raw10_line(samples: &[u16], stride: usize) -> Vec<u8> {
        let mut line = Vec::with_capacity(stride);
        for quad in samples.chunks(4) {
            line.extend(pack_raw10([quad[0], quad[1], quad[2], quad[3]]));
        }
        line.resize(stride, 0xee);
        line
    }

    #[test]
    fn raw12_group_layout() {
        // Worked fixture: low nibble of byte 0 tops sample A, high nibble
        // tops sample B, bytes 1 and 2 fill in the low eight bits.
        assert_eq!(unpack_raw12([0x21, 0xab, 0xcd]), [0x1ab0, 0x2cd0]);
        assert_eq!(unpack_raw12([0x00, 0x00, 0x00]), [0, 0]);
        assert_eq!(unpack_raw12([0xff, 0xff, 0xff]), [0xfff0, 0xfff0]);
    }

    #[test]
    fn raw10_group_layout() {
        assert_eq!(
            unpack_raw10([0x12, 0x34, 0x56, 0x78, 0b1110_0100]),
            [0x1200, 0x3440, 0x5680, 0x78c0]
        );
        assert_eq!(unpack_raw10([0, 0, 0, 0, 0]), [0; 4]);
        assert_eq!(unpack_raw10([0xff; 5]), [0xffc0; 4]);
    }

    #[test]
    fn group_codecs_roundtrip() {
        arbtest::arbtest(|u| {
            let group: [u8; 3] = u.arbitrary()?;
            assert_eq!(pack_raw12(unpack_raw12(group)), group);
            let group: [u8; 5] = u.arbitrary()?;
            assert_eq!(pack_raw10(unpack_raw10(group)), group);
            Ok(())
        });
    }

    #[test]
    fn raw12_full_frame_imx477() {
        let mode = CameraMode::imx477();
        let shared = SharedHeader::preset(header_for(&mode));
        let sink = CountingSink::new(4056, 3040);
        let mut stage = Raw12ToBayer16::new(shared, mode, sink).unwrap();
        let line: Vec<u8> = [0x21, 0xab, 0xcd]
            .iter()
            .copied()
            .cycle()
            .take(6112)
            .collect();
        let mut fwd = Forwarder::new();
        for _ in 0..3040 {
            for &byte in &line {
                stage.accept_byte(byte, &mut fwd).unwrap();
            }
        }
        assert_eq!(
            stage.cursor(),
            RasterCursor {
                col: 0,
                row: 3040,
                line_byte: 0
            }
        );
        // Every destination position was written exactly once, with the
        // value the group layout predicts for its column parity.
        let sink = stage.sink();
        assert!(sink.counts.iter().all(|&c| c == 1));
        for y in 0..3040 {
            assert_eq!(sink.samples[y * 4056], 0x1ab0);
            assert_eq!(sink.samples[y * 4056 + 1], 0x2cd0);
            assert_eq!(sink.samples[y * 4056 + 4054], 0x1ab0);
            assert_eq!(sink.samples[y * 4056 + 4055], 0x2cd0);
        }
    }

    #[test]
    fn raw12_roundtrips_a_synthetic_pattern() {
        let mode = CameraMode::new(8, 4, 15, RawFormat::Raw12);
        let pattern: Vec<u16> = (0..8 * 4).map(|i| (i as u16) << 4).collect();
        let mut data = Vec::new();
        for row in pattern.chunks(8) {
            data.extend(raw12_line(row, 15));
        }
        let shared = SharedHeader::preset(header_for(&mode));
        let mut stage = Raw12ToBayer16::new(shared, mode, CountingSink::new(8, 4)).unwrap();
        feed(&mut stage, &data).unwrap();
        assert_eq!(stage.sink().samples, pattern);
        assert!(stage.sink().counts.iter().all(|&c| c == 1));
    }

    #[test]
    fn raw10_roundtrips_a_synthetic_pattern() {
        let mode = CameraMode::new(8, 2, 15, RawFormat::Raw10);
        let pattern: Vec<u16> = (0..8 * 2).map(|i| (i as u16) << 6).collect();
        let mut data = Vec::new();
        for row in pattern.chunks(8) {
            data.extend(raw10_line(row, 15));
        }
        let shared = SharedHeader::preset(header_for(&mode));
        let mut stage = Raw10ToBayer16::new(shared, mode, CountingSink::new(8, 2)).unwrap();
        feed(&mut stage, &data).unwrap();
        assert_eq!(stage.sink().samples, pattern);
        assert_eq!(stage.cursor().row, 2);
    }

    #[test]
    fn crop_writes_only_the_window() {
        let mode = CameraMode::new(8, 4, 15, RawFormat::Raw12)
            .with_crop(crate::mode::CropRect {
                x: 2,
                y: 1,
                width: 4,
                height: 2,
            })
            .unwrap();
        let full: Vec<u16> = (0..8 * 4).map(|i| (i as u16) << 4).collect();
        let mut data = Vec::new();
        for row in full.chunks(8) {
            data.extend(raw12_line(row, 15));
        }
        let shared = SharedHeader::preset(header_for(&mode));
        let mut stage = Raw12ToBayer16::new(shared, mode, CountingSink::new(4, 2)).unwrap();
        feed(&mut stage, &data).unwrap();
        let expected: Vec<u16> = (0u16..2)
            .flat_map(|y| (0u16..4).map(move |x| ((y + 1) * 8 + x + 2) << 4))
            .collect();
        assert_eq!(stage.sink().samples, expected);
        assert!(stage.sink().counts.iter().all(|&c| c == 1));
    }

    #[test]
    fn padding_never_writes_out_of_bounds() {
        arbtest::arbtest(|u| {
            let width = u.int_in_range(1usize..=24)?;
            let height = u.int_in_range(1usize..=8)?;
            let min_stride = RawFormat::Raw12.packed_len(width as u32);
            let stride = min_stride + u.int_in_range(0u32..=16)?;
            let mode = CameraMode::new(width as u32, height as u32, stride, RawFormat::Raw12);
            let shared = SharedHeader::preset(header_for(&mode));
            let mut stage =
                Raw12ToBayer16::new(shared, mode, CountingSink::new(width, height)).unwrap();
            let data = vec![0xa5u8; stride as usize * height];
            feed(&mut stage, &data).unwrap();
            let cursor = stage.cursor();
            assert_eq!((cursor.row, cursor.col, cursor.line_byte), (height, 0, 0));
            assert!(stage.sink().counts.iter().all(|&c| c == 1));
            Ok(())
        });
    }

    #[test]
    fn unpacker_requires_a_parsed_header() {
        let mode = CameraMode::new(8, 4, 15, RawFormat::Raw12);
        let mut stage =
            Raw12ToBayer16::new(SharedHeader::default(), mode, CountingSink::new(8, 4)).unwrap();
        assert!(matches!(
            feed(&mut stage, &[0]),
            Err(Error::HeaderNotParsed)
        ));
    }

    #[test]
    fn construction_checks_geometry() {
        let mode = CameraMode::new(8, 4, 15, RawFormat::Raw12);
        let shared = SharedHeader::preset(header_for(&mode));
        assert!(matches!(
            Raw12ToBayer16::new(shared.clone(), mode, CountingSink::new(8, 3)),
            Err(Error::DestinationSizeMismatch(8, 3, 8, 4))
        ));
        assert!(matches!(
            Raw10ToBayer16::new(shared, mode, CountingSink::new(8, 4)),
            Err(Error::FormatMismatch("RAW10", RawFormat::Raw12))
        ));
    }

    #[test]
    fn reset_returns_to_origin() {
        let mode = CameraMode::new(8, 4, 15, RawFormat::Raw12);
        let shared = SharedHeader::preset(header_for(&mode));
        let mut stage =
            Raw12ToBayer16::new(shared.clone(), mode, CountingSink::new(8, 4)).unwrap();
        feed(&mut stage, &[1, 2, 3, 4]).unwrap();
        assert_ne!(stage.cursor(), RasterCursor::default());
        stage.reset();
        assert_eq!(stage.cursor(), RasterCursor::default());
        // The stride is re-fetched from the slot on the next frame.
        feed(&mut stage, &[1]).unwrap();
        assert_eq!(stage.cursor().line_byte, 1);
    }
}
