// Copyright (c) the rpiraw Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Statically configured capture geometry. The collaborator that set up the
//! camera owns these values; the decode chain cross-checks them against the
//! header embedded in each capture and treats any disagreement as fatal.

use crate::error::{Error, Result};

/// Bit packing of the raw sample stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawFormat {
    /// Five bytes carry four 10-bit samples.
    Raw10,
    /// Three bytes carry two 12-bit samples.
    Raw12,
}

impl RawFormat {
    pub fn group_bytes(self) -> usize {
        match self {
            RawFormat::Raw10 => 5,
            RawFormat::Raw12 => 3,
        }
    }

    pub fn group_samples(self) -> usize {
        match self {
            RawFormat::Raw10 => 4,
            RawFormat::Raw12 => 2,
        }
    }

    pub fn bits_per_sample(self) -> u8 {
        match self {
            RawFormat::Raw10 => 10,
            RawFormat::Raw12 => 12,
        }
    }

    /// Packed byte length of `samples` samples, rounded up to whole groups.
    pub fn packed_len(self, samples: u32) -> u32 {
        samples.div_ceil(self.group_samples() as u32) * self.group_bytes() as u32
    }
}

/// Sub-frame capture region, in sensor pixels. Samples outside the crop are
/// decoded and discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// One supported sensor configuration: the full sensor geometry, the raw
/// line stride the ISP transmits (packed bytes per scanline, padding
/// included), the bit packing, and the active crop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraMode {
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub raw_stride: u32,
    pub format: RawFormat,
    pub crop: CropRect,
}

impl CameraMode {
    /// A full-sensor mode; use [`CameraMode::with_crop`] for sub-frames.
    pub fn new(sensor_width: u32, sensor_height: u32, raw_stride: u32, format: RawFormat) -> Self {
        CameraMode {
            sensor_width,
            sensor_height,
            raw_stride,
            format,
            crop: CropRect {
                x: 0,
                y: 0,
                width: sensor_width as usize,
                height: sensor_height as usize,
            },
        }
    }

    /// Full-frame mode of the IMX477 (HQ camera): 4056x3040, RAW12 packed
    /// into 6112-byte lines.
    pub fn imx477() -> Self {
        CameraMode::new(4056, 3040, 6112, RawFormat::Raw12)
    }

    /// Full-frame mode of the IMX219 (camera module v2): 3280x2464, RAW10
    /// packed into 4128-byte lines.
    pub fn imx219() -> Self {
        CameraMode::new(3280, 2464, 4128, RawFormat::Raw10)
    }

    pub fn with_crop(mut self, crop: CropRect) -> Result<Self> {
        self.crop = crop;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.raw_stride < self.format.packed_len(self.sensor_width) {
            return Err(Error::StrideTooSmall(
                self.raw_stride,
                self.sensor_width,
                self.format,
            ));
        }
        let crop = &self.crop;
        if crop.width == 0
            || crop.height == 0
            || crop.x + crop.width > self.sensor_width as usize
            || crop.y + crop.height > self.sensor_height as usize
        {
            return Err(Error::CropOutOfBounds(
                crop.width,
                crop.height,
                crop.x,
                crop.y,
                self.sensor_width,
                self.sensor_height,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn packed_lengths() {
        assert_eq!(RawFormat::Raw12.packed_len(4056), 6084);
        assert_eq!(RawFormat::Raw10.packed_len(3280), 4100);
        // Odd sample counts round up to a whole group.
        assert_eq!(RawFormat::Raw12.packed_len(7), 12);
        assert_eq!(RawFormat::Raw10.packed_len(5), 10);
        assert_eq!(RawFormat::Raw12.packed_len(0), 0);
    }

    #[test]
    fn shipped_modes_are_consistent() {
        CameraMode::imx477().validate().unwrap();
        CameraMode::imx219().validate().unwrap();
    }

    #[test]
    fn stride_must_cover_packed_width() {
        let mode = CameraMode::new(4056, 3040, 6083, RawFormat::Raw12);
        assert!(matches!(
            mode.validate(),
            Err(Error::StrideTooSmall(6083, 4056, RawFormat::Raw12))
        ));
    }

    #[test]
    fn crop_must_fit_sensor() {
        let crop = CropRect {
            x: 4000,
            y: 0,
            width: 100,
            height: 16,
        };
        assert!(matches!(
            CameraMode::imx477().with_crop(crop),
            Err(Error::CropOutOfBounds(..))
        ));
        let crop = CropRect {
            x: 8,
            y: 8,
            width: 640,
            height: 480,
        };
        let mode = CameraMode::imx477().with_crop(crop).unwrap();
        assert_eq!(mode.crop, crop);
    }
}
