//! Firmware files
//!
//! FPGA bitstreams are raw arrays of host-order 32-bit words whose length
//! is fixed per hardware revision; a file of any other length is rejected
//! before a single word reaches the module. The processor parameter file
//! holds one block of [`N_DSP_PAR`] words per possible module.

use crate::error::{Operation, PixieError, Result};
use pixie_chip::dsp::N_DSP_PAR;
use pixie_chip::firmware::{FirmwareTarget, Revision};
use pixie_chip::pci::PRESET_MAX_MODULES;
use std::path::Path;
use tracing::debug;

/// Host-order 32-bit words of a file, `(len + 1) / 4` of them.
///
/// A trailing partial word is zero-padded; fewer than three trailing bytes
/// are dropped.
pub(crate) fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    let mut words = vec![0u32; (bytes.len() + 1) / 4];
    let dst = bytemuck::cast_slice_mut::<u32, u8>(&mut words);
    let take = bytes.len().min(dst.len());
    dst[..take].copy_from_slice(&bytes[..take]);
    words
}

/// A validated FPGA bitstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    target: FirmwareTarget,
    revision: Revision,
    words: Vec<u32>,
}

impl FirmwareImage {
    const fn size_status(target: FirmwareTarget) -> i32 {
        match target {
            FirmwareTarget::CommFpga => -2,
            FirmwareTarget::SpFpga => -10,
        }
    }

    const fn read_status(target: FirmwareTarget) -> i32 {
        match target {
            FirmwareTarget::CommFpga => -5,
            FirmwareTarget::SpFpga => -13,
        }
    }

    /// Validate `words` for `target` on a module of `revision`.
    ///
    /// # Errors
    ///
    /// Returns `DataIntegrityFailure` if the revision has no known image
    /// size or the word count does not match it.
    pub fn from_words(target: FirmwareTarget, revision: Revision, words: Vec<u32>) -> Result<Self> {
        let status = Self::size_status(target);
        let expected = revision.expected_words(target).ok_or_else(|| {
            PixieError::integrity(
                Operation::BootModule,
                status,
                format!("no {target} image size known for {revision}"),
            )
        })?;
        if words.len() != expected {
            return Err(PixieError::integrity(
                Operation::BootModule,
                status,
                format!("{target} image is {} words, {revision} expects {expected}", words.len()),
            ));
        }
        Ok(Self {
            target,
            revision,
            words,
        })
    }

    /// Validate raw file contents.
    ///
    /// # Errors
    ///
    /// See [`from_words`](Self::from_words).
    pub fn from_bytes(target: FirmwareTarget, revision: Revision, bytes: &[u8]) -> Result<Self> {
        Self::from_words(target, revision, words_from_bytes(bytes))
    }

    /// Read and validate a bitstream file.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` if the file cannot be read, otherwise see
    /// [`from_words`](Self::from_words).
    pub fn load(target: FirmwareTarget, revision: Revision, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| PixieError::file(Operation::BootModule, Self::read_status(target), path, &e))?;
        debug!("Read {} bytes of {target} image from {}", bytes.len(), path.display());
        Self::from_bytes(target, revision, &bytes)
    }

    /// Chip this image configures.
    #[must_use]
    pub const fn target(&self) -> FirmwareTarget {
        self.target
    }

    /// Revision the size was validated against.
    #[must_use]
    pub const fn revision(&self) -> Revision {
        self.revision
    }

    /// Configuration words in download order.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

/// Processor parameter blocks for every possible module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DspParameters {
    words: Vec<u32>,
}

impl DspParameters {
    /// Validate file contents: exactly [`N_DSP_PAR`] × [`PRESET_MAX_MODULES`] words.
    ///
    /// # Errors
    ///
    /// Returns `DataIntegrityFailure` (status -17) on a size mismatch.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let words = words_from_bytes(bytes);
        let expected = N_DSP_PAR * PRESET_MAX_MODULES;
        if words.len() != expected {
            return Err(PixieError::integrity(
                Operation::BootModule,
                -17,
                format!("parameter file is {} words, expected {expected}", words.len()),
            ));
        }
        Ok(Self { words })
    }

    /// Read and validate a parameter file.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` (status -18) if the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| PixieError::file(Operation::BootModule, -18, path, &e))?;
        Self::from_bytes(&bytes)
    }

    /// Parameter block for one module, with word 0 forced to its number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIndex` past the last block.
    pub fn block(&self, module: usize) -> Result<Vec<u32>> {
        let start = module * N_DSP_PAR;
        let mut block = self
            .words
            .get(start..start + N_DSP_PAR)
            .ok_or(PixieError::InvalidIndex {
                index: module,
                count: PRESET_MAX_MODULES,
            })?
            .to_vec();
        block[0] = u32::try_from(module).unwrap_or(u32::MAX);
        Ok(block)
    }
}
