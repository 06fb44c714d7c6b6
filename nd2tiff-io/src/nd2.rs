//! ND2 reader backed by the Nikon ND2 SDK (`libnd2readsdk-shared`).
//!
//! Only built with the `nd2sdk` feature. The SDK hands out JSON strings
//! which are copied and freed immediately.

#![allow(unsafe_code)]

use crate::{Error, Result};
use log::debug;
use nd2tiff_core::{AcquisitionSource, FileAttributes, Frame, LoopDescriptor};
use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

const COORD_NAME_LEN: usize = 256;

#[repr(C)]
struct LimPicture {
    width: c_uint,
    height: c_uint,
    bits_per_comp: c_uint,
    components: c_uint,
    width_bytes: usize,
    size: usize,
    image_data: *mut c_void,
}

impl LimPicture {
    fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            bits_per_comp: 0,
            components: 0,
            width_bytes: 0,
            size: 0,
            image_data: ptr::null_mut(),
        }
    }
}

#[link(name = "nd2readsdk-shared")]
extern "C" {
    fn Lim_FileOpenForReadUtf8(file_name: *const c_char) -> *mut c_void;
    fn Lim_FileClose(file: *mut c_void);
    fn Lim_FileGetCoordSize(file: *mut c_void) -> usize;
    fn Lim_FileGetCoordInfo(
        file: *mut c_void,
        coord: c_uint,
        kind: *mut c_char,
        max_kind_size: usize,
    ) -> c_uint;
    fn Lim_FileGetSeqCount(file: *mut c_void) -> c_uint;
    fn Lim_FileGetAttributes(file: *mut c_void) -> *mut c_char;
    fn Lim_FileGetMetadata(file: *mut c_void) -> *mut c_char;
    fn Lim_FileGetFrameMetadata(file: *mut c_void, seq_index: c_uint) -> *mut c_char;
    fn Lim_FileGetTextinfo(file: *mut c_void) -> *mut c_char;
    fn Lim_FileGetExperiment(file: *mut c_void) -> *mut c_char;
    fn Lim_FileGetImageData(file: *mut c_void, seq_index: c_uint, picture: *mut LimPicture)
        -> c_int;
    fn Lim_FileFreeString(s: *mut c_char);
    fn Lim_InitPicture(
        picture: *mut LimPicture,
        width: c_uint,
        height: c_uint,
        bpc: c_uint,
        components: c_uint,
    ) -> usize;
    fn Lim_DestroyPicture(picture: *mut LimPicture);
}

/// An open ND2 file.
///
/// The file handle and the picture buffer are released on drop.
pub struct Nd2File {
    handle: NonNull<c_void>,
    path: PathBuf,
    picture: Option<Box<LimPicture>>,
}

impl Nd2File {
    /// Opens `path` for reading.
    ///
    /// # Errors
    /// Returns [`Error::OpenFailed`] if the SDK cannot open the file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = CString::new(path.to_string_lossy().as_bytes()).map_err(|e| {
            Error::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        // SAFETY: `name` is a valid NUL terminated string for the call.
        let handle = unsafe { Lim_FileOpenForReadUtf8(name.as_ptr()) };
        let handle = NonNull::new(handle).ok_or_else(|| Error::OpenFailed {
            path: path.to_path_buf(),
            reason: "the ND2 reader could not open the file".into(),
        })?;
        debug!("opened {}", path.display());
        Ok(Self {
            handle,
            path: path.to_path_buf(),
            picture: None,
        })
    }

    fn take_string(&self, raw: *mut c_char, what: &str) -> nd2tiff_core::Result<String> {
        if raw.is_null() {
            return Err(nd2tiff_core::Error::Source(format!("no {what} available")));
        }
        // SAFETY: the SDK returned a NUL terminated string that we own until
        // it is handed back with `Lim_FileFreeString`.
        let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
        unsafe { Lim_FileFreeString(raw) };
        Ok(text)
    }

    fn picture(&mut self) -> nd2tiff_core::Result<&mut LimPicture> {
        if self.picture.is_none() {
            let attributes = FileAttributes::from_json(&self.attributes()?)?;
            attributes.ensure_16_bit()?;
            let dimension = |v: usize| {
                c_uint::try_from(v)
                    .map_err(|_| nd2tiff_core::Error::Metadata(format!("dimension {v} too large")))
            };
            let mut picture = Box::new(LimPicture::empty());
            // SAFETY: `picture` points to a valid, zeroed LIMPICTURE.
            unsafe {
                Lim_InitPicture(
                    &mut *picture,
                    dimension(attributes.width_px)?,
                    dimension(attributes.height_px)?,
                    16,
                    dimension(attributes.component_count)?,
                );
            }
            self.picture = Some(picture);
        }
        self.picture
            .as_deref_mut()
            .ok_or_else(|| nd2tiff_core::Error::Source("picture buffer unavailable".into()))
    }
}

fn seq_index(sequence: usize) -> nd2tiff_core::Result<c_uint> {
    c_uint::try_from(sequence).map_err(|_| nd2tiff_core::Error::InvalidSequenceIndex {
        index: sequence,
        count: c_uint::MAX as usize,
    })
}

impl AcquisitionSource for Nd2File {
    fn path(&self) -> &Path {
        &self.path
    }

    fn loop_descriptors(&self) -> nd2tiff_core::Result<Vec<LoopDescriptor>> {
        // SAFETY: the handle is open for the lifetime of `self`.
        let count = unsafe { Lim_FileGetCoordSize(self.handle.as_ptr()) };
        let mut loops = Vec::with_capacity(count);
        for coord in 0..count {
            let mut name = [0 as c_char; COORD_NAME_LEN];
            // SAFETY: `name` holds `COORD_NAME_LEN` bytes and the SDK writes a
            // NUL terminated string of at most that length.
            let extent = unsafe {
                Lim_FileGetCoordInfo(
                    self.handle.as_ptr(),
                    seq_index(coord)?,
                    name.as_mut_ptr(),
                    COORD_NAME_LEN,
                )
            };
            name[COORD_NAME_LEN - 1] = 0;
            // SAFETY: terminated above.
            let name = unsafe { CStr::from_ptr(name.as_ptr()) }.to_string_lossy();
            loops.push(LoopDescriptor::new(name, extent as usize));
        }
        Ok(loops)
    }

    fn sequence_count(&self) -> nd2tiff_core::Result<usize> {
        // SAFETY: the handle is open.
        Ok(unsafe { Lim_FileGetSeqCount(self.handle.as_ptr()) } as usize)
    }

    fn attributes(&self) -> nd2tiff_core::Result<String> {
        // SAFETY: the handle is open.
        self.take_string(unsafe { Lim_FileGetAttributes(self.handle.as_ptr()) }, "attributes")
    }

    fn channel_metadata(&self) -> nd2tiff_core::Result<String> {
        // SAFETY: the handle is open.
        self.take_string(unsafe { Lim_FileGetMetadata(self.handle.as_ptr()) }, "metadata")
    }

    fn frame_metadata(&self, sequence: usize) -> nd2tiff_core::Result<String> {
        let index = seq_index(sequence)?;
        // SAFETY: the handle is open.
        let raw = unsafe { Lim_FileGetFrameMetadata(self.handle.as_ptr(), index) };
        self.take_string(raw, "frame metadata")
    }

    fn text_info(&self) -> nd2tiff_core::Result<String> {
        // SAFETY: the handle is open.
        self.take_string(unsafe { Lim_FileGetTextinfo(self.handle.as_ptr()) }, "text info")
    }

    fn experiment(&self) -> nd2tiff_core::Result<String> {
        // SAFETY: the handle is open.
        self.take_string(unsafe { Lim_FileGetExperiment(self.handle.as_ptr()) }, "experiment")
    }

    fn read_frame(&mut self, sequence: usize, frame: &mut Frame) -> nd2tiff_core::Result<()> {
        let index = seq_index(sequence)?;
        let handle = self.handle.as_ptr();
        let picture = self.picture()?;
        // SAFETY: the handle is open and `picture` was set up by `Lim_InitPicture`.
        let status = unsafe { Lim_FileGetImageData(handle, index, &mut *picture) };
        // Negative results are errors, zero and above success.
        if status < 0 {
            frame.data.clear();
            return Err(nd2tiff_core::Error::Source(format!(
                "failed to read frame {sequence} (status {status})"
            )));
        }

        frame.width = picture.width as usize;
        frame.height = picture.height as usize;
        frame.components = picture.components as usize;
        frame.data.clear();
        if picture.image_data.is_null() {
            return Ok(());
        }

        let row_samples = frame.width * frame.components;
        frame.data.reserve(row_samples * frame.height);
        for row in 0..frame.height {
            // SAFETY: the picture buffer holds `height` rows of `width_bytes`
            // bytes each, and a row carries `row_samples` 16-bit samples.
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    picture.image_data.cast::<u8>().add(row * picture.width_bytes),
                    row_samples * 2,
                )
            };
            frame.data.extend(
                bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_ne_bytes([pair[0], pair[1]])),
            );
        }
        Ok(())
    }
}

impl Drop for Nd2File {
    fn drop(&mut self) {
        if let Some(picture) = self.picture.as_deref_mut() {
            // SAFETY: initialised by `Lim_InitPicture` and not yet destroyed.
            unsafe { Lim_DestroyPicture(picture) };
        }
        // SAFETY: the handle was opened by `Lim_FileOpenForReadUtf8` and is
        // closed exactly once.
        unsafe { Lim_FileClose(self.handle.as_ptr()) };
    }
}
