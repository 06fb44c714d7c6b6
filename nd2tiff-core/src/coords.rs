//! Coordinate loops and sequence addressing.
//!
//! An acquisition is stored as a flat sequence of frames. The coordinate loops
//! describe how that sequence was produced; for the layouts handled here only
//! the position loop (fields of view) and the z-stack loop matter. Channels are
//! not a loop: every frame carries all channels interleaved.

use crate::{Error, Result};
use log::warn;

/// Loop name the Nikon reader uses for stage positions.
pub const POSITION_LOOP: &str = "XYPosLoop";
/// Loop name the Nikon reader uses for z-stacks.
pub const ZSTACK_LOOP: &str = "ZStackLoop";

/// Kind of a coordinate loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// Multi-point acquisition, one entry per field of view.
    Position,
    /// Focus series.
    ZStack,
    /// Time lapse.
    Time,
    /// Anything else the reader reports.
    Other,
}

impl LoopKind {
    /// Classifies a loop by the name the reader reports.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            POSITION_LOOP => Self::Position,
            ZSTACK_LOOP => Self::ZStack,
            "TimeLoop" | "NETimeLoop" => Self::Time,
            _ => Self::Other,
        }
    }
}

/// One coordinate loop as reported by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDescriptor {
    /// Loop type name, e.g. `ZStackLoop`.
    pub name: String,
    /// Number of iterations of the loop.
    pub extent: usize,
}

impl LoopDescriptor {
    /// Creates a loop descriptor.
    pub fn new(name: impl Into<String>, extent: usize) -> Self {
        Self {
            name: name.into(),
            extent,
        }
    }

    /// Returns the kind of loop.
    #[must_use]
    pub fn kind(&self) -> LoopKind {
        LoopKind::from_name(&self.name)
    }
}

/// Maps `(fov, plane)` onto the reader's flat sequence index.
///
/// The z-stack is assumed to vary fastest for a fixed field of view, so
/// `seq(fov, plane) = plane + fov * planes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addressing {
    fovs: usize,
    planes: usize,
    z_innermost: bool,
}

impl Addressing {
    /// Derives the addressing scheme from the coordinate loops.
    ///
    /// A missing position loop means a single field of view.
    ///
    /// # Errors
    /// Returns [`Error::NoPlanes`] if no z-stack loop with at least one plane exists.
    pub fn from_loops(loops: &[LoopDescriptor]) -> Result<Self> {
        let mut fovs = None;
        let mut planes = 0;

        for descriptor in loops {
            match descriptor.kind() {
                LoopKind::Position => fovs = Some(descriptor.extent),
                LoopKind::ZStack => planes = descriptor.extent,
                LoopKind::Time | LoopKind::Other => {}
            }
        }

        if planes < 1 {
            return Err(Error::NoPlanes);
        }

        let z_innermost = loops
            .last()
            .is_some_and(|descriptor| descriptor.kind() == LoopKind::ZStack);
        if !z_innermost {
            let last = loops.last().map_or("<none>", |d| d.name.as_str());
            warn!("last loop is {last}, expected {ZSTACK_LOOP}; plane addressing may be wrong");
        }

        Ok(Self {
            fovs: fovs.unwrap_or(1).max(1),
            planes,
            z_innermost,
        })
    }

    /// Creates an addressing scheme directly.
    #[must_use]
    pub fn new(fovs: usize, planes: usize) -> Self {
        Self {
            fovs,
            planes,
            z_innermost: true,
        }
    }

    /// Returns the number of fields of view.
    #[must_use]
    pub fn fov_count(&self) -> usize {
        self.fovs
    }

    /// Returns the number of planes per z-stack.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        self.planes
    }

    /// Returns the number of frames addressed.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.fovs * self.planes
    }

    /// Returns true if the z-stack was the innermost loop.
    #[must_use]
    pub fn z_is_innermost(&self) -> bool {
        self.z_innermost
    }

    /// Returns the sequence index of `(fov, plane)`.
    #[must_use]
    pub fn sequence_index(&self, fov: usize, plane: usize) -> usize {
        plane + fov * self.planes
    }

    /// Inverse of [`Self::sequence_index`].
    #[must_use]
    pub fn position(&self, sequence: usize) -> (usize, usize) {
        (sequence / self.planes, sequence % self.planes)
    }
}
