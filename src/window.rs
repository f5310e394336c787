//! Sliding temporal window around the current reference frame.
//!
//! A fixed ring of `2 * radius + 1` slots addressed by `index % capacity`.
//! Each slot keeps the frame and the motion field last computed for it,
//! tagged with the reference that field is relative to. Fields go stale when
//! the reference moves and are recomputed lazily by `motion_fields`.

use rayon::prelude::*;
use std::sync::Arc;

use crate::error::{Result, SuperResError};
use crate::flow::{MotionEstimator, MotionField};
use crate::frame::Frame;

/// Estimator outcome for one entry. Failures keep only the message.
pub type FieldOutcome = std::result::Result<Arc<MotionField>, String>;

/// One window entry aligned to the current reference.
#[derive(Clone, Debug)]
pub struct AlignedFrame {
    /// `index - reference_index`.
    pub offset: i64,
    pub frame: Frame,
    pub field: FieldOutcome,
}

#[derive(Clone, Debug)]
struct Slot {
    frame: Frame,
    /// `(reference index, outcome)` of the last estimation.
    cached: Option<(u64, FieldOutcome)>,
}

#[derive(Debug)]
pub struct TemporalWindow {
    radius: usize,
    slots: Vec<Option<Slot>>,
    /// Oldest resident index, `None` when empty.
    oldest: Option<u64>,
    /// Newest index ever accepted. Survives a drain so contiguity is still checked.
    newest: Option<u64>,
    /// Oldest frame not yet emitted.
    reference: Option<u64>,
}

impl TemporalWindow {
    pub fn new(radius: usize) -> Self {
        let capacity = 2 * radius + 1;
        Self {
            radius,
            slots: vec![None; capacity],
            oldest: None,
            newest: None,
            reference: None,
        }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        match (self.oldest, self.newest) {
            (Some(oldest), Some(newest)) => (newest - oldest + 1) as usize,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    pub fn reference_index(&self) -> Option<u64> {
        self.reference
    }

    pub fn reference_frame(&self) -> Option<&Frame> {
        self.reference.and_then(|idx| self.frame(idx))
    }

    /// Buffered frame by sequence index.
    pub fn frame(&self, index: u64) -> Option<&Frame> {
        self.slot(index).map(|slot| &slot.frame)
    }

    /// Resident indices, oldest first.
    pub fn indices(&self) -> Vec<u64> {
        match (self.oldest, self.newest) {
            (Some(oldest), Some(newest)) => (oldest..=newest).collect(),
            _ => Vec::new(),
        }
    }

    /// The reference has its `radius` successors buffered.
    pub fn is_ready(&self) -> bool {
        match (self.reference, self.newest) {
            (Some(reference), Some(newest)) if self.has_pending() => {
                newest - reference >= self.radius as u64
            }
            _ => false,
        }
    }

    /// Some buffered frame has not been emitted yet.
    pub fn has_pending(&self) -> bool {
        match (self.reference, self.newest) {
            (Some(reference), Some(newest)) => !self.is_empty() && reference <= newest,
            _ => false,
        }
    }

    /// Reference index the cached field of `index` is relative to.
    pub fn cached_reference(&self, index: u64) -> Option<u64> {
        self.slot(index)
            .and_then(|slot| slot.cached.as_ref().map(|(r, _)| *r))
    }

    /// Accept the next frame of the stream.
    pub fn advance(&mut self, frame: Frame) -> Result<()> {
        let index = frame.index();
        if let Some(newest) = self.newest {
            let expected = newest + 1;
            if index != expected {
                return Err(SuperResError::StreamDiscontinuity {
                    expected,
                    got: index,
                });
            }
        }
        if let Some(resident) = self.newest.and_then(|idx| self.frame(idx)) {
            if !resident.same_layout(&frame) {
                return Err(SuperResError::FrameMismatch(format!(
                    "frame {} is {}x{}x{}, window holds {}x{}x{}",
                    index,
                    frame.width(),
                    frame.height(),
                    frame.channels(),
                    resident.width(),
                    resident.height(),
                    resident.channels()
                )));
            }
        }

        if self.is_full() {
            self.evict_oldest();
        }
        let slot = self.slot_of(index);
        self.slots[slot] = Some(Slot {
            frame,
            cached: None,
        });
        self.newest = Some(index);
        if self.oldest.is_none() {
            self.oldest = Some(index);
        }
        if self.reference.is_none() {
            self.reference = Some(index);
        }
        Ok(())
    }

    /// Move to the next reference after the current one was emitted.
    pub fn step_reference(&mut self) {
        let Some(reference) = self.reference else {
            return;
        };
        let next = reference + 1;
        self.reference = Some(next);
        while let Some(oldest) = self.oldest {
            if oldest + (self.radius as u64) < next || self.newest.is_some_and(|n| n < next) {
                self.evict_oldest();
            } else {
                break;
            }
        }
    }

    /// Fields of every entry relative to the current reference.
    ///
    /// Entries whose cached field belongs to a previous reference are
    /// recomputed in parallel. The reference itself gets a zero field.
    pub fn motion_fields(&mut self, estimator: &dyn MotionEstimator) -> Vec<AlignedFrame> {
        let Some(reference) = self.reference else {
            return Vec::new();
        };
        let Some(ref_frame) = self.reference_frame().cloned() else {
            return Vec::new();
        };

        let stale: Vec<(u64, Frame)> = self
            .indices()
            .into_iter()
            .filter_map(|idx| {
                let slot = self.slot(idx)?;
                match &slot.cached {
                    Some((r, _)) if *r == reference => None,
                    _ => Some((idx, slot.frame.clone())),
                }
            })
            .collect();

        let computed: Vec<(u64, FieldOutcome)> = stale
            .par_iter()
            .map(|(idx, frame)| {
                let outcome = if *idx == reference {
                    Ok(Arc::new(MotionField::zeros(frame.dims())))
                } else {
                    estimator
                        .estimate(&ref_frame, frame)
                        .map(Arc::new)
                        .map_err(|err| err.to_string())
                };
                (*idx, outcome)
            })
            .collect();

        if !computed.is_empty() {
            log::debug!(
                "window: estimated {} field(s) against reference {} with {}",
                computed.len(),
                reference,
                estimator.name()
            );
        }
        for (idx, outcome) in computed {
            let slot_index = self.slot_of(idx);
            if let Some(slot) = self.slots[slot_index].as_mut() {
                slot.cached = Some((reference, outcome));
            }
        }

        self.indices()
            .into_iter()
            .filter_map(|idx| {
                let slot = self.slot(idx)?;
                let (_, field) = slot.cached.clone()?;
                Some(AlignedFrame {
                    offset: idx as i64 - reference as i64,
                    frame: slot.frame.clone(),
                    field,
                })
            })
            .collect()
    }

    fn slot_of(&self, index: u64) -> usize {
        (index % self.capacity() as u64) as usize
    }

    fn slot(&self, index: u64) -> Option<&Slot> {
        let (oldest, newest) = (self.oldest?, self.newest?);
        if index < oldest || index > newest {
            return None;
        }
        self.slots[self.slot_of(index)]
            .as_ref()
            .filter(|slot| slot.frame.index() == index)
    }

    fn evict_oldest(&mut self) {
        let (Some(oldest), Some(newest)) = (self.oldest, self.newest) else {
            return;
        };
        let slot = self.slot_of(oldest);
        self.slots[slot] = None;
        self.oldest = if oldest < newest { Some(oldest + 1) } else { None };
        // Never leave the reference pointing at an evicted frame.
        if let (Some(reference), Some(new_oldest)) = (self.reference, self.oldest) {
            if reference < new_oldest {
                self.reference = Some(new_oldest);
            }
        }
    }
}
