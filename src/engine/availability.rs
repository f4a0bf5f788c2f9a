use crate::model::*;

use super::EngineError;

/// Result of searching for an alternative slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proposal {
    Slot(Span),
    NoSlotAvailable,
}

impl Proposal {
    pub fn into_result(self) -> Result<Span, EngineError> {
        match self {
            Proposal::Slot(span) => Ok(span),
            Proposal::NoSlotAvailable => Err(EngineError::NoSlotAvailable),
        }
    }
}

/// Free gaps of `room` inside `window`: before the first booking, between
/// consecutive bookings and after the last one. Sorted and disjoint.
pub fn free_slots(room: &Room, existing: &[Booking], window: &Span) -> Vec<Span> {
    if !window.is_valid() {
        return Vec::new();
    }
    let mut busy: Vec<Span> = existing
        .iter()
        .filter(|b| b.room_id == room.id && b.span.overlaps(window))
        .map(|b| b.span)
        .collect();
    // Stable: equal starts keep their input order.
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);
    subtract_intervals(&[*window], &busy)
}

/// Earliest slot of exactly `duration` inside `window` that conflicts with
/// none of the room's bookings.
pub fn propose_alternative(
    room: &Room,
    existing: &[Booking],
    duration: Ms,
    window: &Span,
) -> Result<Proposal, EngineError> {
    if duration <= 0 {
        return Err(EngineError::InvalidDuration(duration));
    }
    if !window.is_valid() {
        return Err(EngineError::InvalidSpan {
            start: window.start,
            end: window.end,
        });
    }

    let proposal = free_slots(room, existing, window)
        .into_iter()
        .find_map(|gap| {
            gap.start
                .checked_add(duration)
                .filter(|&end| end <= gap.end)
                .map(|end| Span::new(gap.start, end))
        })
        .map_or(Proposal::NoSlotAvailable, Proposal::Slot);
    Ok(proposal)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove `to_remove` (sorted, disjoint) from `base` (sorted, disjoint).
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
