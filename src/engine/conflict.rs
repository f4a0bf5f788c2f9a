use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Range checks applied to caller-supplied spans before they reach the store.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if !span.is_valid() {
        return Err(EngineError::InvalidSpan {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Outcome of an admission check. Rejections are ordinary values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    CapacityExceeded { requested: u32, capacity: u32 },
    TimeConflict { conflicting: Vec<Booking> },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    /// Collapse a rejection into the matching `EngineError`.
    pub fn into_result(self) -> Result<(), EngineError> {
        match self {
            Admission::Admitted => Ok(()),
            Admission::CapacityExceeded {
                requested,
                capacity,
            } => Err(EngineError::CapacityExceeded {
                requested,
                capacity,
            }),
            Admission::TimeConflict { conflicting } => Err(EngineError::Conflict(conflicting)),
        }
    }
}

/// Decide whether `request` for `seats_needed` seats fits into `room`.
///
/// Capacity is checked first; the interval scan only runs when the seats fit.
/// Bookings in `existing` that belong to another room are ignored. The
/// room's `active` flag is never consulted. All overlapping bookings are
/// reported, in the order they appear in `existing`.
pub fn check_admission(
    room: &Room,
    existing: &[Booking],
    request: &Span,
    seats_needed: u32,
) -> Result<Admission, EngineError> {
    if !request.is_valid() {
        return Err(EngineError::InvalidSpan {
            start: request.start,
            end: request.end,
        });
    }
    if seats_needed == 0 {
        return Err(EngineError::InvalidSeats(seats_needed));
    }

    if seats_needed > room.capacity {
        return Ok(Admission::CapacityExceeded {
            requested: seats_needed,
            capacity: room.capacity,
        });
    }

    let conflicting: Vec<Booking> = existing
        .iter()
        .filter(|b| b.room_id == room.id && b.span.overlaps(request))
        .cloned()
        .collect();

    if conflicting.is_empty() {
        Ok(Admission::Admitted)
    } else {
        Ok(Admission::TimeConflict { conflicting })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;
    /// 2024-03-11T00:00:00Z
    const DAY: Ms = 1_710_115_200_000;

    fn at(h: Ms, m: Ms) -> Ms {
        DAY + h * H + m * M
    }

    fn room(capacity: u32) -> Room {
        Room {
            id: Ulid::new(),
            name: Some("Aurora".into()),
            capacity,
            active: false,
            created_by: "alice".into(),
        }
    }

    fn booking_in(room: &Room, start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: room.id,
            span: Span::new(start, end),
            owner: "alice".into(),
            seats: 1,
            title: None,
        }
    }

    #[test]
    fn adjacent_booking_is_admitted() {
        let r = room(10);
        let existing = vec![booking_in(&r, at(9, 0), at(10, 0))];
        let decision =
            check_admission(&r, &existing, &Span::new(at(10, 0), at(11, 0)), 1).unwrap();
        assert_eq!(decision, Admission::Admitted);

        let before = check_admission(&r, &existing, &Span::new(at(8, 0), at(9, 0)), 1).unwrap();
        assert!(before.is_admitted());
    }

    #[test]
    fn contained_request_conflicts_with_existing() {
        let r = room(10);
        let existing = vec![booking_in(&r, at(9, 0), at(10, 0))];
        let decision =
            check_admission(&r, &existing, &Span::new(at(9, 30), at(9, 45)), 1).unwrap();
        assert_eq!(
            decision,
            Admission::TimeConflict {
                conflicting: vec![existing[0].clone()]
            }
        );
    }

    #[test]
    fn all_conflicting_bookings_reported() {
        let r = room(10);
        let existing = vec![
            booking_in(&r, at(9, 0), at(10, 0)),
            booking_in(&r, at(10, 0), at(11, 0)),
            booking_in(&r, at(12, 0), at(13, 0)),
            booking_in(&r, at(8, 0), at(9, 0)),
        ];
        let decision =
            check_admission(&r, &existing, &Span::new(at(9, 30), at(12, 15)), 1).unwrap();
        let conflicting = match decision {
            Admission::TimeConflict { conflicting } => conflicting,
            other => panic!("expected conflict, got {other:?}"),
        };
        let ids: Vec<Ulid> = conflicting.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![existing[0].id, existing[1].id, existing[2].id]);
    }

    #[test]
    fn capacity_equal_to_seats_reaches_interval_check() {
        let r = room(10);
        let existing = vec![booking_in(&r, at(9, 0), at(10, 0))];

        let free = check_admission(&r, &existing, &Span::new(at(11, 0), at(12, 0)), 10).unwrap();
        assert_eq!(free, Admission::Admitted);

        let busy = check_admission(&r, &existing, &Span::new(at(9, 0), at(10, 0)), 10).unwrap();
        assert!(matches!(busy, Admission::TimeConflict { .. }));
    }

    #[test]
    fn capacity_exceeded_wins_over_conflict() {
        let r = room(10);
        let existing = vec![booking_in(&r, at(9, 0), at(10, 0))];
        let decision = check_admission(&r, &existing, &Span::new(at(9, 0), at(10, 0)), 11).unwrap();
        assert_eq!(
            decision,
            Admission::CapacityExceeded {
                requested: 11,
                capacity: 10
            }
        );
    }

    #[test]
    fn midnight_spanning_booking_conflicts_with_early_morning() {
        let r = room(10);
        // [23:30, 00:30 next day)
        let existing = vec![booking_in(&r, at(23, 30), at(24, 30))];
        // [00:00, 01:00) the same night
        let decision = check_admission(&r, &existing, &Span::new(at(24, 0), at(25, 0)), 1).unwrap();
        assert!(matches!(decision, Admission::TimeConflict { .. }));

        // Same clock times one day later do not collide.
        let later = check_admission(&r, &existing, &Span::new(at(48, 0), at(49, 0)), 1).unwrap();
        assert_eq!(later, Admission::Admitted);
    }

    #[test]
    fn both_sides_spanning_midnight() {
        let r = room(10);
        let existing = vec![booking_in(&r, at(22, 0), at(25, 0))];
        let decision =
            check_admission(&r, &existing, &Span::new(at(23, 45), at(24, 15)), 1).unwrap();
        assert!(matches!(decision, Admission::TimeConflict { .. }));
    }

    #[test]
    fn empty_room_admits() {
        let r = room(3);
        let decision = check_admission(&r, &[], &Span::new(at(9, 0), at(17, 0)), 3).unwrap();
        assert_eq!(decision, Admission::Admitted);
    }

    #[test]
    fn bookings_of_other_rooms_ignored() {
        let r = room(10);
        let other = room(10);
        let existing = vec![booking_in(&other, at(9, 0), at(10, 0))];
        let decision = check_admission(&r, &existing, &Span::new(at(9, 0), at(10, 0)), 1).unwrap();
        assert_eq!(decision, Admission::Admitted);
    }

    #[test]
    fn stale_active_flag_is_not_trusted() {
        let mut r = room(10);
        r.active = false;
        let existing = vec![booking_in(&r, at(9, 0), at(10, 0))];
        let decision = check_admission(&r, &existing, &Span::new(at(9, 0), at(10, 0)), 1).unwrap();
        assert!(matches!(decision, Admission::TimeConflict { .. }));
    }

    #[test]
    fn invalid_input_rejected_before_scheduling() {
        let r = room(10);
        let inverted = Span {
            start: at(10, 0),
            end: at(9, 0),
        };
        assert!(matches!(
            check_admission(&r, &[], &inverted, 1),
            Err(EngineError::InvalidSpan { .. })
        ));
        let empty = Span {
            start: at(10, 0),
            end: at(10, 0),
        };
        assert!(matches!(
            check_admission(&r, &[], &empty, 1),
            Err(EngineError::InvalidSpan { .. })
        ));
        assert!(matches!(
            check_admission(&r, &[], &Span::new(at(9, 0), at(10, 0)), 0),
            Err(EngineError::InvalidSeats(0))
        ));
    }

    #[test]
    fn decision_is_idempotent() {
        let r = room(10);
        let existing = vec![
            booking_in(&r, at(9, 0), at(10, 0)),
            booking_in(&r, at(11, 0), at(12, 0)),
        ];
        let request = Span::new(at(9, 30), at(11, 30));
        let first = check_admission(&r, &existing, &request, 2).unwrap();
        let second = check_admission(&r, &existing, &request, 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(existing.len(), 2);
    }

    #[test]
    fn into_result_maps_each_outcome() {
        assert!(Admission::Admitted.into_result().is_ok());
        assert!(matches!(
            Admission::CapacityExceeded {
                requested: 5,
                capacity: 4
            }
            .into_result(),
            Err(EngineError::CapacityExceeded {
                requested: 5,
                capacity: 4
            })
        ));
        let r = room(1);
        let b = booking_in(&r, at(9, 0), at(10, 0));
        match (Admission::TimeConflict {
            conflicting: vec![b.clone()],
        })
        .into_result()
        {
            Err(EngineError::Conflict(found)) => assert_eq!(found, vec![b]),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn validate_span_limits() {
        use crate::limits::*;
        assert!(validate_span(&Span::new(at(9, 0), at(10, 0))).is_ok());
        assert!(matches!(
            validate_span(&Span::new(-10, 10)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(DAY, DAY + MAX_SPAN_DURATION_MS + 1)),
            Err(EngineError::LimitExceeded("span too wide"))
        ));
        assert!(matches!(
            validate_span(&Span { start: DAY, end: DAY }),
            Err(EngineError::InvalidSpan { .. })
        ));
    }

    proptest! {
        #[test]
        fn admitted_bookings_never_overlap(
            requests in prop::collection::vec((0i64..2880, 1i64..240), 1..60)
        ) {
            let r = room(10);
            let mut admitted: Vec<Booking> = Vec::new();
            for (start_min, len_min) in requests {
                let span = Span::new(DAY + start_min * M, DAY + (start_min + len_min) * M);
                match check_admission(&r, &admitted, &span, 1).unwrap() {
                    Admission::Admitted => admitted.push(booking_in(&r, span.start, span.end)),
                    Admission::TimeConflict { conflicting } => {
                        prop_assert!(!conflicting.is_empty());
                        prop_assert!(conflicting.iter().all(|b| b.span.overlaps(&span)));
                    }
                    Admission::CapacityExceeded { .. } => prop_assert!(false, "capacity is 10"),
                }
            }
            for (i, a) in admitted.iter().enumerate() {
                for b in &admitted[i + 1..] {
                    prop_assert!(!(a.span.start < b.span.end && b.span.start < a.span.end));
                }
            }
        }
    }
}
