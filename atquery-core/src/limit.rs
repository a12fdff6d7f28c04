//! Limit/offset policy of the collection evaluator.

use crate::error::{AtError, AtResult};
use crate::plan::RtExtras;

/// Applies limit and offset either while iterating or after sorting.
///
/// `Early` is only valid when every passing item becomes exactly one output row in
/// source order (no grouping, no sorting); it lets the evaluator stop scanning once
/// the limit is reached. `Late` slices the final, sorted row list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Limiter {
    None,
    Early {
        limit: u64,
        offset: u64,
        /// Passing items seen so far, including skipped ones
        pos: u64,
        /// Rows kept so far
        size: u64,
    },
    Late { limit: u64, offset: u64 },
}

impl Limiter {
    pub fn new(extras: RtExtras, early: bool) -> Self {
        if extras.is_empty() {
            return Limiter::None;
        }
        let limit = extras.limit.unwrap_or(u64::MAX);
        let offset = extras.offset.unwrap_or(0);
        if early {
            Limiter::Early {
                limit,
                offset,
                pos: 0,
                size: 0,
            }
        } else {
            Limiter::Late { limit, offset }
        }
    }

    /// False once an early limiter has kept `limit` rows; iteration may stop.
    pub fn process_limit(&self) -> bool {
        match self {
            Limiter::Early { limit, size, .. } => size < limit,
            _ => true,
        }
    }

    /// Consume one offset slot for a passing item. False while still inside the
    /// offset window: the item is skipped.
    pub fn process_offset(&mut self) -> bool {
        match self {
            Limiter::Early {
                offset, pos, size, ..
            } => {
                let keep = *pos >= *offset;
                if keep {
                    *size += 1;
                }
                *pos += 1;
                keep
            }
            _ => true,
        }
    }

    pub fn apply<T>(&self, mut rows: Vec<T>) -> AtResult<Vec<T>> {
        match self {
            Limiter::None => Ok(rows),
            Limiter::Early { size, .. } => {
                if rows.len() as u64 != *size {
                    return Err(AtError::plan(format!(
                        "early limiter kept {} rows but {} were produced",
                        size,
                        rows.len()
                    )));
                }
                Ok(rows)
            }
            Limiter::Late { limit, offset } => {
                let len = rows.len() as u64;
                let start = (*offset).min(len) as usize;
                let end = start.saturating_add((*limit).min(len) as usize).min(rows.len());
                rows.truncate(end);
                rows.drain(..start);
                Ok(rows)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extras(limit: Option<u64>, offset: Option<u64>) -> RtExtras {
        RtExtras { limit, offset }
    }

    #[test]
    fn test_no_extras_is_none() {
        assert_eq!(Limiter::new(RtExtras::default(), true), Limiter::None);
        assert_eq!(Limiter::new(RtExtras::default(), false), Limiter::None);
    }

    #[test]
    fn test_late_slices() {
        let rows: Vec<i32> = (1..=5).collect();
        let limiter = Limiter::new(extras(Some(3), Some(1)), false);
        assert_eq!(limiter.apply(rows.clone()).unwrap(), vec![2, 3, 4]);

        let limiter = Limiter::new(extras(Some(3), Some(4)), false);
        assert_eq!(limiter.apply(rows.clone()).unwrap(), vec![5]);

        let limiter = Limiter::new(extras(None, Some(9)), false);
        assert!(limiter.apply(rows.clone()).unwrap().is_empty());

        let limiter = Limiter::new(extras(Some(0), None), false);
        assert!(limiter.apply(rows).unwrap().is_empty());
    }

    #[test]
    fn test_early_tracks_offset_and_limit() {
        let mut limiter = Limiter::new(extras(Some(2), Some(1)), true);
        let mut kept = Vec::new();
        for item in 1..=10 {
            if !limiter.process_limit() {
                break;
            }
            if !limiter.process_offset() {
                continue;
            }
            kept.push(item);
        }
        assert_eq!(kept, vec![2, 3]);
        assert!(!limiter.process_limit());
        assert_eq!(limiter.apply(kept).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_early_size_mismatch_is_plan_error() {
        let limiter = Limiter::new(extras(Some(2), None), true);
        assert!(matches!(
            limiter.apply(vec![1]),
            Err(AtError::PlanError(_))
        ));
    }
}
