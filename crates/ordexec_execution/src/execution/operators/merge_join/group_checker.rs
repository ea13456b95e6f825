use crate::expr::sort_key::compare_scalars_nulls_first;
use ordexec_column::batch::Batch;
use ordexec_column::scalar::OwnedScalarValue;
use ordexec_error::{OrdexecError, Result};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::ops::Range;

type Key = SmallVec<[OwnedScalarValue; 2]>;

/// Partitions consecutive rows of one side's input into runs of equal
/// join-key values.
///
/// Stateful across batches: the trailing key of each split batch is
/// remembered so the caller can tell whether the next batch opens with a
/// continuation of the same group (the carry-flag). NULL compares equal to
/// NULL here, sorted inputs place null-keyed rows adjacently.
///
/// This is also where unsorted input is caught: every adjacent row pair
/// (including across batch boundaries) must be ordered according to the
/// declared direction.
#[derive(Debug)]
pub struct GroupChecker {
    key_columns: SmallVec<[usize; 2]>,
    desc: bool,

    /// Key of the last row seen by the previous `split`.
    last_key: Option<Key>,

    /// Ranges of visible rows for each run in the current batch.
    groups: VecDeque<Range<usize>>,
}

impl GroupChecker {
    pub fn new(key_columns: impl IntoIterator<Item = usize>, desc: bool) -> Self {
        GroupChecker {
            key_columns: key_columns.into_iter().collect(),
            desc,
            last_key: None,
            groups: VecDeque::new(),
        }
    }

    /// Scan a batch, recording its run boundaries.
    ///
    /// Returns the carry-flag: true iff the batch's first key equals the
    /// previous batch's last key. Any runs of the previous batch still
    /// unconsumed are dropped.
    pub fn split(&mut self, batch: &Batch) -> Result<bool> {
        self.groups.clear();

        let num_rows = batch.num_rows();
        if num_rows == 0 {
            return Ok(false);
        }

        let first_key = self.key_of(batch, 0)?;
        let carry = match &self.last_key {
            Some(last) => self.check_order(last, &first_key)? == Ordering::Equal,
            None => false,
        };

        let mut start = 0;
        let mut prev_key = first_key;
        for row in 1..num_rows {
            let key = self.key_of(batch, row)?;
            if self.check_order(&prev_key, &key)? != Ordering::Equal {
                self.groups.push_back(start..row);
                start = row;
            }
            prev_key = key;
        }
        self.groups.push_back(start..num_rows);
        self.last_key = Some(prev_key);

        Ok(carry)
    }

    /// Consume the next recorded run.
    pub fn next_group(&mut self) -> Option<Range<usize>> {
        self.groups.pop_front()
    }

    pub fn is_exhausted(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn reset(&mut self) {
        self.groups.clear();
        self.last_key = None;
    }

    fn key_of(&self, batch: &Batch, row: usize) -> Result<Key> {
        let row = batch
            .row(row)
            .ok_or_else(|| OrdexecError::new(format!("Row {row} out of bounds")))?;
        self.key_columns
            .iter()
            .map(|col| Ok(row.value(*col)?.into_owned()))
            .collect()
    }

    /// Lexicographic comparison of two adjacent keys, validating sortedness.
    fn check_order(&self, prev: &Key, next: &Key) -> Result<Ordering> {
        let mut ord = Ordering::Equal;
        for (a, b) in prev.iter().zip(next.iter()) {
            ord = compare_scalars_nulls_first(a, b)?;
            if ord != Ordering::Equal {
                break;
            }
        }

        let expected = if self.desc {
            Ordering::Greater
        } else {
            Ordering::Less
        };
        if ord != Ordering::Equal && ord != expected {
            return Err(OrdexecError::invariant(format!(
                "Input rows are not sorted on the join keys (desc={}): saw {prev:?} before {next:?}",
                self.desc
            )));
        }

        Ok(ord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordexec_column::array::{Array, Int64Array};

    fn batch(keys: &[Option<i64>]) -> Batch {
        Batch::try_new(vec![Array::Int64(Int64Array::from_iter(
            keys.iter().copied(),
        ))])
        .unwrap()
    }

    #[test]
    fn runs_within_batch() {
        let mut checker = GroupChecker::new([0], false);
        let carry = checker
            .split(&batch(&[Some(1), Some(2), Some(2), Some(3)]))
            .unwrap();

        assert!(!carry);
        assert_eq!(Some(0..1), checker.next_group());
        assert_eq!(Some(1..3), checker.next_group());
        assert_eq!(Some(3..4), checker.next_group());
        assert_eq!(None, checker.next_group());
        assert!(checker.is_exhausted());
    }

    #[test]
    fn carry_across_batches() {
        let mut checker = GroupChecker::new([0], false);

        checker.split(&batch(&[Some(1), Some(2)])).unwrap();
        while checker.next_group().is_some() {}

        let carry = checker.split(&batch(&[Some(2), Some(2), Some(3)])).unwrap();
        assert!(carry);
        assert_eq!(Some(0..2), checker.next_group());

        let carry = checker.split(&batch(&[Some(4)])).unwrap();
        assert!(!carry);
    }

    #[test]
    fn nulls_group_together() {
        let mut checker = GroupChecker::new([0], false);
        checker.split(&batch(&[None, None, Some(1)])).unwrap();

        assert_eq!(Some(0..2), checker.next_group());
        assert_eq!(Some(2..3), checker.next_group());
    }

    #[test]
    fn unsorted_input_is_an_error() {
        let mut checker = GroupChecker::new([0], false);
        checker.split(&batch(&[Some(3), Some(1)])).unwrap_err();
    }

    #[test]
    fn unsorted_across_batches_is_an_error() {
        let mut checker = GroupChecker::new([0], false);
        checker.split(&batch(&[Some(5)])).unwrap();
        checker.split(&batch(&[Some(4)])).unwrap_err();
    }

    #[test]
    fn descending_direction() {
        let mut checker = GroupChecker::new([0], true);
        let carry = checker
            .split(&batch(&[Some(5), Some(3), Some(3), Some(1)]))
            .unwrap();

        assert!(!carry);
        assert_eq!(Some(0..1), checker.next_group());
        assert_eq!(Some(1..3), checker.next_group());
        assert_eq!(Some(3..4), checker.next_group());

        checker.split(&batch(&[Some(2)])).unwrap_err();
    }

    #[test]
    fn reset_clears_carry_state() {
        let mut checker = GroupChecker::new([0], false);
        checker.split(&batch(&[Some(9)])).unwrap();
        checker.reset();

        // Would be unsorted without the reset.
        let carry = checker.split(&batch(&[Some(1)])).unwrap();
        assert!(!carry);
    }
}
