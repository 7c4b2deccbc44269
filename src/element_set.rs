use bitvec::slice::BitSlice;

/// A read-only view of a subset of the data elements, handed to monitors.
///
/// The view borrows the estimator's internal mask and is only valid for
/// the duration of a single callback; monitors that need to keep the
/// indices around must copy them out (e.g. with [`ElementSet::iter`]).
#[derive(Debug, Clone, Copy)]
pub enum ElementSet<'a> {
    /// Every index in `0..n`.
    Complete(usize),
    /// The indices whose bits are set; the slice spans the whole data set.
    Masked(&'a BitSlice),
}

impl ElementSet<'_> {
    /// The number of elements in this set.
    pub fn len(&self) -> usize {
        match *self {
            ElementSet::Complete(len) => len,
            ElementSet::Masked(mask) => mask.count_ones(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The size of the data set this subset is drawn from.
    pub fn domain_len(&self) -> usize {
        match *self {
            ElementSet::Complete(len) => len,
            ElementSet::Masked(mask) => mask.len(),
        }
    }

    /// Whether the data element at `index` belongs to this set.
    ///
    /// Panics if `index` is outside the data set's index range.
    pub fn contains(&self, index: usize) -> bool {
        match *self {
            ElementSet::Complete(len) => {
                assert!(index < len, "invalid index: {}", index);
                true
            }
            ElementSet::Masked(mask) => mask[index],
        }
    }

    /// The smallest member index that is `>= from`, if any.
    ///
    /// ```
    /// # use bitvec::prelude::*;
    /// # use robust::ElementSet;
    /// let mask = bitvec![0, 1, 0, 0, 1];
    /// let set = ElementSet::Masked(&mask);
    /// let mut next = set.next_element(0);
    /// let mut members = Vec::new();
    /// while let Some(index) = next {
    ///     members.push(index);
    ///     next = set.next_element(index + 1);
    /// }
    /// assert_eq!(members, [1, 4]);
    /// ```
    pub fn next_element(&self, from: usize) -> Option<usize> {
        match *self {
            ElementSet::Complete(len) => (from < len).then_some(from),
            ElementSet::Masked(mask) => {
                if from >= mask.len() {
                    None
                } else {
                    mask[from..].first_one().map(|offset| from + offset)
                }
            }
        }
    }

    /// The member indices in ascending order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            set: *self,
            from: 0,
        }
    }
}

pub struct Iter<'a> {
    set: ElementSet<'a>,
    from: usize,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let index = self.set.next_element(self.from)?;
        self.from = index + 1;
        Some(index)
    }
}
