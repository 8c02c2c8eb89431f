//! Canonical disjoint-interval representation of a set of machine ids.
//!
//! `boost::icl::interval_set<int>` is the reference shape this type mirrors, but the storage here
//! is a plain sorted `Vec` of closed, non-overlapping, non-adjacent `(start, end)` pairs: small
//! enough for a cluster's machine count that a tree-backed interval set would be overkill.

use std::fmt;

/// A closed interval `[start, end]`, both inclusive.
pub type Interval = (u32, u32);

/// A canonical set of machine ids, stored as a sorted sequence of disjoint, non-adjacent closed
/// intervals. Every public constructor and mutator re-establishes the canonical form before
/// returning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineRange {
    intervals: Vec<Interval>,
}

impl MachineRange {
    /// The empty range.
    pub fn new() -> Self {
        Self { intervals: Vec::new() }
    }

    /// A range containing a single machine id.
    pub fn singleton(id: u32) -> Self {
        Self { intervals: vec![(id, id)] }
    }

    /// A range spanning a closed interval.
    pub fn from_interval(start: u32, end: u32) -> Self {
        assert!(start <= end, "interval start must not exceed end");
        Self { intervals: vec![(start, end)] }
    }

    /// Builds a range from an arbitrary (possibly unsorted, possibly overlapping) collection of
    /// ids, canonicalizing as it goes.
    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> Self {
        let mut range = Self::new();
        for id in ids {
            range.insert_value(id);
        }
        range
    }

    /// Whether the range contains no ids at all.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Number of distinct ids in the range.
    pub fn size(&self) -> u32 {
        self.intervals.iter().map(|(a, b)| b - a + 1).sum()
    }

    /// The smallest id in the range, if any.
    pub fn first_element(&self) -> Option<u32> {
        self.intervals.first().map(|(a, _)| *a)
    }

    /// Whether `id` is a member of the range.
    pub fn contains(&self, id: u32) -> bool {
        self.intervals
            .iter()
            .any(|(a, b)| *a <= id && id <= *b)
    }

    /// Removes every element, leaving the empty range.
    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Inserts a single id.
    pub fn insert_value(&mut self, id: u32) {
        self.insert_interval(id, id);
    }

    /// Inserts a closed interval.
    pub fn insert_interval(&mut self, start: u32, end: u32) {
        assert!(start <= end, "interval start must not exceed end");
        self.intervals.push((start, end));
        self.canonicalize();
    }

    /// Inserts every id of `other`.
    pub fn insert(&mut self, other: &MachineRange) {
        self.intervals.extend_from_slice(&other.intervals);
        self.canonicalize();
    }

    /// Removes every id of `other` from `self` (set subtraction, `self -= other`).
    pub fn remove(&mut self, other: &MachineRange) {
        if other.is_empty() || self.is_empty() {
            return;
        }
        let mut result = Vec::with_capacity(self.intervals.len());
        for &(mut a, b) in &self.intervals {
            for &(oa, ob) in &other.intervals {
                if oa > b || ob < a {
                    continue;
                }
                if oa > a {
                    result.push((a, oa.saturating_sub(1).min(b)));
                }
                a = ob.saturating_add(1).max(a);
                if a > b {
                    break;
                }
            }
            if a <= b {
                result.push((a, b));
            }
        }
        self.intervals = result;
        self.canonicalize();
    }

    /// Intersection in place (`self &= other`).
    pub fn intersect_with(&mut self, other: &MachineRange) {
        let mut result = Vec::new();
        for &(a, b) in &self.intervals {
            for &(oa, ob) in &other.intervals {
                let lo = a.max(oa);
                let hi = b.min(ob);
                if lo <= hi {
                    result.push((lo, hi));
                }
            }
        }
        self.intervals = result;
        self.canonicalize();
    }

    /// Returns the union of `self` and `other` as a new range.
    pub fn union(&self, other: &MachineRange) -> MachineRange {
        let mut out = self.clone();
        out.insert(other);
        out
    }

    /// Returns the intersection of `self` and `other` as a new range.
    pub fn intersection(&self, other: &MachineRange) -> MachineRange {
        let mut out = self.clone();
        out.intersect_with(other);
        out
    }

    /// Returns `self` minus `other` as a new range.
    pub fn difference(&self, other: &MachineRange) -> MachineRange {
        let mut out = self.clone();
        out.remove(other);
        out
    }

    /// The first `count` elements of the range, in ascending order, as a new range. Returns the
    /// whole range if `count >= size()`.
    pub fn left(&self, count: u32) -> MachineRange {
        let mut remaining = count;
        let mut out = Vec::new();
        for &(a, b) in &self.intervals {
            if remaining == 0 {
                break;
            }
            let width = b - a + 1;
            if width <= remaining {
                out.push((a, b));
                remaining -= width;
            } else {
                out.push((a, a + remaining - 1));
                remaining = 0;
            }
        }
        MachineRange { intervals: out }
    }

    /// Iterates over every individual element in ascending order.
    pub fn elements(&self) -> impl Iterator<Item = u32> + '_ {
        self.intervals.iter().flat_map(|&(a, b)| a..=b)
    }

    /// Iterates over the canonical disjoint intervals in ascending order.
    pub fn intervals(&self) -> impl Iterator<Item = Interval> + '_ {
        self.intervals.iter().copied()
    }

    /// Renders using the hyphen textual form (e.g. `"0-3,7"`).
    pub fn to_hyphen_string(&self) -> String {
        self.intervals
            .iter()
            .map(|&(a, b)| if a == b { a.to_string() } else { format!("{a}-{b}") })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Renders using the bracket textual form (e.g. `"[0,3]∪[7]"`).
    pub fn to_bracket_string(&self) -> String {
        self.intervals
            .iter()
            .map(|&(a, b)| if a == b { format!("[{a}]") } else { format!("[{a},{b}]") })
            .collect::<Vec<_>>()
            .join("\u{222a}")
    }

    /// Renders as a flat comma-separated element list (e.g. `"0,1,2,3,7"`).
    pub fn to_elements_string(&self) -> String {
        self.elements()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses the hyphen textual form. Empty input yields the empty range.
    pub fn from_hyphen_string(s: &str) -> Result<MachineRange, String> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(MachineRange::new());
        }
        let mut range = MachineRange::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(format!("invalid machine range string: {s:?} (empty segment)"));
            }
            match part.split_once('-') {
                Some((a, b)) => {
                    let a: u32 = a
                        .trim()
                        .parse()
                        .map_err(|_| format!("invalid machine range string: {s:?}"))?;
                    let b: u32 = b
                        .trim()
                        .parse()
                        .map_err(|_| format!("invalid machine range string: {s:?}"))?;
                    if a > b {
                        return Err(format!("invalid machine range string: {s:?} (start > end)"));
                    }
                    range.insert_interval(a, b);
                }
                None => {
                    let v: u32 = part
                        .parse()
                        .map_err(|_| format!("invalid machine range string: {s:?}"))?;
                    range.insert_value(v);
                }
            }
        }
        Ok(range)
    }

    /// Sorts and coalesces `self.intervals` into the canonical disjoint, non-adjacent form.
    fn canonicalize(&mut self) {
        if self.intervals.is_empty() {
            return;
        }
        self.intervals.sort_unstable();
        let mut out: Vec<Interval> = Vec::with_capacity(self.intervals.len());
        for &(a, b) in &self.intervals {
            match out.last_mut() {
                Some((_, last_end)) if a <= last_end.saturating_add(1) => {
                    *last_end = (*last_end).max(b);
                }
                _ => out.push((a, b)),
            }
        }
        self.intervals = out;
    }
}

impl fmt::Display for MachineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hyphen_string())
    }
}

impl FromIterator<u32> for MachineRange {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        MachineRange::from_ids(iter)
    }
}
