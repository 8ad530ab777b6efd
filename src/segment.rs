use std::collections::HashSet;

use crate::dto::SegmentDto;

/// A named set of keys, targeted by `IN_SEGMENT` matchers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Segment {
    pub name: String,
    pub change_number: i64,
    keys: HashSet<String>,
}

impl Segment {
    pub fn new<I, S>(name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Segment {
            name: name.into(),
            change_number: 0,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Applies a change payload on top of the current membership.
    pub fn apply(&mut self, change: SegmentDto) {
        self.keys.extend(change.added);
        for removed in &change.removed {
            self.keys.remove(removed);
        }
        self.change_number = self.change_number.max(change.till);
    }
}

impl From<SegmentDto> for Segment {
    fn from(dto: SegmentDto) -> Self {
        let mut segment = Segment {
            name: dto.name.clone(),
            ..Segment::default()
        };
        segment.apply(dto);
        segment
    }
}
