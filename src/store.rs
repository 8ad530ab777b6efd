use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use log::{debug, warn};

use crate::dto::{FlagDto, SegmentDto};
use crate::error::BuildError;
use crate::flag::Flag;
use crate::segment::Segment;

const ARCHIVED: &str = "ARCHIVED";

/// Store is an interface for the rule data evaluation reads from.
///
/// Ordinarily the only implementation is [Snapshot], which owns the built flags and segments.
pub trait Store {
    /// Retrieve the flag called `flag_name`.
    fn flag(&self, flag_name: &str) -> Option<&Flag>;

    /// Retrieve the segment called `segment_name`.
    fn segment(&self, segment_name: &str) -> Option<&Segment>;
}

/// An immutable set of flags and segments, built once and then shared by every evaluation.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    flags: HashMap<String, Flag>,
    segments: HashMap<String, Segment>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from a JSON array of flags and a JSON array of segment changes.
    ///
    /// Any flag that fails to build rejects the whole snapshot, so a caller can keep serving the
    /// previous one.
    pub fn from_json_str(flags_json: &str, segments_json: &str) -> Result<Snapshot, BuildError> {
        let flags: Vec<FlagDto> = serde_json::from_str(flags_json)?;
        let segments: Vec<SegmentDto> = serde_json::from_str(segments_json)?;

        let mut snapshot = Snapshot::new();
        for dto in flags {
            if is_archived(&dto) {
                debug!("skipping archived flag {}", dto.name);
                continue;
            }
            let flag = Flag::try_from(dto)?;
            snapshot.flags.insert(flag.name.clone(), flag);
        }
        for dto in segments {
            snapshot.apply_segment(dto);
        }
        Ok(snapshot)
    }

    /// Build `dto` and add it, replacing any flag with the same name. An archived flag removes
    /// the existing one instead.
    ///
    /// A flag that fails to build is rejected on its own; the rest of the snapshot is untouched.
    pub fn insert_flag(&mut self, dto: FlagDto) -> Result<(), BuildError> {
        if is_archived(&dto) {
            debug!("removing archived flag {}", dto.name);
            self.flags.remove(&dto.name);
            return Ok(());
        }

        let name = dto.name.clone();
        match Flag::try_from(dto) {
            Ok(flag) => {
                self.flags.insert(name, flag);
                Ok(())
            }
            Err(e) => {
                warn!("rejected flag {}: {}", name, e);
                Err(e)
            }
        }
    }

    pub fn remove_flag(&mut self, flag_name: &str) -> Option<Flag> {
        self.flags.remove(flag_name)
    }

    pub fn insert_segment(&mut self, segment: Segment) {
        self.segments.insert(segment.name.clone(), segment);
    }

    /// Apply a segment change on top of the segment of the same name, creating it if needed.
    pub fn apply_segment(&mut self, change: SegmentDto) {
        match self.segments.get_mut(&change.name) {
            Some(segment) => segment.apply(change),
            None => self.insert_segment(Segment::from(change)),
        }
    }

    pub fn flag_names(&self) -> impl Iterator<Item = &str> {
        self.flags.keys().map(String::as_str)
    }

    /// The highest change number among the flags, or -1 for an empty snapshot.
    pub fn change_number(&self) -> i64 {
        self.flags
            .values()
            .map(|f| f.change_number)
            .max()
            .unwrap_or(-1)
    }
}

fn is_archived(dto: &FlagDto) -> bool {
    dto.status.as_deref() == Some(ARCHIVED)
}

impl Store for Snapshot {
    fn flag(&self, flag_name: &str) -> Option<&Flag> {
        self.flags.get(flag_name)
    }

    fn segment(&self, segment_name: &str) -> Option<&Segment> {
        self.segments.get(segment_name)
    }
}

/// Publishes [Snapshot]s to concurrent readers.
///
/// Readers [load](SnapshotHandle::load) the current snapshot and evaluate against it for as long
/// as they like; a [publish](SnapshotHandle::publish) only affects loads that happen after it.
#[derive(Debug, Default)]
pub struct SnapshotHandle {
    current: ArcSwap<Snapshot>,
}

impl SnapshotHandle {
    pub fn new(snapshot: Snapshot) -> Self {
        SnapshotHandle {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Replace the current snapshot, returning the one it replaced.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        self.current.swap(Arc::new(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::eval::{evaluate, Label};
    use crate::key::Key;
    use maplit::hashmap;
    use spectral::prelude::*;
    use std::thread;

    const FLAGS: &str = r#"[
        {
            "name": "checkout",
            "defaultTreatment": "off",
            "algo": 2,
            "changeNumber": 20,
            "conditions": [{
                "label": "beta",
                "matcherGroup": {"combiner": "AND", "matchers": [
                    {"matcherType": "IN_SEGMENT", "userDefinedSegmentMatcherData": {"segmentName": "beta"}}
                ]},
                "partitions": [{"treatment": "on", "size": 100}]
            }]
        },
        {
            "name": "old",
            "status": "ARCHIVED",
            "defaultTreatment": "off",
            "changeNumber": 30
        }
    ]"#;

    const SEGMENTS: &str = r#"[
        {"name": "beta", "added": ["alice", "bob"], "removed": [], "till": 1},
        {"name": "beta", "added": [], "removed": ["bob"], "till": 2}
    ]"#;

    fn flag_dto(json: &str) -> FlagDto {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn builds_from_json() {
        let snapshot = Snapshot::from_json_str(FLAGS, SEGMENTS).unwrap();

        assert_that!(snapshot.flag("checkout")).is_some();
        assert_that!(snapshot.flag("old")).is_none();
        assert_eq!(snapshot.flag_names().collect::<Vec<_>>(), vec!["checkout"]);
        assert_eq!(snapshot.change_number(), 20);

        let beta = snapshot.segment("beta").unwrap();
        assert!(beta.contains("alice"));
        assert!(!beta.contains("bob"));
        assert_eq!(beta.change_number, 2);
    }

    #[test]
    fn one_bad_flag_rejects_the_snapshot() {
        let flags = r#"[
            {"name": "good", "defaultTreatment": "off"},
            {"name": "bad", "defaultTreatment": "off", "algo": 7}
        ]"#;
        let result = Snapshot::from_json_str(flags, "[]");
        assert!(matches!(result, Err(BuildError::UnknownAlgorithm { .. })));

        assert!(matches!(
            Snapshot::from_json_str("{", "[]"),
            Err(BuildError::Json(_))
        ));
    }

    #[test]
    fn insert_rejects_only_the_bad_flag() {
        let mut snapshot = Snapshot::from_json_str(FLAGS, SEGMENTS).unwrap();

        let result = snapshot.insert_flag(flag_dto(
            r#"{"name": "bad", "defaultTreatment": "off", "trafficAllocation": 500}"#,
        ));
        assert_that!(result).is_err();
        assert_that!(snapshot.flag("bad")).is_none();
        assert_that!(snapshot.flag("checkout")).is_some();

        snapshot
            .insert_flag(flag_dto(r#"{"name": "fresh", "defaultTreatment": "on"}"#))
            .unwrap();
        assert_that!(snapshot.flag("fresh")).is_some();
    }

    #[test]
    fn archiving_removes_a_flag() {
        let mut snapshot = Snapshot::from_json_str(FLAGS, SEGMENTS).unwrap();
        snapshot
            .insert_flag(flag_dto(
                r#"{"name": "checkout", "status": "ARCHIVED", "defaultTreatment": "off"}"#,
            ))
            .unwrap();
        assert_that!(snapshot.flag("checkout")).is_none();
        assert_that!(snapshot.remove_flag("checkout")).is_none();
    }

    #[test]
    fn published_snapshots_do_not_affect_loaded_ones() {
        let handle = SnapshotHandle::new(Snapshot::from_json_str(FLAGS, SEGMENTS).unwrap());
        let config = Config::default();
        let alice = Key::new("alice").unwrap();

        let before = handle.load();
        let previous = handle.publish(Snapshot::new());
        assert_eq!(previous.change_number(), 20);

        let decision = evaluate(&*before, "checkout", &alice, &hashmap! {}, &config);
        assert_eq!(decision.treatment, "on");

        let decision = evaluate(&*handle.load(), "checkout", &alice, &hashmap! {}, &config);
        assert!(decision.is_control());
        assert_that!(decision.label).contains_value(Label::DefinitionNotFound);
    }

    #[test]
    fn readers_see_whole_snapshots_while_writer_publishes() {
        let handle = Arc::new(SnapshotHandle::new(Snapshot::new()));
        let writer = {
            let handle = Arc::clone(&handle);
            thread::spawn(move || {
                for i in 0..200 {
                    let flags = format!(
                        r#"[{{"name": "a", "defaultTreatment": "t{0}", "changeNumber": {0}}},
                            {{"name": "b", "defaultTreatment": "t{0}", "changeNumber": {0}}}]"#,
                        i
                    );
                    handle.publish(Snapshot::from_json_str(&flags, "[]").unwrap());
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || {
                    let config = Config::default();
                    let key = Key::new("reader").unwrap();
                    for _ in 0..200 {
                        let snapshot = handle.load();
                        let a = evaluate(&*snapshot, "a", &key, &hashmap! {}, &config);
                        let b = evaluate(&*snapshot, "b", &key, &hashmap! {}, &config);
                        assert_eq!(a.treatment, b.treatment);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(handle.load().change_number(), 199);
    }
}
