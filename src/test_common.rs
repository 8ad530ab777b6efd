#![cfg(test)]

use crate::dto::{FlagDto, SegmentDto};
use crate::flag::Flag;
use crate::segment::Segment;
use crate::store::Store;
use std::collections::HashMap;

const FLAGS: &str = r#"[
    {
        "name": "on_for_everyone",
        "trafficTypeName": "user",
        "defaultTreatment": "off",
        "seed": 1314,
        "algo": 2,
        "changeNumber": 1,
        "conditions": [{
            "conditionType": "ROLLOUT",
            "label": "everyone",
            "matcherGroup": {"combiner": "AND", "matchers": [
                {"keySelector": {"trafficType": "user", "attribute": null}, "matcherType": "ALL_KEYS", "negate": false}
            ]},
            "partitions": [{"treatment": "on", "size": 100}, {"treatment": "off", "size": 0}]
        }],
        "configurations": {"on": "{\"color\":\"green\"}"}
    },
    {
        "name": "killed",
        "killed": true,
        "defaultTreatment": "off",
        "algo": 2,
        "changeNumber": 3,
        "conditions": [{
            "label": "everyone",
            "matcherGroup": {"combiner": "AND", "matchers": [{"matcherType": "ALL_KEYS"}]},
            "partitions": [{"treatment": "on", "size": 100}]
        }],
        "configurations": {"off": "{\"reason\":\"killed\"}"}
    },
    {
        "name": "whitelist_then_rollout",
        "defaultTreatment": "off",
        "trafficAllocation": 0,
        "trafficAllocationSeed": 7,
        "algo": 2,
        "changeNumber": 4,
        "conditions": [
            {
                "conditionType": "WHITELIST",
                "label": "whitelisted",
                "matcherGroup": {"combiner": "AND", "matchers": [
                    {"matcherType": "WHITELIST", "whitelistMatcherData": {"whitelist": ["alice"]}}
                ]},
                "partitions": [{"treatment": "vip", "size": 100}]
            },
            {
                "conditionType": "ROLLOUT",
                "label": "everyone",
                "matcherGroup": {"combiner": "AND", "matchers": [{"matcherType": "ALL_KEYS"}]},
                "partitions": [{"treatment": "on", "size": 50}, {"treatment": "off", "size": 50}]
            }
        ]
    },
    {
        "name": "beta_segment",
        "defaultTreatment": "off",
        "algo": 2,
        "changeNumber": 5,
        "conditions": [{
            "conditionType": "ROLLOUT",
            "label": "in segment beta",
            "matcherGroup": {"combiner": "AND", "matchers": [
                {"matcherType": "IN_SEGMENT", "userDefinedSegmentMatcherData": {"segmentName": "beta"}}
            ]},
            "partitions": [{"treatment": "on", "size": 100}]
        }]
    },
    {
        "name": "depends_on_beta",
        "defaultTreatment": "off",
        "algo": 2,
        "changeNumber": 6,
        "conditions": [{
            "conditionType": "ROLLOUT",
            "label": "beta users",
            "matcherGroup": {"combiner": "AND", "matchers": [
                {"matcherType": "IN_SPLIT_TREATMENT", "dependencyMatcherData": {"split": "beta_segment", "treatments": ["on"]}}
            ]},
            "partitions": [{"treatment": "on", "size": 100}]
        }]
    },
    {
        "name": "cycle_a",
        "defaultTreatment": "off",
        "algo": 2,
        "conditions": [{
            "label": "b is on",
            "matcherGroup": {"combiner": "AND", "matchers": [
                {"matcherType": "IN_SPLIT_TREATMENT", "dependencyMatcherData": {"split": "cycle_b", "treatments": ["on"]}}
            ]},
            "partitions": [{"treatment": "on", "size": 100}]
        }]
    },
    {
        "name": "cycle_b",
        "defaultTreatment": "off",
        "algo": 2,
        "conditions": [{
            "label": "a is on",
            "matcherGroup": {"combiner": "AND", "matchers": [
                {"matcherType": "IN_SPLIT_TREATMENT", "dependencyMatcherData": {"split": "cycle_a", "treatments": ["on"]}}
            ]},
            "partitions": [{"treatment": "on", "size": 100}]
        }]
    },
    {
        "name": "by_plan",
        "defaultTreatment": "free",
        "algo": 2,
        "changeNumber": 8,
        "conditions": [
            {
                "label": "enterprise plans",
                "matcherGroup": {"combiner": "AND", "matchers": [
                    {"keySelector": {"trafficType": "user", "attribute": "plan"}, "matcherType": "WHITELIST", "whitelistMatcherData": {"whitelist": ["enterprise", "enterprise-plus"]}}
                ]},
                "partitions": [{"treatment": "premium", "size": 100}]
            },
            {
                "label": "long time customers",
                "matcherGroup": {"combiner": "AND", "matchers": [
                    {"keySelector": {"attribute": "signup"}, "matcherType": "LESS_THAN_OR_EQUAL_TO", "unaryNumericMatcherData": {"dataType": "DATETIME", "value": 1500000000000}}
                ]},
                "partitions": [{"treatment": "loyal", "size": 100}]
            }
        ]
    }
]"#;

const SEGMENTS: &str = r#"[
    {"name": "beta", "added": ["alice", "bob"], "removed": [], "till": 10}
]"#;

pub struct TestStore {
    flags: HashMap<String, Flag>,
    segments: HashMap<String, Segment>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::new_from_json_str(FLAGS, SEGMENTS)
    }

    pub fn new_from_json_str(flag_json: &str, segment_json: &str) -> Self {
        let flags: Vec<FlagDto> = serde_json::from_str(flag_json).unwrap();
        let segments: Vec<SegmentDto> = serde_json::from_str(segment_json).unwrap();

        Self {
            flags: flags
                .into_iter()
                .map(|dto| {
                    let flag = Flag::try_from(dto).unwrap();
                    (flag.name.clone(), flag)
                })
                .collect(),
            segments: segments
                .into_iter()
                .map(|dto| (dto.name.clone(), Segment::from(dto)))
                .collect(),
        }
    }

    pub fn insert_flag(&mut self, flag: Flag) {
        self.flags.insert(flag.name.clone(), flag);
    }

    pub fn insert_segment(&mut self, segment: Segment) {
        self.segments.insert(segment.name.clone(), segment);
    }
}

impl Store for TestStore {
    fn flag(&self, flag_name: &str) -> Option<&Flag> {
        self.flags.get(flag_name)
    }

    fn segment(&self, segment_name: &str) -> Option<&Segment> {
        self.segments.get(segment_name)
    }
}
