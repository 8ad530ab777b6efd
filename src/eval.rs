use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Formatter};

use log::{debug, warn};
use serde::{Serialize, Serializer};

use crate::attribute_value::Attributes;
use crate::bucketing::{self, BUCKET_COUNT};
use crate::condition::ConditionKind;
use crate::config::Config;
use crate::flag::Flag;
use crate::key::Key;
use crate::store::Store;

/// The treatment handed out when no real decision could be made.
pub const CONTROL: &str = "control";

const PREALLOCATED_DEPENDENCY_CHAIN_SIZE: usize = 10;

/// Label explains which step of the evaluation produced a [Decision].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Label {
    /// No flag with the requested name exists in the store.
    DefinitionNotFound,
    /// The flag was killed, so its default treatment was returned without looking at conditions.
    Killed,
    /// The key fell outside the flag's traffic allocation.
    NotInSplit,
    /// No condition matched.
    DefaultRule,
    /// Evaluation was cut short by a dependency cycle or by nesting dependencies too deeply.
    Exception,
    /// The condition carrying this label matched.
    Matched(String),
}

impl Label {
    pub fn as_str(&self) -> &str {
        match self {
            Label::DefinitionNotFound => "definition not found",
            Label::Killed => "killed",
            Label::NotInSplit => "not in split",
            Label::DefaultRule => "default rule",
            Label::Exception => "exception",
            Label::Matched(label) => label,
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Label {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// The outcome of evaluating one flag for one key.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// The treatment the key receives.
    pub treatment: String,

    /// Why that treatment was chosen. None when [Config::labels_enabled] is off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,

    /// The configuration payload attached to the treatment, if the flag defines one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// The change number of the flag definition that was evaluated. None when no flag was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_number: Option<i64>,
}

impl Decision {
    fn control(label: Label) -> Decision {
        Decision {
            treatment: CONTROL.to_string(),
            label: Some(label),
            config: None,
            change_number: None,
        }
    }

    fn for_flag(flag: &Flag, treatment: &str, label: Label) -> Decision {
        Decision {
            treatment: treatment.to_string(),
            label: Some(label),
            config: flag.config_for(treatment).map(str::to_string),
            change_number: Some(flag.change_number),
        }
    }

    /// True if this decision carries the [CONTROL] treatment.
    pub fn is_control(&self) -> bool {
        self.treatment == CONTROL
    }
}

/// Bookkeeping shared by one top-level evaluation and every dependency it triggers.
pub(crate) struct EvaluationStack {
    flag_chain: HashSet<String>,
    max_depth: usize,
    dependency_evaluations: usize,
    aborted: bool,
}

impl EvaluationStack {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            flag_chain: HashSet::with_capacity(PREALLOCATED_DEPENDENCY_CHAIN_SIZE),
            max_depth: config.max_dependency_depth,
            dependency_evaluations: 0,
            aborted: false,
        }
    }

    /// How many dependency matchers asked for another flag's treatment so far.
    pub(crate) fn dependency_evaluations(&self) -> usize {
        self.dependency_evaluations
    }
}

/// Evaluate the flag called `flag_name` for `key`.
///
/// This never fails: an unknown flag yields [CONTROL] with [Label::DefinitionNotFound], and a
/// dependency cycle yields [CONTROL] with [Label::Exception].
pub fn evaluate(
    store: &dyn Store,
    flag_name: &str,
    key: &Key,
    attributes: &Attributes,
    config: &Config,
) -> Decision {
    match store.flag(flag_name) {
        Some(flag) => evaluate_flag(store, flag, key, attributes, config),
        None => {
            debug!("flag {} not found", flag_name);
            finish(Decision::control(Label::DefinitionNotFound), config)
        }
    }
}

/// Evaluate `flag` for `key`. Dependency matchers and segments are looked up in `store`.
pub fn evaluate_flag(
    store: &dyn Store,
    flag: &Flag,
    key: &Key,
    attributes: &Attributes,
    config: &Config,
) -> Decision {
    let mut stack = EvaluationStack::new(config);
    let mut decision = evaluate_internal(store, flag, key, attributes, &mut stack);
    if stack.aborted {
        decision = Decision {
            change_number: Some(flag.change_number),
            ..Decision::control(Label::Exception)
        };
    }
    debug!(
        "flag {} evaluated to {} for {} ({}, {} dependency evaluations)",
        flag.name,
        decision.treatment,
        key,
        decision.label.as_ref().map(Label::as_str).unwrap_or_default(),
        stack.dependency_evaluations()
    );
    finish(decision, config)
}

/// Evaluate several flags for the same key against one store.
///
/// Every requested name gets an entry; names repeated in `flag_names` are evaluated once.
pub fn evaluate_many<I, S>(
    store: &dyn Store,
    flag_names: I,
    key: &Key,
    attributes: &Attributes,
    config: &Config,
) -> HashMap<String, Decision>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut decisions: HashMap<String, Decision> = HashMap::new();
    for name in flag_names {
        let name = name.as_ref();
        if !decisions.contains_key(name) {
            decisions.insert(
                name.to_string(),
                evaluate(store, name, key, attributes, config),
            );
        }
    }
    decisions
}

fn finish(mut decision: Decision, config: &Config) -> Decision {
    if !config.labels_enabled {
        decision.label = None;
    }
    decision
}

fn evaluate_internal(
    store: &dyn Store,
    flag: &Flag,
    key: &Key,
    attributes: &Attributes,
    stack: &mut EvaluationStack,
) -> Decision {
    if flag.is_killed() {
        return Decision::for_flag(flag, flag.default_treatment(), Label::Killed);
    }

    stack.flag_chain.insert(flag.name.clone());
    let decision = evaluate_conditions(store, flag, key, attributes, stack);
    stack.flag_chain.remove(&flag.name);

    decision
}

fn evaluate_conditions(
    store: &dyn Store,
    flag: &Flag,
    key: &Key,
    attributes: &Attributes,
    stack: &mut EvaluationStack,
) -> Decision {
    let mut traffic_checked = false;

    for condition in flag.conditions() {
        if !traffic_checked && condition.kind == ConditionKind::Rollout {
            traffic_checked = true;
            if !in_traffic_allocation(flag, key) {
                return Decision::for_flag(flag, flag.default_treatment(), Label::NotInSplit);
            }
        }

        let matched = condition.matches_within(key, attributes, store, stack);
        if stack.aborted {
            return Decision::control(Label::Exception);
        }
        if matched {
            return match bucketing::assign(
                flag.algorithm(),
                key.bucketing_key(),
                flag.seed,
                condition.partitions(),
            ) {
                Some(treatment) => {
                    Decision::for_flag(flag, treatment, Label::Matched(condition.label.clone()))
                }
                None => {
                    warn!(
                        "condition {:?} of flag {} has no partitions",
                        condition.label, flag.name
                    );
                    Decision::control(Label::Exception)
                }
            };
        }
    }

    Decision::for_flag(flag, flag.default_treatment(), Label::DefaultRule)
}

fn in_traffic_allocation(flag: &Flag, key: &Key) -> bool {
    if flag.traffic_allocation >= BUCKET_COUNT {
        return true;
    }
    let bucket = flag
        .algorithm()
        .bucket(key.bucketing_key(), flag.traffic_allocation_seed);
    bucket < flag.traffic_allocation
}

/// The treatment `flag_name` hands `key`, for a dependency matcher.
///
/// None means the dependency could not be evaluated at all; the whole evaluation is then marked
/// as aborted. A flag missing from the store yields [CONTROL], like a top-level evaluation would.
pub(crate) fn dependency_treatment(
    store: &dyn Store,
    flag_name: &str,
    key: &Key,
    attributes: &Attributes,
    stack: &mut EvaluationStack,
) -> Option<String> {
    stack.dependency_evaluations += 1;

    if stack.flag_chain.contains(flag_name) {
        warn!("dependency on flag {} caused a circular reference; this is probably a temporary condition due to an incomplete update", flag_name);
        stack.aborted = true;
        return None;
    }
    if stack.flag_chain.len() > stack.max_depth {
        warn!(
            "dependency on flag {} exceeds the maximum depth of {}",
            flag_name, stack.max_depth
        );
        stack.aborted = true;
        return None;
    }

    match store.flag(flag_name) {
        Some(flag) => Some(evaluate_internal(store, flag, key, attributes, stack).treatment),
        None => {
            debug!("dependency flag {} not found", flag_name);
            Some(CONTROL.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute_value::AttributeValue;
    use crate::bucketing::HashAlgorithm;
    use crate::condition::{Condition, Partition};
    use crate::matcher::{Matcher, MatcherKind};
    use crate::test_common::TestStore;
    use maplit::hashmap;
    use proptest::prelude::*;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    fn key(k: &str) -> Key {
        Key::new(k).unwrap()
    }

    fn eval(store: &TestStore, flag_name: &str, k: &str) -> Decision {
        evaluate(store, flag_name, &key(k), &hashmap! {}, &Config::default())
    }

    fn rollout_flag(allocation: u32) -> Flag {
        Flag::new("rollout", "off")
            .with_seed(HashAlgorithm::Murmur3, 42)
            .with_conditions(vec![Condition::new(
                "rollout",
                "everyone",
                vec![Matcher::new(MatcherKind::AllKeys)],
                vec![Partition::new("on", 50), Partition::new("off", 50)],
            )
            .unwrap()])
            .with_traffic_allocation(allocation, 7)
            .unwrap()
    }

    #[test]
    fn unknown_flag_is_control() {
        let store = TestStore::new();
        let decision = eval(&store, "no_such_flag", "alice");
        assert!(decision.is_control());
        assert_that!(decision.label).contains_value(Label::DefinitionNotFound);
        assert_that!(decision.change_number).is_none();
        assert_that!(decision.config).is_none();
    }

    #[test]
    fn killed_flag_returns_default_treatment() {
        let store = TestStore::new();
        let decision = eval(&store, "killed", "alice");
        assert_eq!(decision.treatment, "off");
        assert_that!(decision.label).contains_value(Label::Killed);
        assert_that!(decision.config).contains_value(r#"{"reason":"killed"}"#.to_string());
        assert_that!(decision.change_number).contains_value(3);
    }

    #[test]
    fn matched_condition_carries_its_label_and_config() {
        let store = TestStore::new();
        let decision = eval(&store, "on_for_everyone", "alice");
        assert_eq!(decision.treatment, "on");
        assert_that!(decision.label).contains_value(Label::Matched("everyone".to_string()));
        assert_that!(decision.config).contains_value(r#"{"color":"green"}"#.to_string());
        assert_that!(decision.change_number).contains_value(1);
    }

    #[test_case("alice", "on", Label::Matched("in segment beta".to_string()))]
    #[test_case("bob", "on", Label::Matched("in segment beta".to_string()))]
    #[test_case("carol", "off", Label::DefaultRule)]
    fn no_matching_condition_falls_back_to_default(k: &str, treatment: &str, label: Label) {
        let store = TestStore::new();
        let decision = eval(&store, "beta_segment", k);
        assert_eq!(decision.treatment, treatment);
        assert_that!(decision.label).contains_value(label);
    }

    #[test]
    fn attributes_drive_conditions_in_order() {
        let store = TestStore::new();
        let config = Config::default();
        let evaluate_with = |attributes: Attributes| {
            evaluate(&store, "by_plan", &key("alice"), &attributes, &config)
        };

        let decision = evaluate_with(hashmap! {
            "plan".to_string() => AttributeValue::from("enterprise"),
            "signup".to_string() => AttributeValue::from(1_400_000_000i64),
        });
        assert_eq!(decision.treatment, "premium");

        let decision = evaluate_with(hashmap! {
            "plan".to_string() => AttributeValue::from("starter"),
            "signup".to_string() => AttributeValue::from(1_400_000_000i64),
        });
        assert_eq!(decision.treatment, "loyal");
        assert_that!(decision.label)
            .contains_value(Label::Matched("long time customers".to_string()));

        // same UTC day as the literal
        let decision = evaluate_with(hashmap! {
            "signup".to_string() => AttributeValue::from(1_500_000_000i64),
        });
        assert_eq!(decision.treatment, "loyal");

        let decision = evaluate_with(hashmap! {
            "signup".to_string() => AttributeValue::from(1_600_000_000i64),
        });
        assert_eq!(decision.treatment, "free");
        assert_that!(decision.label).contains_value(Label::DefaultRule);
    }

    #[test]
    fn zero_traffic_allocation_never_reaches_conditions() {
        let store = TestStore::new();
        let flag = rollout_flag(0);
        for i in 0..500 {
            let decision = evaluate_flag(
                &store,
                &flag,
                &key(&format!("user-{}", i)),
                &hashmap! {},
                &Config::default(),
            );
            assert_eq!(decision.treatment, "off");
            assert_that!(decision.label).contains_value(Label::NotInSplit);
        }
    }

    #[test]
    fn full_traffic_allocation_always_reaches_conditions() {
        let store = TestStore::new();
        let flag = rollout_flag(100);
        for i in 0..500 {
            let decision = evaluate_flag(
                &store,
                &flag,
                &key(&format!("user-{}", i)),
                &hashmap! {},
                &Config::default(),
            );
            assert_that!(decision.label).contains_value(Label::Matched("everyone".to_string()));
        }
    }

    #[test]
    fn partial_traffic_allocation_admits_its_share() {
        let store = TestStore::new();
        let flag = rollout_flag(25);
        let admitted = (0..10_000)
            .map(|i| {
                evaluate_flag(
                    &store,
                    &flag,
                    &key(&format!("user-{}", i)),
                    &hashmap! {},
                    &Config::default(),
                )
            })
            .filter(|d| d.label != Some(Label::NotInSplit))
            .count();
        assert!(
            (2_200..=2_800).contains(&admitted),
            "{} of 10000 keys admitted",
            admitted
        );
    }

    #[test]
    fn traffic_gate_uses_the_bucketing_key() {
        let store = TestStore::new();
        let flag = rollout_flag(25);
        let config = Config::default();
        let first = Key::with_bucketing_key("alice", "device-1").unwrap();
        let second = Key::with_bucketing_key("bob", "device-1").unwrap();
        assert_eq!(
            evaluate_flag(&store, &flag, &first, &hashmap! {}, &config).treatment,
            evaluate_flag(&store, &flag, &second, &hashmap! {}, &config).treatment
        );
    }

    #[test]
    fn whitelist_conditions_are_exempt_from_traffic_allocation() {
        let store = TestStore::new();

        let decision = eval(&store, "whitelist_then_rollout", "alice");
        assert_eq!(decision.treatment, "vip");
        assert_that!(decision.label).contains_value(Label::Matched("whitelisted".to_string()));

        let decision = eval(&store, "whitelist_then_rollout", "bob");
        assert_eq!(decision.treatment, "off");
        assert_that!(decision.label).contains_value(Label::NotInSplit);
    }

    #[test]
    fn dependency_on_another_flag() {
        let store = TestStore::new();

        let decision = eval(&store, "depends_on_beta", "alice");
        assert_eq!(decision.treatment, "on");
        assert_that!(decision.label).contains_value(Label::Matched("beta users".to_string()));

        let decision = eval(&store, "depends_on_beta", "carol");
        assert_eq!(decision.treatment, "off");
        assert_that!(decision.label).contains_value(Label::DefaultRule);
    }

    // cycle_a
    //   cycle_b
    //     cycle_a
    #[test]
    fn dependency_cycle_is_an_exception() {
        let store = TestStore::new();
        for flag in &["cycle_a", "cycle_b"] {
            let decision = eval(&store, flag, "alice");
            assert!(decision.is_control());
            assert_that!(decision.label).contains_value(Label::Exception);
        }
    }

    #[test]
    fn dependency_on_itself_is_an_exception() {
        let mut store = TestStore::new();
        store.insert_flag(
            Flag::new("narcissus", "off").with_conditions(vec![Condition::new(
                "narcissus",
                "self",
                vec![Matcher::new(MatcherKind::Dependency {
                    flag: "narcissus".to_string(),
                    treatments: ["on".to_string()].into_iter().collect(),
                })],
                vec![Partition::new("on", 100)],
            )
            .unwrap()]),
        );
        let decision = eval(&store, "narcissus", "alice");
        assert!(decision.is_control());
        assert_that!(decision.label).contains_value(Label::Exception);
    }

    #[test]
    fn dependency_on_a_missing_flag_sees_control() {
        let mut store = TestStore::new();
        let depends_on_absent = |treatment: &str| {
            Matcher::new(MatcherKind::Dependency {
                flag: "absent".to_string(),
                treatments: [treatment.to_string()].into_iter().collect(),
            })
        };
        store.insert_flag(
            Flag::new("fallback", "off").with_conditions(vec![
                Condition::new(
                    "fallback",
                    "absent is on",
                    vec![depends_on_absent("on")],
                    vec![Partition::new("on", 100)],
                )
                .unwrap(),
                Condition::new(
                    "fallback",
                    "absent is control",
                    vec![depends_on_absent(CONTROL)],
                    vec![Partition::new("safe", 100)],
                )
                .unwrap(),
            ]),
        );

        let decision = eval(&store, "fallback", "alice");
        assert_eq!(decision.treatment, "safe");
        assert_that!(decision.label)
            .contains_value(Label::Matched("absent is control".to_string()));
    }

    #[test]
    fn dependency_depth_is_limited() {
        let store = TestStore::new();
        let shallow = Config {
            max_dependency_depth: 0,
            ..Config::default()
        };
        let decision = evaluate(
            &store,
            "depends_on_beta",
            &key("alice"),
            &hashmap! {},
            &shallow,
        );
        assert!(decision.is_control());
        assert_that!(decision.label).contains_value(Label::Exception);
    }

    #[test]
    fn diamond_dependencies_are_not_cycles() {
        let mut store = TestStore::new();
        let depends_on = |name: &str| {
            Matcher::new(MatcherKind::Dependency {
                flag: name.to_string(),
                treatments: ["on".to_string()].into_iter().collect(),
            })
        };
        store.insert_flag(
            Flag::new("diamond", "off").with_conditions(vec![Condition::new(
                "diamond",
                "both",
                vec![depends_on("beta_segment"), depends_on("depends_on_beta")],
                vec![Partition::new("on", 100)],
            )
            .unwrap()]),
        );
        let decision = eval(&store, "diamond", "bob");
        assert_eq!(decision.treatment, "on");
        assert_that!(decision.label).contains_value(Label::Matched("both".to_string()));
    }

    #[test]
    fn labels_can_be_disabled() {
        let store = TestStore::new();
        let config = Config {
            labels_enabled: false,
            ..Config::default()
        };
        for flag in &["on_for_everyone", "killed", "no_such_flag", "cycle_a"] {
            let decision = evaluate(&store, flag, &key("alice"), &hashmap! {}, &config);
            assert_that!(decision.label).is_none();
        }
        let decision = evaluate(&store, "on_for_everyone", &key("alice"), &hashmap! {}, &config);
        assert_eq!(decision.treatment, "on");
    }

    #[test]
    fn evaluates_many_flags_at_once() {
        let store = TestStore::new();
        let decisions = evaluate_many(
            &store,
            vec!["on_for_everyone", "killed", "no_such_flag", "killed"],
            &key("alice"),
            &hashmap! {},
            &Config::default(),
        );
        assert_eq!(decisions.len(), 3);
        assert_eq!(decisions["on_for_everyone"].treatment, "on");
        assert_eq!(decisions["killed"].treatment, "off");
        assert!(decisions["no_such_flag"].is_control());
    }

    #[test]
    fn decision_serialization() {
        let store = TestStore::new();
        assert_eq!(
            serde_json::to_value(eval(&store, "killed", "alice")).unwrap(),
            json!({
                "treatment": "off",
                "label": "killed",
                "config": "{\"reason\":\"killed\"}",
                "changeNumber": 3
            })
        );
        assert_eq!(
            serde_json::to_value(eval(&store, "no_such_flag", "alice")).unwrap(),
            json!({"treatment": "control", "label": "definition not found"})
        );
    }

    #[test_case(Label::DefinitionNotFound, "definition not found")]
    #[test_case(Label::Killed, "killed")]
    #[test_case(Label::NotInSplit, "not in split")]
    #[test_case(Label::DefaultRule, "default rule")]
    #[test_case(Label::Exception, "exception")]
    #[test_case(Label::Matched("in segment beta".to_string()), "in segment beta")]
    fn label_strings(label: Label, expected: &str) {
        assert_eq!(label.to_string(), expected);
    }

    proptest! {
        #[test]
        fn evaluation_is_deterministic(k in "[a-zA-Z0-9@._-]{1,40}") {
            let store = TestStore::new();
            let flag = rollout_flag(60);
            let config = Config::default();
            let key = Key::new(k).unwrap();

            let first = evaluate_flag(&store, &flag, &key, &hashmap! {}, &config);
            let second = evaluate_flag(&store, &flag, &key, &hashmap! {}, &config);
            prop_assert_eq!(&first, &second);
            prop_assert!(first.treatment == "on" || first.treatment == "off");
        }
    }
}
