//! Property-based tests using proptest
//!
//! Aggregated error ordering and rendering, project id validation and slot
//! selection, checked against randomized inputs.

use gcpset::config::validate_project_id;
use gcpset::registry::slots::{all_slot_names, render_template, selected_slots};
use gcpset::{AggregatedError, Config, SlotError};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn arb_slot_error() -> impl Strategy<Value = SlotError> {
    prop_oneof![
        "[a-z ]{1,30}".prop_map(SlotError::Configuration),
        "[a-z ]{1,30}".prop_map(|m| SlotError::Construction(anyhow::anyhow!(m))),
        (1u64..600).prop_map(|s| SlotError::Timeout(std::time::Duration::from_secs(s))),
        Just(()).prop_map(|_| SlotError::Cancelled),
    ]
}

fn arb_failures() -> impl Strategy<Value = Vec<(String, SlotError)>> {
    prop::collection::vec(("[a-z][a-z-]{0,20}", arb_slot_error()), 0..30)
}

proptest! {
    /// Failures come out sorted by slot name whatever the push order
    #[test]
    fn aggregated_failures_are_sorted(failures in arb_failures()) {
        let mut errors = AggregatedError::new();
        let expected_len = failures.len();
        for (slot, error) in failures {
            errors.push(slot, error);
        }

        prop_assert_eq!(errors.len(), expected_len);
        let slots = errors.slots();
        for pair in slots.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
    }

    /// The rendered message names every slot and every cause
    #[test]
    fn aggregated_display_mentions_everything(failures in arb_failures()) {
        let rendered: Vec<(String, String)> = failures
            .iter()
            .map(|(slot, error)| (slot.clone(), error.to_string()))
            .collect();

        let mut errors = AggregatedError::new();
        for (slot, error) in failures {
            errors.push(slot, error);
        }
        let message = errors.to_string();

        let prefix = format!("{} slot(s) failed", rendered.len());
        prop_assert!(message.starts_with(&prefix));
        for (slot, cause) in &rendered {
            let entry = format!("{}: {}", slot, cause);
            prop_assert!(message.contains(&entry), "missing '{}' in '{}'", entry, message);
        }
    }

    /// into_result is Ok exactly when nothing was recorded
    #[test]
    fn into_result_matches_emptiness(failures in arb_failures()) {
        let empty = failures.is_empty();
        let mut errors = AggregatedError::new();
        for (slot, error) in failures {
            errors.push(slot, error);
        }
        prop_assert_eq!(errors.into_result().is_ok(), empty);
    }

    /// Well-formed project ids are accepted
    #[test]
    fn valid_project_ids_accepted(id in "[a-z][a-z0-9-]{4,28}[a-z0-9]") {
        prop_assert!(validate_project_id(&id));
    }

    /// Uppercase letters are never accepted
    #[test]
    fn uppercase_project_ids_rejected(
        prefix in "[a-z]{1,10}",
        upper in "[A-Z]{1,5}",
        suffix in "[a-z0-9]{1,10}",
    ) {
        let id = format!("{}{}{}", prefix, upper, suffix);
        prop_assert!(!validate_project_id(&id));
    }

    /// Project ids are substituted verbatim into resource templates
    #[test]
    fn template_substitutes_project(id in "[a-z][a-z0-9-]{4,28}[a-z0-9]") {
        let config = Config::for_project(id.clone());
        let rendered = render_template("projects/{project_id}/topics", &config).unwrap();
        prop_assert_eq!(rendered, format!("projects/{}/topics", id));
    }

    /// Selecting a subset of known slots builds exactly that subset
    #[test]
    fn selection_builds_exactly_the_subset(
        picks in prop::collection::btree_set(0usize..64, 0..10)
    ) {
        let names = all_slot_names();
        let wanted: BTreeSet<String> = picks
            .into_iter()
            .filter_map(|i| names.get(i % names.len()).map(|s| s.to_string()))
            .collect();

        let config = Config::for_project("my-project-123").only(wanted.iter().cloned());
        let selected: BTreeSet<String> = selected_slots(&config)
            .into_iter()
            .map(|def| def.name.clone())
            .collect();

        prop_assert_eq!(selected, wanted);
    }
}
