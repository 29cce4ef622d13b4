mod common;

use common::*;
use fedquery_core::query::reconcile;
use fedquery_core::storage::{MemorySource, Queryable};
use fedquery_core::types::ElementType;
use proptest::prelude::*;
use std::sync::Arc;

fn sources_of(types: &[ElementType]) -> Vec<Arc<dyn Queryable>> {
    types
        .iter()
        .map(|t| Arc::new(MemorySource::empty(t.clone())) as Arc<dyn Queryable>)
        .collect()
}

/// Depth of a type below the lattice root.
fn depth(t: &ElementType) -> usize {
    t.ancestors().count()
}

proptest! {
    #[test]
    fn chain_reconciles_to_most_general_present(picks in prop::collection::vec(0usize..3, 1..8)) {
        let l = lattice();
        let chain = [l.data, l.page, l.blog];
        let types: Vec<ElementType> = picks.iter().map(|i| chain[*i].clone()).collect();

        let reconciled = reconcile(&sources_of(&types)).unwrap();
        let most_general = types.iter().min_by_key(|t| depth(t)).unwrap();
        prop_assert_eq!(&reconciled, most_general);
        prop_assert!(types.iter().all(|t| reconciled.is_assignable_from(t)));
    }

    #[test]
    fn siblings_reconcile_to_first(picks in prop::collection::vec(any::<bool>(), 1..8)) {
        let l = lattice();
        let types: Vec<ElementType> = picks
            .iter()
            .map(|media| if *media { l.media.clone() } else { l.page.clone() })
            .collect();

        let reconciled = reconcile(&sources_of(&types)).unwrap();
        prop_assert_eq!(&reconciled, &types[0]);
    }

    #[test]
    fn result_is_a_source_type_covering_the_first(picks in prop::collection::vec(0usize..4, 1..8)) {
        let l = lattice();
        let all = [l.data, l.page, l.media, l.blog];
        let types: Vec<ElementType> = picks.iter().map(|i| all[*i].clone()).collect();

        let reconciled = reconcile(&sources_of(&types)).unwrap();
        prop_assert!(types.contains(&reconciled));
        prop_assert!(reconciled.is_assignable_from(&types[0]));
    }
}

#[test]
fn test_empty_source_list_is_rejected() {
    assert!(reconcile(&[]).is_err());
}
