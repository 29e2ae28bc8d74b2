//! Property tests for the precedence orderings.

use permweave::context::ContextSet;
use permweave::node::compare_with_contexts;
use permweave::Node;

use proptest::prelude::*;
use std::cmp::Ordering;

fn context_set() -> impl Strategy<Value = ContextSet> {
    let key = prop::sample::select(vec!["server", "world", "mode", "region"]);
    let value = prop::sample::select(vec!["a", "b", "c"]);
    prop::collection::vec((key, value), 0..4).prop_map(|pairs| {
        ContextSet::from_pairs(pairs.iter().map(|(k, v)| (*k, *v))).unwrap()
    })
}

fn node() -> impl Strategy<Value = Node> {
    let key = prop::sample::select(vec!["a", "a.b", "a.*", "a.b.*", "*", "c.d"]);
    (key, any::<bool>(), context_set()).prop_map(|(key, value, contexts)| {
        Node::builder(key)
            .value(value)
            .contexts(&contexts)
            .build()
            .unwrap()
    })
}

proptest! {
    #[test]
    fn context_ordering_is_antisymmetric(a in context_set(), b in context_set()) {
        let ab = a.compare_specificity(&b);
        let ba = b.compare_specificity(&a);
        prop_assert_eq!(ab, ba.reverse());
        prop_assert_eq!(ab == Ordering::Equal, a == b);
    }

    #[test]
    fn context_ordering_is_transitive(a in context_set(), b in context_set(), c in context_set()) {
        if a.compare_specificity(&b) == Ordering::Greater
            && b.compare_specificity(&c) == Ordering::Greater
        {
            prop_assert_eq!(a.compare_specificity(&c), Ordering::Greater);
        }
    }

    #[test]
    fn node_ordering_is_total(a in node(), b in node()) {
        let ab = compare_with_contexts(&a, &b);
        prop_assert_eq!(ab, compare_with_contexts(&b, &a).reverse());
        prop_assert_eq!(ab == Ordering::Equal, a == b);
    }

    #[test]
    fn deny_outranks_identical_grant(contexts in context_set()) {
        let grant = Node::builder("some.permission").contexts(&contexts).build().unwrap();
        let deny = Node::builder("some.permission").value(false).contexts(&contexts).build().unwrap();
        prop_assert_eq!(compare_with_contexts(&deny, &grant), Ordering::Greater);
    }
}
