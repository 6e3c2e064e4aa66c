//! Child order comparison, shared by the exporter and the merge's reorder
//! pass so that both agree on which hints a reordering needs.

use crate::path::Segment;

/// Restricts both lists to the names they have in common, keeping each
/// list's own order.
pub fn align(current: &[Segment], expected: &[Segment]) -> (Vec<Segment>, Vec<Segment>) {
    let current_aligned = current
        .iter()
        .filter(|name| expected.contains(name))
        .cloned()
        .collect();
    let expected_aligned = expected
        .iter()
        .filter(|name| current.contains(name))
        .cloned()
        .collect();

    (current_aligned, expected_aligned)
}

/// The first move that brings `current` closer to `expected`, as a pair of
/// the name to move and the sibling to move it before. Both lists must hold
/// the same names.
pub fn first_move(current: &[Segment], expected: &[Segment]) -> Option<(Segment, Segment)> {
    current
        .iter()
        .zip(expected)
        .find(|(have, want)| have != want)
        .map(|(have, want)| (want.clone(), have.clone()))
}

pub fn apply_move(order: &mut Vec<Segment>, moved: &Segment, before: &Segment) {
    let Some(from) = order.iter().position(|name| name == moved) else {
        return;
    };
    let child = order.remove(from);

    match order.iter().position(|name| name == before) {
        Some(to) => order.insert(to, child),
        None => order.insert(from, child),
    }
}

/// Greedy hints turning `current` into `expected`. Applying the returned
/// moves in order reproduces `expected` for the names both lists share.
pub fn order_hints(current: &[Segment], expected: &[Segment]) -> Vec<(Segment, Segment)> {
    let (mut current, expected) = align(current, expected);
    let mut hints = Vec::new();

    while let Some((moved, before)) = first_move(&current, &expected) {
        apply_move(&mut current, &moved, &before);
        hints.push((moved, before));
    }

    hints
}

#[cfg(test)]
mod test {
    use super::*;

    fn names(source: &str) -> Vec<Segment> {
        source.chars().map(|c| Segment::new(c.to_string())).collect()
    }

    fn replay(current: &str, hints: &[(Segment, Segment)]) -> Vec<Segment> {
        let mut order = names(current);
        for (moved, before) in hints {
            apply_move(&mut order, moved, before);
        }
        order
    }

    #[test]
    fn swap_needs_one_hint() {
        let hints = order_hints(&names("abc"), &names("bac"));

        assert_eq!(hints, vec![(Segment::new("b"), Segment::new("a"))]);
        assert_eq!(replay("abc", &hints), names("bac"));
    }

    #[test]
    fn reversal() {
        let hints = order_hints(&names("abcd"), &names("dcba"));

        assert_eq!(hints.len(), 3);
        assert_eq!(replay("abcd", &hints), names("dcba"));
    }

    #[test]
    fn same_order_needs_nothing() {
        assert!(order_hints(&names("abc"), &names("abc")).is_empty());
        assert!(order_hints(&[], &[]).is_empty());
    }

    #[test]
    fn unshared_names_are_ignored() {
        let hints = order_hints(&names("axbc"), &names("cbay"));

        assert_eq!(replay("abc", &hints), names("cba"));
    }
}
