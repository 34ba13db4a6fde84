//! Chronological ordering of action starts and ends.
//!
//! Ordering rules, by priority:
//! 1. ascending time;
//! 2. at equal time, ends are delivered before starts, so that a finishing
//!    action releases what a starting one may claim;
//! 3. the end of a zero-duration action comes after every start of its
//!    instant, so an action never ends before it begins;
//! 4. otherwise, the insertion order of the actions.

use crate::action::{Action, Time};
use crate::event::Hook;

/// One delivery point of the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    pub time: Time,
    pub hook: Hook,
    /// Index of the action in the slice the timeline was built from.
    pub action: usize,
}

/// The sorted list of start and end moments of a set of actions.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    moments: Vec<Moment>,
}

impl Timeline {
    pub fn new(actions: &[Action]) -> Self {
        let mut moments: Vec<(u8, Moment)> = Vec::with_capacity(actions.len() * 2);
        for (i, a) in actions.iter().enumerate() {
            moments.push((
                1,
                Moment {
                    time: a.start(),
                    hook: Hook::Start,
                    action: i,
                },
            ));
            let rank = if a.start() == a.end() { 2 } else { 0 };
            moments.push((
                rank,
                Moment {
                    time: a.end(),
                    hook: Hook::End,
                    action: i,
                },
            ));
        }
        moments.sort_by_key(|(rank, m)| (m.time, *rank, m.action));
        Self {
            moments: moments.into_iter().map(|(_, m)| m).collect(),
        }
    }

    pub fn moments(&self) -> &[Moment] {
        &self.moments
    }

    pub fn len(&self) -> usize {
        self.moments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Moment> {
        self.moments.iter()
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Moment;
    type IntoIter = std::slice::Iter<'a, Moment>;

    fn into_iter(self) -> Self::IntoIter {
        self.moments.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmplace_core::Node;

    fn order(actions: &[Action]) -> Vec<(Time, Hook, usize)> {
        Timeline::new(actions)
            .iter()
            .map(|m| (m.time, m.hook, m.action))
            .collect()
    }

    #[test]
    fn ends_before_starts_at_same_time() {
        let actions = vec![
            Action::boot_node(Node::new(1), 3, 5),
            Action::shutdown_node(Node::new(2), 0, 3),
        ];
        assert_eq!(
            order(&actions),
            vec![
                (0, Hook::Start, 1),
                (3, Hook::End, 1),
                (3, Hook::Start, 0),
                (5, Hook::End, 0),
            ]
        );
    }

    #[test]
    fn zero_duration_ends_after_its_start() {
        let actions = vec![
            Action::boot_node(Node::new(1), 2, 2),
            Action::boot_node(Node::new(2), 0, 2),
            Action::boot_node(Node::new(3), 2, 4),
        ];
        assert_eq!(
            order(&actions),
            vec![
                (0, Hook::Start, 1),
                (2, Hook::End, 1),
                (2, Hook::Start, 0),
                (2, Hook::Start, 2),
                (2, Hook::End, 0),
                (4, Hook::End, 2),
            ]
        );
    }

    #[test]
    fn empty() {
        assert!(Timeline::new(&[]).is_empty());
    }
}
