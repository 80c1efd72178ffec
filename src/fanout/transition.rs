//! Range transition table.
//!
//! Every (old, new) sharing-scope pair maps to exactly one fellow-item side
//! effect. The table is an enum-indexed 3×3 matrix so adding a `Range` variant
//! fails to compile until every new cell is filled in.

use crate::store::Range;

/// Fellow-item side effect of a range transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeAction {
    /// Diagonal cell: nothing to do.
    Keep,
    /// Widening from private: create fellow items for all members.
    CreateFellows { confirmed: bool },
    /// Narrowing to private: delete all fellow items.
    DeleteFellows,
    /// `some → all`: confirm every existing fellow, progress untouched.
    ConfirmFellows,
    /// `all → some`: un-confirm only fellows with zero progress; recorded
    /// work is never discarded.
    UnconfirmIdleFellows,
}

const fn row(range: Range) -> usize {
    match range {
        Range::Private => 0,
        Range::Some => 1,
        Range::All => 2,
    }
}

/// Rows = old range, columns = new range.
const TRANSITIONS: [[RangeAction; 3]; 3] = [
    // old = private
    [
        RangeAction::Keep,
        RangeAction::CreateFellows { confirmed: false },
        RangeAction::CreateFellows { confirmed: true },
    ],
    // old = some
    [
        RangeAction::DeleteFellows,
        RangeAction::Keep,
        RangeAction::ConfirmFellows,
    ],
    // old = all
    [
        RangeAction::DeleteFellows,
        RangeAction::UnconfirmIdleFellows,
        RangeAction::Keep,
    ],
];

/// Look up the side effect for a transition.
pub fn transition(old: Range, new: Range) -> RangeAction {
    TRANSITIONS[row(old)][row(new)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use Range::{All, Private, Some as SomeRange};

    #[test]
    fn all_nine_cells_match_the_table() {
        assert_eq!(transition(Private, Private), RangeAction::Keep);
        assert_eq!(
            transition(Private, SomeRange),
            RangeAction::CreateFellows { confirmed: false }
        );
        assert_eq!(
            transition(Private, All),
            RangeAction::CreateFellows { confirmed: true }
        );
        assert_eq!(transition(SomeRange, Private), RangeAction::DeleteFellows);
        assert_eq!(transition(SomeRange, SomeRange), RangeAction::Keep);
        assert_eq!(transition(SomeRange, All), RangeAction::ConfirmFellows);
        assert_eq!(transition(All, Private), RangeAction::DeleteFellows);
        assert_eq!(transition(All, SomeRange), RangeAction::UnconfirmIdleFellows);
        assert_eq!(transition(All, All), RangeAction::Keep);
    }
}
