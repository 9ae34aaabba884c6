//! Combinatorial tables of the 5-party replicated sharing scheme.
//!
//! A *sharing condition* names three senders who jointly know a cross term, the receiver the
//! term is relayed to and the fifth party whose additive share of the term is left out. There
//! are 20 of them, one per ordered pair `(receiver, zero_holder)`. The tables are generated
//! once and never change.
use std::sync::LazyLock;

use crate::share::{PARTIES, PartyId};

/// Number of sharing conditions, one per ordered pair of distinct parties.
pub const CONDITIONS: usize = 20;

/// Three senders, one receiver and the party whose share is defined to be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharingCondition {
    /// The parties that know the shared term in the clear.
    pub senders: [PartyId; 3],
    /// The party the correction value is sent to.
    pub receiver: PartyId,
    /// The party that never learns the correction value.
    pub zero_holder: PartyId,
}

impl SharingCondition {
    /// Whether `party` is one of the three senders.
    pub fn is_sender(&self, party: PartyId) -> bool {
        self.senders.contains(&party)
    }
}

/// A diagonal product `αx_term · αy_term` routed into the cross term `(row, col)`.
///
/// The term is known to every party except `term`, so it can only be folded into a cross term
/// whose senders all differ from `term`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagonalRoute {
    /// Row of the target cell.
    pub row: PartyId,
    /// Column of the target cell.
    pub col: PartyId,
    /// Whose mask components are multiplied.
    pub term: PartyId,
}

impl DiagonalRoute {
    /// Whether `party` adds this diagonal term to its matrix.
    pub fn accumulated_by(&self, party: PartyId) -> bool {
        party != self.row && party != self.col && party != self.term
    }
}

/// Routing of the five diagonal products into cross-term cells.
pub const DIAGONAL_ROUTES: [DiagonalRoute; PARTIES] = [
    DiagonalRoute {
        row: PartyId::P4,
        col: PartyId::P5,
        term: PartyId::P4,
    },
    DiagonalRoute {
        row: PartyId::P4,
        col: PartyId::P5,
        term: PartyId::P5,
    },
    DiagonalRoute {
        row: PartyId::P3,
        col: PartyId::P5,
        term: PartyId::P3,
    },
    DiagonalRoute {
        row: PartyId::P1,
        col: PartyId::P2,
        term: PartyId::P1,
    },
    DiagonalRoute {
        row: PartyId::P1,
        col: PartyId::P2,
        term: PartyId::P2,
    },
];

/// The three parties that relay the value a `target` cannot compute itself.
///
/// Parties 1, 2 and 3 inform 4 and 5; parties 1, 4 and 5 inform 2 and 3; parties 3, 4 and 5
/// inform 1.
pub fn relay_informants(target: PartyId) -> [PartyId; 3] {
    match target.get() {
        1 => [PartyId::P3, PartyId::P4, PartyId::P5],
        2 | 3 => [PartyId::P1, PartyId::P4, PartyId::P5],
        _ => [PartyId::P1, PartyId::P2, PartyId::P3],
    }
}

struct Tables {
    conditions: Vec<SharingCondition>,
    by_receiver: [Vec<(usize, PartyId)>; PARTIES],
}

static TABLES: LazyLock<Tables> = LazyLock::new(|| {
    let mut conditions = Vec::with_capacity(CONDITIONS);
    for i in 1..=3u8 {
        for j in i + 1..=4 {
            for k in j + 1..=5 {
                let senders = [i, j, k].map(party);
                let mut rest = PartyId::ALL.into_iter().filter(|p| !senders.contains(p));
                let (Some(a), Some(b)) = (rest.next(), rest.next()) else {
                    unreachable!("three senders always leave two parties")
                };
                conditions.push(SharingCondition {
                    senders,
                    receiver: a,
                    zero_holder: b,
                });
                conditions.push(SharingCondition {
                    senders,
                    receiver: b,
                    zero_holder: a,
                });
            }
        }
    }
    let mut by_receiver: [Vec<(usize, PartyId)>; PARTIES] = Default::default();
    for (index, condition) in conditions.iter().enumerate() {
        by_receiver[condition.receiver.index()].push((index, condition.zero_holder));
    }
    Tables {
        conditions,
        by_receiver,
    }
});

fn party(id: u8) -> PartyId {
    PartyId::ALL[id as usize - 1]
}

/// All 20 sharing conditions in their canonical order.
pub fn conditions() -> &'static [SharingCondition] {
    &TABLES.conditions
}

/// The `(condition index, zero holder)` pairs of all conditions `receiver` receives in.
pub fn conditions_for_receiver(receiver: PartyId) -> &'static [(usize, PartyId)] {
    &TABLES.by_receiver[receiver.index()]
}
