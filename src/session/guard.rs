//! In-flight guard for store actions. Each slot keeps a generation counter; an
//! action takes a ticket when it starts and may only write shared state if its
//! ticket is still the newest one for that slot when the response arrives.
//!
//! Every started action is also counted until it ends, superseded or not, so
//! the session reports `loading` while any slot has a request outstanding.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    /// Login, registration, startup validation, token probe, Telegram login.
    Identity,
    /// Profile and preference updates.
    Profile,
    /// Telegram deep links, link verification, unlinking.
    Telegram,
}

impl Slot {
    const fn index(self) -> usize {
        match self {
            Self::Identity => 0,
            Self::Profile => 1,
            Self::Telegram => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Ticket {
    slot: Slot,
    generation: u64,
}

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    generations: [AtomicU64; 3],
    active: AtomicUsize,
}

impl InFlight {
    pub(crate) fn begin(&self, slot: Slot) -> Ticket {
        self.active.fetch_add(1, Ordering::SeqCst);
        let generation = self.generations[slot.index()].fetch_add(1, Ordering::SeqCst) + 1;
        Ticket { slot, generation }
    }

    /// Ends the action holding `ticket`. Returns whether it is still current.
    pub(crate) fn end(&self, ticket: Ticket) -> bool {
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| active.checked_sub(1));
        self.is_current(ticket)
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn is_current(&self, ticket: Ticket) -> bool {
        self.generations[ticket.slot.index()].load(Ordering::SeqCst) == ticket.generation
    }

    /// Invalidates every outstanding ticket.
    pub(crate) fn supersede_all(&self) {
        for generation in &self.generations {
            generation.fetch_add(1, Ordering::SeqCst);
        }
    }
}
