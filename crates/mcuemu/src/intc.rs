//! Priority interrupt controller shared by the cores.
//!
//! Each source is either idle or pending. A source becomes pending when a
//! peripheral raises it (or when its wired line shows the configured edge)
//! and goes back to idle only when it is acknowledged. After every mutation
//! the controller rescans its sources and remembers the most urgent one.
//!
//! Tie-break: when several pending sources share the highest level, the one
//! registered first wins. This fixed scan order is implementation-defined
//! and cores rely on it (the 8051 polling sequence, AVR vector order).

use std::fmt;

use tracing::{debug, warn};

/// Index of a source inside its controller.
pub type SourceId = usize;

/// Signal edge that makes a source pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// How a source reacts to its wired line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Raised only by peripherals through [`InterruptController::raise`].
    Internal,
    /// Pending on a fixed edge of the line.
    Edge(Edge),
    /// Pending on an edge chosen at run time by a polarity field.
    Selectable(Edge),
}

#[derive(Debug, Clone)]
pub struct InterruptSource {
    name: &'static str,
    vector: u32,
    level: u8,
    pending: bool,
    trigger: Trigger,
    line: bool,
}

impl InterruptSource {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Architecture-specific vector: an address or a vector-table index.
    pub fn vector(&self) -> u32 {
        self.vector
    }

    /// Priority level, zero meaning disabled.
    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    fn qualifies(&self) -> bool {
        self.pending && self.level > 0
    }
}

type PriorityListener = Box<dyn FnMut(u8, Option<SourceId>)>;

/// The set of interrupt sources of one core.
#[derive(Default)]
pub struct InterruptController {
    sources: Vec<InterruptSource>,
    current: Option<SourceId>,
    /// The last `(level, source)` handed to the listener.
    posted: (u8, Option<SourceId>),
    listener: Option<PriorityListener>,
}

impl fmt::Debug for InterruptController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptController")
            .field("sources", &self.sources)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Sources start idle and disabled (level zero).
    pub fn add_source(&mut self, name: &'static str, vector: u32, trigger: Trigger) -> SourceId {
        let line = matches!(
            trigger,
            Trigger::Edge(Edge::Falling) | Trigger::Selectable(Edge::Falling)
        );
        self.sources.push(InterruptSource {
            name,
            vector,
            level: 0,
            pending: false,
            trigger,
            line,
        });
        self.sources.len() - 1
    }

    pub fn sources(&self) -> &[InterruptSource] {
        &self.sources
    }

    pub fn source(&self, id: SourceId) -> Option<&InterruptSource> {
        self.sources.get(id)
    }

    pub fn find(&self, name: &str) -> Option<SourceId> {
        self.sources.iter().position(|source| source.name == name)
    }

    /// The most urgent qualifying source and its level.
    pub fn current(&self) -> Option<(SourceId, u8)> {
        self.current.map(|id| (id, self.sources[id].level))
    }

    /// Level of the most urgent qualifying source, zero if none.
    pub fn current_level(&self) -> u8 {
        self.current().map_or(0, |(_, level)| level)
    }

    /// Install the callback told about every change of the current
    /// interrupt, for systems with an external priority encoder.
    pub fn on_priority_change(&mut self, listener: impl FnMut(u8, Option<SourceId>) + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn set_level(&mut self, id: SourceId, level: u8) {
        if let Some(source) = self.source_mut(id, "set_level") {
            source.level = level;
            self.reevaluate();
        }
    }

    /// Change the edge of a [`Trigger::Selectable`] source. Other sources
    /// keep their wiring.
    pub fn set_polarity(&mut self, id: SourceId, edge: Edge) {
        if let Some(source) = self.source_mut(id, "set_polarity") {
            match source.trigger {
                Trigger::Selectable(_) => source.trigger = Trigger::Selectable(edge),
                _ => warn!(source = source.name, "polarity is not selectable"),
            }
        }
    }

    /// Mark a source pending. The caller has already resolved polarity.
    pub fn raise(&mut self, id: SourceId) {
        if let Some(source) = self.source_mut(id, "raise") {
            source.pending = true;
            self.reevaluate();
        }
    }

    /// Report the new state of a source's wired line. The source becomes
    /// pending if the transition matches its configured edge.
    pub fn signal(&mut self, id: SourceId, line: bool) {
        let Some(source) = self.source_mut(id, "signal") else {
            return;
        };
        let previous = std::mem::replace(&mut source.line, line);
        let edge = match source.trigger {
            Trigger::Internal => return,
            Trigger::Edge(edge) | Trigger::Selectable(edge) => edge,
        };
        let fired = match edge {
            Edge::Rising => !previous && line,
            Edge::Falling => previous && !line,
        };
        if fired {
            source.pending = true;
            self.reevaluate();
        }
    }

    /// Clear the pending bit of one source.
    pub fn acknowledge(&mut self, id: SourceId) {
        if let Some(source) = self.source_mut(id, "acknowledge") {
            source.pending = false;
            self.reevaluate();
        }
    }

    fn source_mut(&mut self, id: SourceId, operation: &str) -> Option<&mut InterruptSource> {
        let source = self.sources.get_mut(id);
        if source.is_none() {
            warn!(id, operation, "unknown interrupt source");
        }
        source
    }

    fn reevaluate(&mut self) {
        let mut best: Option<SourceId> = None;
        for (id, source) in self.sources.iter().enumerate() {
            if !source.qualifies() {
                continue;
            }
            // Strictly greater: the first source found at a level keeps it.
            if best.is_none_or(|best| source.level > self.sources[best].level) {
                best = Some(id);
            }
        }

        self.current = best;
        let posted = (self.current_level(), best);
        if posted != self.posted {
            self.posted = posted;
            let (level, source) = posted;
            debug!(level, ?source, "interrupt priority changed");
            if let Some(listener) = self.listener.as_mut() {
                listener(level, source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn controller(count: usize) -> InterruptController {
        let mut intc = InterruptController::new();
        for i in 0..count {
            intc.add_source("src", i as u32, Trigger::Internal);
        }
        intc
    }

    #[test]
    fn highest_level_wins_and_ack_falls_back() {
        let mut intc = controller(2);
        let (s1, s2) = (0, 1);
        intc.raise(s1);
        intc.raise(s2);
        assert_eq!(intc.current(), None);

        intc.set_level(s1, 3);
        intc.set_level(s2, 5);
        assert_eq!(intc.current(), Some((s2, 5)));

        intc.acknowledge(s2);
        assert_eq!(intc.current(), Some((s1, 3)));

        intc.acknowledge(s1);
        assert_eq!(intc.current(), None);
        assert_eq!(intc.current_level(), 0);
    }

    #[test]
    fn ties_go_to_the_first_source_in_scan_order() {
        let mut intc = controller(3);
        for id in 0..3 {
            intc.set_level(id, 2);
        }
        intc.raise(2);
        intc.raise(1);
        assert_eq!(intc.current(), Some((1, 2)));
        intc.raise(0);
        assert_eq!(intc.current(), Some((0, 2)));
    }

    #[test]
    fn pending_survives_until_acknowledged() {
        let mut intc = controller(1);
        intc.set_level(0, 1);
        intc.raise(0);
        intc.set_level(0, 0);
        assert_eq!(intc.current(), None);
        assert!(intc.sources()[0].is_pending());
        intc.set_level(0, 1);
        assert_eq!(intc.current(), Some((0, 1)));
    }

    #[test]
    fn edges_follow_polarity() {
        let mut intc = InterruptController::new();
        let rising = intc.add_source("rise", 0, Trigger::Edge(Edge::Rising));
        let pin = intc.add_source("pin", 1, Trigger::Selectable(Edge::Falling));
        intc.set_level(rising, 1);
        intc.set_level(pin, 1);

        intc.signal(rising, false);
        assert!(!intc.sources()[rising].is_pending());
        intc.signal(rising, true);
        assert!(intc.sources()[rising].is_pending());

        intc.signal(pin, true);
        assert!(!intc.sources()[pin].is_pending());
        intc.set_polarity(pin, Edge::Rising);
        intc.signal(pin, false);
        intc.signal(pin, true);
        assert!(intc.sources()[pin].is_pending());
    }

    #[test]
    fn listener_sees_changes_only() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut intc = controller(2);
        let log = seen.clone();
        intc.on_priority_change(move |level, source| log.borrow_mut().push((level, source)));
        intc.set_level(0, 1);
        intc.set_level(1, 4);
        intc.raise(0);
        intc.raise(1);
        intc.raise(1);
        intc.acknowledge(1);
        assert_eq!(*seen.borrow(), vec![(1, Some(0)), (4, Some(1)), (1, Some(0))]);

        // Same winner at a new level
        intc.set_level(0, 6);
        intc.set_level(0, 6);
        intc.acknowledge(0);
        assert_eq!(
            seen.borrow()[3..],
            [(6, Some(0)), (0, None)]
        );
    }

    #[test]
    fn unknown_sources_are_ignored() {
        let mut intc = controller(1);
        intc.raise(7);
        intc.acknowledge(7);
        assert_eq!(intc.current(), None);
    }
}
