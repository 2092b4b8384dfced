//! Token-level firing semantics of the dataflow operators.
//!
//! Each operator is a small state machine over token queues: it fires when
//! its required inputs are present, consuming exactly what its semantics
//! allow. These models define the behavior the graph encodes and back the
//! operator-level tests, particularly the Carry ordering guarantees for
//! nested loops.

use std::collections::VecDeque;

/// Result of a successful firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fire {
    /// A token was passed through.
    Emitted(i64),
    /// Inputs were consumed but nothing was emitted.
    Consumed,
}

/// Conditional gate: passes its data input iff the decider matches the
/// gate's polarity, else consumes and drops it.
#[derive(Debug)]
pub struct Steer {
    polarity: bool,
    deciders: VecDeque<bool>,
    data: VecDeque<i64>,
}

impl Steer {
    pub fn new_true() -> Self {
        Self {
            polarity: true,
            deciders: VecDeque::new(),
            data: VecDeque::new(),
        }
    }

    pub fn new_false() -> Self {
        Self {
            polarity: false,
            ..Self::new_true()
        }
    }

    pub fn push_decider(&mut self, decider: bool) {
        self.deciders.push_back(decider);
    }

    pub fn push_data(&mut self, value: i64) {
        self.data.push_back(value);
    }

    /// Fire once both a decider and a data token are available.
    pub fn try_fire(&mut self) -> Option<Fire> {
        if self.deciders.is_empty() || self.data.is_empty() {
            return None;
        }
        let decider = self.deciders.pop_front()?;
        let value = self.data.pop_front()?;
        if decider == self.polarity {
            Some(Fire::Emitted(value))
        } else {
            Some(Fire::Consumed)
        }
    }
}

/// Path-selecting mux: the decider chooses which data input to pass, and
/// only the chosen one is consumed, enforcing cross-path ordering.
#[derive(Debug, Default)]
pub struct Merge {
    deciders: VecDeque<bool>,
    a: VecDeque<i64>,
    b: VecDeque<i64>,
}

impl Merge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_decider(&mut self, decider: bool) {
        self.deciders.push_back(decider);
    }

    pub fn push_a(&mut self, value: i64) {
        self.a.push_back(value);
    }

    pub fn push_b(&mut self, value: i64) {
        self.b.push_back(value);
    }

    /// Fire once the decider and the selected input are available.
    /// A true decider selects A.
    pub fn try_fire(&mut self) -> Option<Fire> {
        let decider = *self.deciders.front()?;
        let queue = if decider { &mut self.a } else { &mut self.b };
        if queue.is_empty() {
            return None;
        }
        let value = queue.pop_front()?;
        self.deciders.pop_front();
        Some(Fire::Emitted(value))
    }
}

/// Carry state; see [`Carry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarryState {
    Initial,
    Block,
}

/// Loop-carried operator.
///
/// In `Initial` it waits for A, passes it through and moves to `Block`. In
/// `Block` it passes B while the decider is true; a false decider drops the
/// front of the A queue (if any) and resets to `Initial`. A is never
/// consumed while in `Block`, which is what serializes instances of an
/// inner loop: the outer loop cannot start a new instance until the
/// previous one reset its carry.
#[derive(Debug)]
pub struct Carry {
    state: CarryState,
    deciders: VecDeque<bool>,
    a: VecDeque<i64>,
    b: VecDeque<i64>,
}

impl Carry {
    pub fn new() -> Self {
        Self {
            state: CarryState::Initial,
            deciders: VecDeque::new(),
            a: VecDeque::new(),
            b: VecDeque::new(),
        }
    }

    pub fn state(&self) -> CarryState {
        self.state
    }

    pub fn push_decider(&mut self, decider: bool) {
        self.deciders.push_back(decider);
    }

    pub fn push_a(&mut self, value: i64) {
        self.a.push_back(value);
    }

    pub fn push_b(&mut self, value: i64) {
        self.b.push_back(value);
    }

    pub fn pending_a(&self) -> usize {
        self.a.len()
    }

    pub fn try_fire(&mut self) -> Option<Fire> {
        match self.state {
            CarryState::Initial => {
                let value = self.a.pop_front()?;
                self.state = CarryState::Block;
                Some(Fire::Emitted(value))
            }
            CarryState::Block => {
                let decider = *self.deciders.front()?;
                if decider {
                    if self.b.is_empty() {
                        return None;
                    }
                    self.deciders.pop_front();
                    self.b.pop_front().map(Fire::Emitted)
                } else {
                    self.deciders.pop_front();
                    self.a.pop_front();
                    self.state = CarryState::Initial;
                    Some(Fire::Consumed)
                }
            }
        }
    }
}

impl Default for Carry {
    fn default() -> Self {
        Self::new()
    }
}

/// Degenerate Carry whose B input is its own output: regenerates a fresh
/// copy of a loop-invariant value each iteration the decider allows.
#[derive(Debug)]
pub struct Invariant {
    state: CarryState,
    held: Option<i64>,
    deciders: VecDeque<bool>,
    a: VecDeque<i64>,
}

impl Invariant {
    pub fn new() -> Self {
        Self {
            state: CarryState::Initial,
            held: None,
            deciders: VecDeque::new(),
            a: VecDeque::new(),
        }
    }

    pub fn push_decider(&mut self, decider: bool) {
        self.deciders.push_back(decider);
    }

    pub fn push_a(&mut self, value: i64) {
        self.a.push_back(value);
    }

    pub fn try_fire(&mut self) -> Option<Fire> {
        match self.state {
            CarryState::Initial => {
                let value = self.a.pop_front()?;
                self.held = Some(value);
                self.state = CarryState::Block;
                Some(Fire::Emitted(value))
            }
            CarryState::Block => {
                let decider = *self.deciders.front()?;
                let held = self.held?;
                self.deciders.pop_front();
                if decider {
                    Some(Fire::Emitted(held))
                } else {
                    self.held = None;
                    self.state = CarryState::Initial;
                    Some(Fire::Consumed)
                }
            }
        }
    }
}

impl Default for Invariant {
    fn default() -> Self {
        Self::new()
    }
}

/// Two-input join: fires when both inputs are present and passes B through.
/// Serializes side effects without disambiguating them.
#[derive(Debug, Default)]
pub struct Order {
    a: VecDeque<i64>,
    b: VecDeque<i64>,
}

impl Order {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_a(&mut self, value: i64) {
        self.a.push_back(value);
    }

    pub fn push_b(&mut self, value: i64) {
        self.b.push_back(value);
    }

    pub fn try_fire(&mut self) -> Option<Fire> {
        if self.a.is_empty() || self.b.is_empty() {
            return None;
        }
        self.a.pop_front();
        self.b.pop_front().map(Fire::Emitted)
    }
}

/// What a [`Stream`] produced on one firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFire {
    /// The next index token.
    Value(i64),
    /// The sequence is exhausted; fired exactly once.
    Done,
}

/// Iteration token source: emits `start, start+step, …` below `bound`,
/// then a single done signal.
#[derive(Debug)]
pub struct Stream {
    next: i64,
    bound: i64,
    step: i64,
    finished: bool,
}

impl Stream {
    pub fn new(start: i64, bound: i64, step: i64) -> Self {
        Self {
            next: start,
            bound,
            step,
            finished: false,
        }
    }

    pub fn try_fire(&mut self) -> Option<StreamFire> {
        if self.finished {
            return None;
        }
        if self.next < self.bound {
            let value = self.next;
            self.next += self.step;
            Some(StreamFire::Value(value))
        } else {
            self.finished = true;
            Some(StreamFire::Done)
        }
    }
}
