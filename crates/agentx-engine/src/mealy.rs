//! Mealy processor framework.
//!
//! A processor is a pure transition `(state, input) -> (next_state, outputs)`:
//! no side effects, no shared mutable state, equal inputs give equal results.
//! That keeps every processor testable without a bus, driver, or repository.

use std::collections::HashMap;

/// The transition function of a processor.
pub type Transition<S, I, O> = fn(&S, &I) -> (S, Vec<O>);

/// Descriptor naming a processor, its zero state, and its transition.
pub struct ProcessorDefinition<S, I, O> {
    pub name: &'static str,
    pub description: &'static str,
    pub initial_state: fn() -> S,
    pub transition: Transition<S, I, O>,
}

impl<S, I, O> Clone for ProcessorDefinition<S, I, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, I, O> Copy for ProcessorDefinition<S, I, O> {}

impl<S, I, O> std::fmt::Debug for ProcessorDefinition<S, I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

impl<S, I, O> ProcessorDefinition<S, I, O> {
    pub fn initial(&self) -> S {
        (self.initial_state)()
    }

    pub fn process(&self, state: &S, input: &I) -> (S, Vec<O>) {
        (self.transition)(state, input)
    }

    /// Fold `inputs` from the initial state, collecting every output in order.
    pub fn run<'a>(&self, inputs: impl IntoIterator<Item = &'a I>) -> (S, Vec<O>)
    where
        I: 'a,
    {
        let mut state = self.initial();
        let mut outputs = Vec::new();
        for input in inputs {
            let (next, produced) = self.process(&state, input);
            state = next;
            outputs.extend(produced);
        }
        (state, outputs)
    }
}

/// Runs one processor definition for many independent keys (usually agents).
///
/// Each key owns its own state slice; nothing is shared between keys.
pub struct MealyMachine<S, I, O> {
    definition: ProcessorDefinition<S, I, O>,
    states: HashMap<String, S>,
}

impl<S, I, O> MealyMachine<S, I, O> {
    pub fn new(definition: ProcessorDefinition<S, I, O>) -> Self {
        Self {
            definition,
            states: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.definition.name
    }

    /// Feed `input` to the state stored under `key`, creating it on first use.
    pub fn process(&mut self, key: &str, input: &I) -> Vec<O> {
        let definition = self.definition;
        let state = self
            .states
            .entry(key.to_string())
            .or_insert_with(|| definition.initial());
        let (next, outputs) = definition.process(state, input);
        *state = next;
        outputs
    }

    pub fn state(&self, key: &str) -> Option<&S> {
        self.states.get(key)
    }

    pub fn reset(&mut self, key: &str) {
        self.states.remove(key);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
