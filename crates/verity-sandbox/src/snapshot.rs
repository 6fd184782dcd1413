use std::collections::BTreeMap;

use verity_model::Value;

/// A copy of module globals, taken before a run and restored after it so
/// runs never observe each other's mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSnapshot {
    /// Number of restores performed from this snapshot.
    generation: u64,
    globals: BTreeMap<String, Value>,
}

impl GlobalSnapshot {
    pub fn capture(globals: &BTreeMap<String, Value>) -> Self {
        Self {
            generation: 0,
            globals: globals.clone(),
        }
    }

    /// Roll `globals` back to the captured state. Returns the generation
    /// number of the restored state.
    pub fn restore(&mut self, globals: &mut BTreeMap<String, Value>) -> u64 {
        if *globals != self.globals {
            globals.clone_from(&self.globals);
        }
        self.generation += 1;
        self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }
}
