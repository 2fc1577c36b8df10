//! Operation name -> handler table

use crate::fastly;
use crate::operation::Handler;

pub struct Operation {
    pub name: &'static str,
    pub handler: Box<dyn Handler>,
}

/// Fixed set of operations, built once at startup
pub struct Registry {
    operations: Vec<Operation>,
}

impl Registry {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    /// The Fastly maintenance operations
    pub fn fastly() -> Self {
        Self::new(fastly::operations())
    }

    /// Case-sensitive lookup
    pub fn lookup(&self, name: &str) -> Option<&dyn Handler> {
        self.operations
            .iter()
            .find(|op| op.name == name)
            .map(|op| op.handler.as_ref())
    }

    /// Operations in registration order
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.operations.iter().map(|op| op.name)
    }
}
