//! Flow execution: nodes, lines and their dispatcher, and the factory

pub mod factory;
pub mod line;
pub mod node;

pub use factory::{Factory, LineId, RunId};
pub use line::Line;
pub use node::{Delivery, Node};
