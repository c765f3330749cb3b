mod faulty;
mod instance;

pub use faulty::{Fault, FaultyStore};
pub use instance::{TestInstance, record, snapshot};
