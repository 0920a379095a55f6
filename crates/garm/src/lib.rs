//! garm - self-hosted CI runner fleet controller.

mod runtime;

pub use runtime::{Garm, GarmBuilder};
