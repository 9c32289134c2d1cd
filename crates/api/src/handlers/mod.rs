pub mod diagnostics;
pub mod games;
pub mod locks;
pub mod presence;
pub mod queue;
