//! Scheduling strategies (§4.5, §4.6): the two `NodeCompiler` implementations
//! that [`crate::traverse`] drives. Sequential waits for a dependency's full
//! completion before starting a dependent; pipelined starts a dependent as
//! soon as its dependencies' type signatures are available.

pub mod pipelined;
pub mod sequential;

pub use pipelined::PipelinedScheduler;
pub use sequential::SequentialScheduler;
