pub mod agent;
pub mod channel;
pub mod config;
pub mod conversation;
pub mod orchestrator;
pub mod persona;
pub mod responder;
pub mod retrieval;
pub mod router;

pub use agent::*;
pub use channel::*;
pub use config::*;
pub use conversation::*;
pub use orchestrator::*;
pub use persona::*;
pub use responder::*;
pub use retrieval::*;
pub use router::*;
