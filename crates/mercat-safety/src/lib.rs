//! Message safety for mercat chats.
//!
//! [`scanner`] classifies text for contact-exchange attempts. [`guard`] wires
//! the scanner into a thread's compose and send paths. [`store`] is the seam
//! every persistence backend implements; [`memory`] is the in-process one.

pub mod guard;
pub mod memory;
pub mod scanner;
pub mod store;

pub use guard::{BannerState, ComposeSession, GuardError, SendOutcome, ThreadGuard};
pub use memory::{MemoryStore, StoreEvent};
pub use scanner::{PatternSet, SafetyScanner, scan_final, scan_live};
pub use store::{MessageStore, StoreError, ThreadDirectory};
