//! Order settlement: building and finalizing our own transactions, and
//! deriving fills from everything the ledger validates.

pub mod builder;
pub mod fills;
pub mod finality;

pub use builder::{autofill, build_offer_cancel, build_offer_create, offer_flags, OrderIntent};
pub use fills::{process_transaction, FillContext};
pub use finality::{
    classify, verify_transaction, wait_for_final_outcome, FinalityPoll, PollObservation, PollStep, TxLookup,
    Verification,
};
