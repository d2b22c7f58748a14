mod allocator;
mod runtime;
mod state;
mod store;

// Curated crate-visible surface of `crate::app`
pub(crate) use allocator::{
    AddressPool, AllocError, GrantError, InterfaceBase, LeaseAllocator, ReclaimError,
};
pub(crate) use state::{AppState, ServerIdentity, initialize_state};
pub(crate) use store::{LeaseFile, LeaseRecord, StoreError};
