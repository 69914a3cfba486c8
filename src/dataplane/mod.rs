//! Data plane components
//!
//! Session tables, port allocation and the packet translator.

mod clock;
mod entry;
mod nat_table;
mod port_pool;
mod session_list;
mod translator;
mod variant;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use entry::Entry;
pub use nat_table::{build_table, NatTable, SessionTable};
pub use port_pool::{ExclusivePool, MapEProfile, PortProbe, PortSet, MAX_PROBES};
pub use session_list::{SessionList, SlotId};
pub use translator::{TranslateResult, Translator};
pub use variant::{
    FullCone, NatKind, PortRequest, PortRestrictedCone, RestrictedCone, Symmetric, Variant,
};
