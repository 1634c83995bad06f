//! Model of the host application's scripting surface: its live namespace of
//! compiled UI routines and menu classes, the layout object draw routines
//! fill in, and the per-frame timer mechanism.

mod layout;
mod namespace;
mod timers;

pub use layout::{LayoutItem, MenuLayout};
pub use namespace::{DrawRoutine, HostModuleSource, HostNamespace, MenuOpenHandler, NativeDraw};
pub use timers::{HostTimers, TimerCallback, TimerControl, TimerId, TimerRegistrar};
