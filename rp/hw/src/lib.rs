//! # RP hardware layer
//!
//! The hardware primitives the async context is built from, modelled for a
//! dual-core RP2040-class chip:
//!
//! - [`alias`] – atomic SET/CLEAR/XOR register updates through address aliases.
//! - [`spinlock`] – the bank of 32 hardware spin locks and its claim registry.
//! - [`irq`] – per-core interrupt controllers with exclusive and shared handlers.
//! - [`cpu`] – core binding, interrupt masking and the SEV/WFE event line.
//! - [`timer`] – the microsecond clock and alarms that pend interrupts.
//! - [`sync`] – a counting semaphore that keeps servicing interrupts while it waits.
//! - [`platform`] – the chip itself, tying the pieces together.
//!
//! On a development host the chip is simulated: cores are threads bound to a
//! [`CoreId`], interrupts are taken at well-defined points on the bound
//! thread, and spin locks are a status bitmap with the same read-to-claim
//! semantics as the silicon.

pub mod alias;
pub mod claim;
pub mod cpu;
pub mod error;
pub mod irq;
pub mod platform;
pub mod spinlock;
pub mod sync;
pub mod timer;

pub use alias::{Alias, MmioRegister, Register, SimRegister};
pub use claim::ClaimRegistry;
pub use cpu::{current_core, CoreBinding, InterruptState};
pub use error::{HwError, HwResult};
pub use irq::{InterruptHandler, Irq, IsrFn, Nvic};
pub use platform::{Platform, PlatformConfig};
pub use rp_core::{AbsoluteTime, CoreId, NUM_CORES};
pub use spinlock::{SpinLock, SpinLockBank};
pub use sync::Semaphore;
pub use timer::{AlarmId, Timer};
