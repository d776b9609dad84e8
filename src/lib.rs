#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]

#[macro_use]
extern crate log;

extern crate alloc;

pub(crate) mod regs;
mod context;
mod error;
mod hal;
mod segmentation;
mod svm;

pub use context::GuestCpuContext;
pub use error::{Result, SvmError};
pub use hal::{
    GuestPhysAddr, GuestPhysMemory, HypercallProvider, SvmVcpuHal, VirtualApic, VmmcallStatus,
};
pub use regs::GeneralRegisters;
pub use segmentation::{DescriptorTable, Segment};
pub use svm::{
    ChangedFlags, NestedSvmState, SvmExitCode, SvmExitInfo, SvmHostState, SvmIntercept, SvmVcpu,
    SvmVcpuConfig, SvmVm, SvmVmConfig, TprInstrKind, TprPatch, TprPatchLookup, TprPatchTable,
    VMCB_CONTROL_AREA_SIZE, VmcbControlArea, VmmcallExit, has_hardware_support,
    has_nested_paging_support,
};

#[cfg(test)]
mod tests;
