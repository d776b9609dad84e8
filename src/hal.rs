//! Services the nested SVM core consumes from the rest of the hypervisor.

use axerrno::AxResult;
use memory_addr::{def_usize_addr, def_usize_addr_formatter};

use crate::context::GuestCpuContext;

def_usize_addr! {
    /// Guest physical address.
    pub type GuestPhysAddr;
}

def_usize_addr_formatter! {
    GuestPhysAddr = "GPA:{}";
}

/// Guest-physical memory, backed by the nested page tables of the VM.
pub trait GuestPhysMemory {
    /// Reads `buf.len()` bytes starting at `gpa`.
    ///
    /// May block while the backing page is resolved. Either fills the whole
    /// buffer or returns an error.
    fn read_guest_phys(&self, gpa: GuestPhysAddr, buf: &mut [u8]) -> AxResult;
}

/// The virtual local APIC of the vCPU.
pub trait VirtualApic {
    /// Returns the task-priority register and whether an interrupt is pending.
    fn tpr(&self) -> AxResult<(u8, bool)>;

    /// Sets the task-priority register.
    fn set_tpr(&mut self, tpr: u8) -> AxResult;
}

/// Outcome of a VMMCALL that was handled without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmmcallStatus {
    /// Handled; resume the guest.
    Success,
    /// The hypercall is still in progress, resume the guest without moving
    /// RIP so the VMMCALL executes again.
    HypercallContinuing,
    /// The hypercall has to be restarted from the host (privileged) context.
    RestartInHost,
}

/// Paravirtualized hypercall interface (KVM, Hyper-V, ...).
pub trait HypercallProvider {
    /// Performs the hypercall the guest requested in its registers.
    fn hypercall(&mut self, ctx: &mut GuestCpuContext) -> AxResult<VmmcallStatus>;
}

/// Everything a [`SvmVcpu`](crate::SvmVcpu) needs from its environment.
pub trait SvmVcpuHal: GuestPhysMemory + VirtualApic + HypercallProvider {}

impl<T: GuestPhysMemory + VirtualApic + HypercallProvider> SvmVcpuHal for T {}
