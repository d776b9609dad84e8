//! Per-vCPU state of the guest hypervisor's nested SVM usage.

use x86_64::registers::control::{Cr0Flags, Cr4Flags};
use x86_64::registers::rflags::RFlags;

use super::vmcb::{SvmExitInfo, VmcbControlArea};
use crate::context::GuestCpuContext;
use crate::hal::GuestPhysAddr;
use crate::segmentation::{DescriptorTable, Segment};

/// State of the guest hypervisor saved by VMRUN, restored by #VMEXIT.
///
/// This is what real hardware keeps in the host-save area (`VM_HSAVE_PA`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvmHostState {
    pub es: Segment,
    pub cs: Segment,
    pub ss: Segment,
    pub ds: Segment,
    pub gdtr: DescriptorTable,
    pub idtr: DescriptorTable,
    pub efer: u64,
    pub cr0: Cr0Flags,
    pub cr3: u64,
    pub cr4: Cr4Flags,
    pub rflags: RFlags,
    pub rip: u64,
    pub rsp: u64,
    pub rax: u64,
}

impl SvmHostState {
    /// Takes a snapshot of `ctx` as it is right now.
    pub fn capture(ctx: &GuestCpuContext) -> Self {
        Self {
            es: ctx.es,
            cs: ctx.cs,
            ss: ctx.ss,
            ds: ctx.ds,
            gdtr: ctx.gdtr,
            idtr: ctx.idtr,
            efer: ctx.efer,
            cr0: ctx.cr0,
            cr3: ctx.cr3,
            cr4: ctx.cr4,
            rflags: ctx.rflags,
            rip: ctx.rip,
            rsp: ctx.rsp,
            rax: ctx.regs.rax,
        }
    }
}

impl Default for SvmHostState {
    fn default() -> Self {
        Self {
            es: Segment::invalid(),
            cs: Segment::invalid(),
            ss: Segment::invalid(),
            ds: Segment::invalid(),
            gdtr: DescriptorTable::default(),
            idtr: DescriptorTable::default(),
            efer: 0,
            cr0: Cr0Flags::empty(),
            cr3: 0,
            cr4: Cr4Flags::empty(),
            rflags: RFlags::empty(),
            rip: 0,
            rsp: 0,
            rax: 0,
        }
    }
}

/// Nested SVM part of the [`GuestCpuContext`].
pub struct NestedSvmState {
    /// Guest-physical address of the VMCB passed to the last VMRUN.
    pub vmcb_gpa: GuestPhysAddr,
    /// Snapshot of the control area of that VMCB.
    ///
    /// Only meaningful while `in_guest_mode` is set; refreshed on every VMRUN.
    pub vmcb_ctrl: VmcbControlArea,
    /// State of the guest hypervisor at its last VMRUN.
    pub host_state: SvmHostState,
    /// Global interrupt flag.
    pub gif: bool,
    /// Whether the vCPU is currently running the nested guest.
    pub in_guest_mode: bool,
    /// The last #VMEXIT delivered to the guest hypervisor, to be written back
    /// to its VMCB.
    pub last_exit: Option<SvmExitInfo>,
}

impl Default for NestedSvmState {
    fn default() -> Self {
        Self {
            vmcb_gpa: GuestPhysAddr::from_usize(0),
            vmcb_ctrl: VmcbControlArea::zeroed(),
            host_state: SvmHostState::default(),
            // GIF is set at reset.
            gif: true,
            in_guest_mode: false,
            last_exit: None,
        }
    }
}

impl core::fmt::Debug for NestedSvmState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NestedSvmState")
            .field("vmcb_gpa", &format_args!("{:#x}", self.vmcb_gpa.as_usize()))
            .field("vmcb_ctrl", &self.vmcb_ctrl)
            .field("host_state", &self.host_state)
            .field("gif", &self.gif)
            .field("in_guest_mode", &self.in_guest_mode)
            .field("last_exit", &self.last_exit)
            .finish()
    }
}
