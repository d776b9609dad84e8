use alloc::sync::Arc;

use bitflags::bitflags;

use super::definitions::{SvmExitCode, SvmIntercept};
use super::has_nested_paging_support;
use super::nested::SvmHostState;
use super::tpr::TprPatchTable;
use super::vmcb::{SvmExitInfo, VmcbControlArea};
use crate::context::GuestCpuContext;
use crate::hal::{GuestPhysAddr, SvmVcpuHal, VmmcallStatus};
use crate::{Result, SvmError};

/// Per-VM configuration of nested SVM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SvmVmConfig {
    /// Emulate patched TPR accesses on VMMCALL.
    pub tpr_patching_allowed: bool,
    /// Nested paging is exposed to the guest hypervisor.
    pub guest_nested_paging: bool,
}

impl SvmVmConfig {
    /// Exposes nested paging iff the host has it; TPR patching stays off.
    pub fn from_host() -> Self {
        Self {
            tpr_patching_allowed: false,
            guest_nested_paging: has_nested_paging_support(),
        }
    }
}

/// Per-vCPU configuration of nested SVM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SvmVcpuConfig {
    /// Forward VMMCALLs to the paravirtualized hypercall provider.
    pub hypercalls_enabled: bool,
}

/// State shared by all vCPUs of a VM.
pub struct SvmVm {
    config: SvmVmConfig,
    pub(super) tpr_patches: TprPatchTable,
}

impl SvmVm {
    pub fn new(config: SvmVmConfig) -> Self {
        Self {
            config,
            tpr_patches: TprPatchTable::new(),
        }
    }

    pub fn config(&self) -> &SvmVmConfig {
        &self.config
    }

    /// The TPR patches of this VM, for the patching subsystem to fill.
    pub fn tpr_patches(&self) -> &TprPatchTable {
        &self.tpr_patches
    }
}

bitflags! {
    /// Guest state modified by the handlers that the caller has to
    /// propagate before resuming the guest.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChangedFlags: u32 {
        /// The virtual APIC (TPR) changed.
        const GUEST_APIC_STATE = 1 << 0;
    }
}

/// Result of a successfully handled VMMCALL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmmcallExit {
    pub status: VmmcallStatus,
    /// RIP and RFLAGS.RF were already updated by the handler. If not, the
    /// caller skips the VMMCALL itself when `status` is
    /// [`VmmcallStatus::Success`].
    pub rip_updated: bool,
}

/// A virtual CPU of a guest hypervisor that uses AMD-V.
pub struct SvmVcpu<H: SvmVcpuHal> {
    id: usize,
    pub(super) vm: Arc<SvmVm>,
    pub(super) hal: H,
    pub(super) ctx: GuestCpuContext,
    hypercalls_enabled: bool,
    pub(super) changed: ChangedFlags,
    pub(super) last_error: u32,
}

impl<H: SvmVcpuHal> SvmVcpu<H> {
    /// Create a new [`SvmVcpu`].
    pub fn new(id: usize, vm: Arc<SvmVm>, hal: H, config: SvmVcpuConfig) -> Self {
        info!(
            "[HV] created SvmVcpu {} (tpr patching: {}, hypercalls: {})",
            id, vm.config.tpr_patching_allowed, config.hypercalls_enabled
        );
        Self {
            id,
            vm,
            hal,
            ctx: GuestCpuContext::default(),
            hypercalls_enabled: config.hypercalls_enabled,
            changed: ChangedFlags::empty(),
            last_error: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn vm(&self) -> &Arc<SvmVm> {
        &self.vm
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn context(&self) -> &GuestCpuContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut GuestCpuContext {
        &mut self.ctx
    }

    pub fn hypercalls_enabled(&self) -> bool {
        self.hypercalls_enabled
    }

    pub fn set_hypercalls_enabled(&mut self, enable: bool) {
        self.hypercalls_enabled = enable;
    }

    /// State changed by the handlers since the last [`Self::take_changed`].
    pub fn changed(&self) -> ChangedFlags {
        self.changed
    }

    /// Returns and clears the changed-state flags.
    pub fn take_changed(&mut self) -> ChangedFlags {
        core::mem::replace(&mut self.changed, ChangedFlags::empty())
    }

    /// Diagnostic code of the last internal error, 0 if none.
    pub fn last_error(&self) -> u32 {
        self.last_error
    }

    /// Handles a VMMCALL executed by the guest.
    ///
    /// Patched TPR accesses are emulated first (when allowed for the VM); if
    /// there is no patch at EIP the call goes to the hypercall provider.
    pub fn handle_vmmcall(&mut self) -> Result<VmmcallExit> {
        if self.vm.config.tpr_patching_allowed {
            match self.emulate_mov_tpr() {
                Ok(()) => {
                    return Ok(VmmcallExit {
                        status: VmmcallStatus::Success,
                        rip_updated: true,
                    });
                }
                Err(SvmError::PatchNotFound) => {}
                Err(err) => {
                    debug!("[HV] VMMCALL: TPR patch emulation failed: {}", err);
                    return Err(err);
                }
            }
        }

        if !self.hypercalls_enabled {
            return Err(SvmError::NotAvailable);
        }

        let status = self
            .hal
            .hypercall(&mut self.ctx)
            .map_err(SvmError::Hypercall)?;
        Ok(VmmcallExit {
            status,
            rip_updated: false,
        })
    }

    /// Handles a VMRUN executed by the guest hypervisor with the VMCB at
    /// `vmcb_gpa`.
    ///
    /// A VMCB that fails the consistency checks results in
    /// #VMEXIT(INVALID) to the guest hypervisor, not in an error.
    pub fn handle_vmrun(&mut self, vmcb_gpa: GuestPhysAddr) -> Result {
        // Kept even if the VMCB can't be read, #VMEXIT refers to it.
        self.ctx.hwvirt.vmcb_gpa = vmcb_gpa;

        let vmcb_ctrl =
            VmcbControlArea::read_from(&self.hal, vmcb_gpa).map_err(SvmError::GuestMemory)?;
        self.ctx.hwvirt.vmcb_ctrl = vmcb_ctrl;

        // Must be taken before anything in the context is switched.
        self.ctx.hwvirt.host_state = SvmHostState::capture(&self.ctx);

        if let Err(reason) = self.check_vmcb_controls() {
            debug!(
                "[HV] VMRUN @ {:#x}: {} -> #VMEXIT(INVALID)",
                vmcb_gpa.as_usize(),
                reason
            );
            return self.handle_vmexit(SvmExitCode::INVALID.into(), 0, 0);
        }

        // TODO: load the nested guest state from the VMCB save area, merge
        // the intercepts and enter guest mode.
        warn!(
            "[HV] VMRUN @ {:#x}: entering the nested guest is not implemented",
            vmcb_gpa.as_usize()
        );
        Err(SvmError::NotImplemented)
    }

    /// Consistency checks of the cached VMCB controls (APM Vol.2 15.5.1).
    fn check_vmcb_controls(&self) -> core::result::Result<(), &'static str> {
        let ctrl = &self.ctx.hwvirt.vmcb_ctrl;
        if !ctrl.is_intercept_set(SvmIntercept::VMRUN) {
            return Err("VMRUN instruction not intercepted");
        }
        if ctrl.nested_paging() && !self.vm.config.guest_nested_paging {
            return Err("nested paging not supported");
        }
        if ctrl.asid() == 0 {
            return Err("guest ASID is invalid");
        }
        Ok(())
    }

    /// Delivers a #VMEXIT to the guest hypervisor.
    ///
    /// Only valid while the nested guest runs, except for
    /// [`SvmExitCode::INVALID`], which VMRUN also raises before guest mode is
    /// entered.
    pub fn handle_vmexit(&mut self, exit_code: u64, exit_info_1: u64, exit_info_2: u64) -> Result {
        let svm = &mut self.ctx.hwvirt;
        if !svm.in_guest_mode && exit_code != u64::from(SvmExitCode::INVALID) {
            warn!(
                "[HV] #VMEXIT while not in SVM guest mode: exit_code={:#x} exit_info_1={:#x} exit_info_2={:#x}",
                exit_code, exit_info_1, exit_info_2
            );
            return Err(SvmError::UnexpectedVmexit {
                exit_code,
                exit_info_1,
                exit_info_2,
            });
        }

        svm.gif = false;
        svm.last_exit = Some(SvmExitInfo::new(exit_code, exit_info_1, exit_info_2));

        // TODO: restore `host_state` into the context and leave guest mode.
        Ok(())
    }
}

impl<H: SvmVcpuHal> core::fmt::Debug for SvmVcpu<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SvmVcpu")
            .field("id", &self.id)
            .field("ctx", &self.ctx)
            .field("hypercalls_enabled", &self.hypercalls_enabled)
            .field("changed", &self.changed)
            .field("last_error", &self.last_error)
            .finish()
    }
}
