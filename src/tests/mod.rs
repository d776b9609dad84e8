//! Unit tests for the nested SVM handlers.
//!
//! The handlers run against [`MockHal`], which backs guest memory with plain
//! byte buffers and records every APIC and hypercall access.

mod vmrun;

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use axerrno::{AxError, AxResult};
use tock_registers::interfaces::Writeable;

use crate::{
    GuestCpuContext, GuestPhysAddr, GuestPhysMemory, HypercallProvider, SvmIntercept, SvmVcpu,
    SvmVcpuConfig, SvmVm, SvmVmConfig, VirtualApic, VmcbControlArea, VmmcallStatus,
};

/// Guest-physical address the tests place their VMCB at.
pub(crate) const VMCB_GPA: usize = 0x10_000;

pub(crate) struct MockHal {
    /// Guest memory regions as `(base, bytes)`.
    pub memory: Vec<(usize, Vec<u8>)>,
    pub tpr: u8,
    pub tpr_pending: bool,
    /// Every value written to the TPR, in order.
    pub tpr_writes: Vec<u8>,
    /// If set, TPR reads fail with it.
    pub tpr_read_error: Option<AxError>,
    /// If set, TPR writes fail with it.
    pub tpr_write_error: Option<AxError>,
    pub hypercalls: usize,
    pub hypercall_result: AxResult<VmmcallStatus>,
}

impl MockHal {
    pub fn new() -> Self {
        Self {
            memory: Vec::new(),
            tpr: 0,
            tpr_pending: false,
            tpr_writes: Vec::new(),
            tpr_read_error: None,
            tpr_write_error: None,
            hypercalls: 0,
            hypercall_result: Ok(VmmcallStatus::Success),
        }
    }

    pub fn map(&mut self, base: usize, bytes: &[u8]) {
        self.memory.push((base, bytes.to_vec()));
    }
}

impl GuestPhysMemory for MockHal {
    fn read_guest_phys(&self, gpa: GuestPhysAddr, buf: &mut [u8]) -> AxResult {
        let start = gpa.as_usize();
        let end = start + buf.len();
        for (base, bytes) in &self.memory {
            if start >= *base && end <= base + bytes.len() {
                buf.copy_from_slice(&bytes[start - base..end - base]);
                return Ok(());
            }
        }
        Err(AxError::BadAddress)
    }
}

impl VirtualApic for MockHal {
    fn tpr(&self) -> AxResult<(u8, bool)> {
        match self.tpr_read_error {
            Some(err) => Err(err),
            None => Ok((self.tpr, self.tpr_pending)),
        }
    }

    fn set_tpr(&mut self, tpr: u8) -> AxResult {
        if let Some(err) = self.tpr_write_error {
            return Err(err);
        }
        self.tpr = tpr;
        self.tpr_writes.push(tpr);
        Ok(())
    }
}

impl HypercallProvider for MockHal {
    fn hypercall(&mut self, _ctx: &mut GuestCpuContext) -> AxResult<VmmcallStatus> {
        self.hypercalls += 1;
        self.hypercall_result
    }
}

pub(crate) fn new_vcpu(vm_config: SvmVmConfig, vcpu_config: SvmVcpuConfig) -> SvmVcpu<MockHal> {
    let vm = Arc::new(SvmVm::new(vm_config));
    SvmVcpu::new(0, vm, MockHal::new(), vcpu_config)
}

/// A control area that passes every VMRUN consistency check.
pub(crate) fn valid_vmcb_ctrl() -> VmcbControlArea {
    let mut ctrl = VmcbControlArea::zeroed();
    ctrl.set_intercept(SvmIntercept::VMRUN);
    ctrl.guest_asid.set(1);
    ctrl
}

/// Places a full VMCB page whose control area is `ctrl` at [`VMCB_GPA`].
pub(crate) fn map_vmcb(vcpu: &mut SvmVcpu<MockHal>, ctrl: &VmcbControlArea) {
    let mut page = vec![0u8; 0x1000];
    page[..ctrl.as_bytes().len()].copy_from_slice(ctrl.as_bytes());
    vcpu.hal_mut().map(VMCB_GPA, &page);
}
