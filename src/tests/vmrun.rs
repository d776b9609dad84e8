//! Tests for VMRUN emulation.

use axerrno::AxError;
use tock_registers::interfaces::Writeable;
use x86_64::registers::control::Cr0Flags;
use x86_64::registers::rflags::RFlags;

use super::{MockHal, VMCB_GPA, map_vmcb, new_vcpu, valid_vmcb_ctrl};
use crate::{
    GuestPhysAddr, Segment, SvmError, SvmExitCode, SvmExitInfo, SvmIntercept, SvmVcpu,
    SvmVcpuConfig, SvmVmConfig, VmcbControlArea,
};

fn vcpu_with_nested_paging(guest_nested_paging: bool) -> SvmVcpu<MockHal> {
    new_vcpu(
        SvmVmConfig {
            tpr_patching_allowed: false,
            guest_nested_paging,
        },
        SvmVcpuConfig::default(),
    )
}

fn vmcb_gpa() -> GuestPhysAddr {
    GuestPhysAddr::from_usize(VMCB_GPA)
}

fn assert_invalid_vmexit(vcpu: &SvmVcpu<MockHal>) {
    let svm = &vcpu.context().hwvirt;
    assert!(!svm.gif);
    assert!(!svm.in_guest_mode);
    let exit = svm.last_exit.unwrap();
    assert_eq!(exit, SvmExitInfo::new(SvmExitCode::INVALID.into(), 0, 0));
    assert_eq!(exit.exit_code, Ok(SvmExitCode::INVALID));
}

#[test]
fn test_vmrun_without_vmrun_intercept() {
    let mut vcpu = vcpu_with_nested_paging(true);
    let mut ctrl = VmcbControlArea::zeroed();
    ctrl.guest_asid.set(1);
    ctrl.set_intercept(SvmIntercept::CPUID);
    ctrl.set_intercept(SvmIntercept::VMMCALL);
    map_vmcb(&mut vcpu, &ctrl);

    assert_eq!(vcpu.handle_vmrun(vmcb_gpa()), Ok(()));
    assert_invalid_vmexit(&vcpu);
}

#[test]
fn test_vmrun_nested_paging_unsupported() {
    let mut vcpu = vcpu_with_nested_paging(false);
    let mut ctrl = valid_vmcb_ctrl();
    ctrl.enable_nested_paging(0x20_0000);
    map_vmcb(&mut vcpu, &ctrl);

    assert_eq!(vcpu.handle_vmrun(vmcb_gpa()), Ok(()));
    assert_invalid_vmexit(&vcpu);
}

#[test]
fn test_vmrun_zero_asid() {
    let mut vcpu = vcpu_with_nested_paging(true);
    let ctrl = valid_vmcb_ctrl();
    ctrl.guest_asid.set(0);
    map_vmcb(&mut vcpu, &ctrl);

    assert_eq!(vcpu.handle_vmrun(vmcb_gpa()), Ok(()));
    assert_invalid_vmexit(&vcpu);
}

#[test]
fn test_vmrun_valid_vmcb_is_not_implemented() {
    let mut vcpu = vcpu_with_nested_paging(true);
    let mut ctrl = valid_vmcb_ctrl();
    ctrl.enable_nested_paging(0x20_0000);
    map_vmcb(&mut vcpu, &ctrl);

    assert_eq!(
        vcpu.handle_vmrun(vmcb_gpa()),
        Err(SvmError::NotImplemented)
    );
    let svm = &vcpu.context().hwvirt;
    assert!(svm.gif);
    assert!(svm.last_exit.is_none());
    assert_eq!(svm.vmcb_ctrl.as_bytes(), ctrl.as_bytes());
    assert_eq!(svm.vmcb_ctrl.asid(), 1);
    assert!(svm.vmcb_ctrl.nested_paging());
}

#[test]
fn test_vmrun_read_failure() {
    let mut vcpu = vcpu_with_nested_paging(true);
    map_vmcb(&mut vcpu, &valid_vmcb_ctrl());
    vcpu.handle_vmrun(vmcb_gpa()).unwrap_err();
    vcpu.context_mut().rip = 0x1234;

    // Nothing mapped there.
    let bad_gpa = GuestPhysAddr::from_usize(0x80_0000);
    assert_eq!(
        vcpu.handle_vmrun(bad_gpa),
        Err(SvmError::GuestMemory(AxError::BadAddress))
    );

    let svm = &vcpu.context().hwvirt;
    assert_eq!(svm.vmcb_gpa, bad_gpa);
    // Cache and snapshot are those of the previous VMRUN.
    assert_eq!(svm.vmcb_ctrl.asid(), 1);
    assert_eq!(svm.host_state.rip, 0);
    assert!(svm.gif);
    assert!(svm.last_exit.is_none());
}

#[test]
fn test_vmrun_snapshots_host_state() {
    let mut vcpu = vcpu_with_nested_paging(true);
    map_vmcb(&mut vcpu, &valid_vmcb_ctrl());

    let cs = Segment::flat(0x10, 0x29b);
    let ctx = vcpu.context_mut();
    ctx.rip = 0xffff_8000_0010_0000;
    ctx.rsp = 0xffff_8000_0020_0000;
    ctx.regs.rax = VMCB_GPA as u64;
    ctx.rflags = RFlags::INTERRUPT_FLAG | RFlags::from_bits_retain(0x2);
    ctx.cs = cs;
    ctx.cr0 = Cr0Flags::PROTECTED_MODE_ENABLE | Cr0Flags::PAGING;
    ctx.cr3 = 0x5000;
    ctx.efer = 0x1d00;
    ctx.gdtr.base = 0xffff_8000_0000_1000;
    ctx.gdtr.limit = 0x7f;

    assert_eq!(
        vcpu.handle_vmrun(vmcb_gpa()),
        Err(SvmError::NotImplemented)
    );

    let host = &vcpu.context().hwvirt.host_state;
    assert_eq!(host.rip, 0xffff_8000_0010_0000);
    assert_eq!(host.rsp, 0xffff_8000_0020_0000);
    assert_eq!(host.rax, VMCB_GPA as u64);
    assert!(host.rflags.contains(RFlags::INTERRUPT_FLAG));
    assert_eq!(host.cs, cs);
    assert_eq!(host.cr0, Cr0Flags::PROTECTED_MODE_ENABLE | Cr0Flags::PAGING);
    assert_eq!(host.cr3, 0x5000);
    assert_eq!(host.efer, 0x1d00);
    assert_eq!(host.gdtr.base, 0xffff_8000_0000_1000);
    assert_eq!(host.gdtr.limit, 0x7f);
    assert_eq!(vcpu.context().hwvirt.vmcb_gpa, vmcb_gpa());
}

#[test]
fn test_vmrun_snapshot_taken_on_invalid_vmcb() {
    let mut vcpu = vcpu_with_nested_paging(true);
    map_vmcb(&mut vcpu, &VmcbControlArea::zeroed());
    vcpu.context_mut().rip = 0x7000;

    assert_eq!(vcpu.handle_vmrun(vmcb_gpa()), Ok(()));
    assert_eq!(vcpu.context().hwvirt.host_state.rip, 0x7000);
    assert_invalid_vmexit(&vcpu);
}
